//! Frames, opcodes and incremental frame reassembly.

use std::collections::VecDeque;

use serde::de::DeserializeOwned;

use crate::{Result, WireError};

/// Bytes in a frame header: code then length, both u32 LE.
pub const HEADER_LEN: usize = 8;
/// Largest payload accepted in one frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Message codes. Requests are even, their response is `request + 1`.
pub mod opcode {
    pub const VERSION_REQUEST: u32 = 1;
    pub const VERSION_RESPONSE: u32 = 2;
    pub const LOGIN_REQUEST: u32 = 3;
    pub const LOGIN_RESPONSE: u32 = 4;
    pub const LOGOUT_REQUEST: u32 = 5;
    pub const LOGOUT_RESPONSE: u32 = 6;

    pub const STAT: u32 = 16;
    pub const LIST: u32 = 18;
    pub const READ_FILE: u32 = 20;
    pub const WRITE_FILE: u32 = 22;
    pub const COPY: u32 = 24;
    pub const COMPARE: u32 = 26;
    pub const RENAME: u32 = 28;
    pub const SYMLINK: u32 = 30;
    pub const READ_LINK: u32 = 32;
    pub const REAL_PATH: u32 = 34;
    pub const MAKE_DIR: u32 = 36;
    pub const REMOVE_DIR: u32 = 38;
    pub const REMOVE_ALL: u32 = 40;
    pub const ARCHIVE: u32 = 42;
    pub const DEARCHIVE: u32 = 44;
    pub const PASTE: u32 = 46;
    pub const PROTOTYPE: u32 = 48;
    pub const GET_UUID: u32 = 50;
    pub const LOOKUP_UUID: u32 = 52;
    pub const RECONCILE: u32 = 54;
    pub const FIX_OOFS: u32 = 56;

    pub const TRANSFER_ANNOUNCE: u32 = 96;
    pub const TRANSFER_BLOCK: u32 = 97;
    pub const TRANSFER_DONE: u32 = 98;

    /// True for operation request codes.
    pub fn is_operation(code: u32) -> bool {
        (STAT..=FIX_OOFS).contains(&code) && code % 2 == 0
    }

    /// Paired response code of an operation request.
    pub fn response(request: u32) -> u32 {
        request + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(code: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Decode a bincode payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    /// Header followed by payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                len: self.payload.len() as u64,
                max: MAX_FRAME_LEN as u64,
            });
        }
        let mut frame = Vec::with_capacity(HEADER_LEN + self.payload.len());
        frame.extend_from_slice(&self.code.to_le_bytes());
        frame.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }
}

/// Accumulates stream bytes and cuts complete frames out of them.
#[derive(Debug, Default)]
pub(crate) struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    /// Append `bytes` and move every complete frame into `pending`, in
    /// arrival order. A declared length above [`MAX_FRAME_LEN`] is rejected
    /// as soon as its header is visible.
    pub(crate) fn feed(&mut self, bytes: &[u8], pending: &mut VecDeque<Message>) -> Result<usize> {
        self.buf.extend_from_slice(bytes);
        let mut consumed = 0;
        let mut completed = 0;
        loop {
            let rest = &self.buf[consumed..];
            if rest.len() < HEADER_LEN {
                break;
            }
            let code = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
            if len > MAX_FRAME_LEN {
                return Err(WireError::FrameTooLarge {
                    len: len as u64,
                    max: MAX_FRAME_LEN as u64,
                });
            }
            if rest.len() < HEADER_LEN + len {
                break;
            }
            let payload = rest[HEADER_LEN..HEADER_LEN + len].to_vec();
            pending.push_back(Message { code, payload });
            consumed += HEADER_LEN + len;
            completed += 1;
        }
        self.buf.drain(..consumed);
        Ok(completed)
    }

    /// Bytes of an incomplete frame still waiting for the rest.
    #[cfg(test)]
    pub(crate) fn partial(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_handles_split_and_batched_frames() {
        let a = Message::new(opcode::STAT, b"first".to_vec()).encode().unwrap();
        let b = Message::new(opcode::LIST, Vec::new()).encode().unwrap();
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut assembler = FrameAssembler::default();
        let mut pending = VecDeque::new();
        assert_eq!(assembler.feed(&stream[..5], &mut pending).unwrap(), 0);
        assert_eq!(assembler.feed(&stream[5..], &mut pending).unwrap(), 2);
        assert_eq!(assembler.partial(), 0);
        assert_eq!(pending[0], Message::new(opcode::STAT, b"first".to_vec()));
        assert_eq!(pending[1].code, opcode::LIST);
        assert!(pending[1].payload.is_empty());
    }

    #[test]
    fn test_oversize_header_rejected_before_payload() {
        let mut header = opcode::STAT.to_le_bytes().to_vec();
        header.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_le_bytes());
        let mut assembler = FrameAssembler::default();
        let mut pending = VecDeque::new();
        assert!(matches!(
            assembler.feed(&header, &mut pending),
            Err(WireError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_opcode_pairs() {
        assert!(opcode::is_operation(opcode::STAT));
        assert!(opcode::is_operation(opcode::FIX_OOFS));
        assert!(!opcode::is_operation(opcode::response(opcode::STAT)));
        assert!(!opcode::is_operation(opcode::LOGIN_REQUEST));
        assert_eq!(opcode::response(opcode::PASTE), 47);
    }
}
