//! # oofs-wire
//!
//! Length-framed binary messages between an OOFS client and a session
//! worker.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+-------------+---------------------+
//! | code: u32 | length: u32 | payload (length B)  |
//! +-----------+-------------+---------------------+
//!   LE          LE
//! ```
//!
//! Every request code has exactly one paired response code. A [`Channel`]
//! buffers frames it has read but nobody has claimed yet, so replies may be
//! consumed in a different order than they arrived.

pub mod channel;
pub mod message;
pub mod ops;
pub mod transfer;

pub use channel::Channel;
pub use message::{opcode, Message, HEADER_LEN, MAX_FRAME_LEN};
pub use ops::{DirEntry, Failure, FailureKind, FileKind, FileStat, Operation, Outcome, Reply};
pub use transfer::{no_progress, BLOCK_LEN, MAX_BLOB_LEN};

use thiserror::Error;

/// Protocol revision exchanged in the version step.
pub const PROTOCOL_VERSION: u32 = 3;

/// Login reply payloads.
pub const LOGIN_CONFIRMED: &str = "login confirmed";
pub const LOGIN_DENIED: &str = "login denied";

#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Transfer aborted by peer: {0}")]
    Aborted(Failure),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// Payload of a login request.
pub fn login_payload(login: &str, password: &str) -> Vec<u8> {
    format!("{}:{}", login, password).into_bytes()
}

/// Split a login payload at the first `:`.
pub fn parse_login(payload: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(payload).ok()?;
    let (login, password) = text.split_once(':')?;
    if login.is_empty() {
        return None;
    }
    Some((login.to_string(), password.to_string()))
}
