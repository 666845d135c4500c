//! Framed message channel over any async byte stream.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use oofs_config::log_wire_debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{FrameAssembler, Message};
use crate::{Result, WireError};

const READ_CHUNK: usize = 64 * 1024;

/// One end of a framed connection.
///
/// Messages are read into a pending buffer and claimed by code, oldest
/// first. After any transport or framing error the channel is poisoned and
/// every later call fails with [`WireError::Closed`].
pub struct Channel<S> {
    stream: S,
    assembler: FrameAssembler,
    pending: VecDeque<Message>,
    io_timeout: Option<Duration>,
    poisoned: bool,
}

async fn timed<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WireError::Timeout(limit)),
        },
        None => Ok(fut.await?),
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            assembler: FrameAssembler::default(),
            pending: VecDeque::new(),
            io_timeout: None,
            poisoned: false,
        }
    }

    /// Bound every read and write by `limit`.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.io_timeout = limit;
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Messages received but not yet claimed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            Err(WireError::Closed)
        } else {
            Ok(())
        }
    }

    fn poison<T>(&mut self, err: WireError) -> Result<T> {
        self.poisoned = true;
        Err(err)
    }

    /// Mark the stream unusable after a peer broke the protocol.
    pub(crate) fn violation(&mut self, err: WireError) -> WireError {
        self.poisoned = true;
        err
    }

    /// Write one complete frame.
    pub async fn send(&mut self, code: u32, payload: &[u8]) -> Result<()> {
        self.check_usable()?;
        let frame = Message::new(code, payload).encode()?;
        let limit = self.io_timeout;
        let stream = &mut self.stream;
        let written = timed(limit, async {
            stream.write_all(&frame).await?;
            stream.flush().await
        })
        .await;
        match written {
            Ok(()) => {
                log_wire_debug!("Sent frame", code = code, len = payload.len());
                Ok(())
            }
            Err(e) => self.poison(e),
        }
    }

    pub async fn send_value<T: Serialize>(&mut self, code: u32, value: &T) -> Result<()> {
        let payload = bincode::serialize(value)?;
        self.send(code, &payload).await
    }

    /// Read once from the stream and queue every frame that completed.
    async fn fill(&mut self) -> Result<()> {
        self.check_usable()?;
        let mut chunk = vec![0u8; READ_CHUNK];
        let limit = self.io_timeout;
        let n = match timed(limit, self.stream.read(&mut chunk)).await {
            Ok(0) => return self.poison(WireError::Closed),
            Ok(n) => n,
            Err(e) => return self.poison(e),
        };
        match self.assembler.feed(&chunk[..n], &mut self.pending) {
            Ok(_) => Ok(()),
            Err(e) => self.poison(e),
        }
    }

    /// Oldest message with `code`, reading until one arrives.
    pub async fn receive(&mut self, code: u32) -> Result<Message> {
        loop {
            if let Some(pos) = self.pending.iter().position(|m| m.code == code) {
                if let Some(message) = self.pending.remove(pos) {
                    return Ok(message);
                }
            }
            self.fill().await?;
        }
    }

    /// Oldest message of any code.
    pub async fn receive_first(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }
            self.fill().await?;
        }
    }

    pub async fn receive_value<T: DeserializeOwned>(&mut self, code: u32) -> Result<T> {
        self.receive(code).await?.decode()
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        let limit = self.io_timeout;
        timed(limit, self.stream.shutdown()).await
    }
}
