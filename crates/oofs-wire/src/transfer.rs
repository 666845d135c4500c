//! Chunked blob transfer on top of a [`Channel`].
//!
//! ```text
//! TRANSFER_ANNOUNCE  u64 total
//! TRANSFER_BLOCK     raw bytes      (repeated, each <= BLOCK_LEN)
//! TRANSFER_DONE      Result<(), Failure>
//! ```
//!
//! The receiver accepts exactly `total` bytes of blocks before it looks for
//! the completion message.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::message::opcode::{TRANSFER_ANNOUNCE, TRANSFER_BLOCK, TRANSFER_DONE};
use crate::ops::Failure;
use crate::{Channel, Result, WireError};

/// Largest block payload.
pub const BLOCK_LEN: usize = 64 * 1024;
/// Largest blob accepted in one transfer.
pub const MAX_BLOB_LEN: u64 = 1 << 30;

/// Receive buffer reserved before any block arrives.
const INITIAL_CAPACITY: u64 = 16 * BLOCK_LEN as u64;

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send `data` as announce, blocks, done. `progress` sees
    /// `(sent, total)` after every block.
    pub async fn send_blob(
        &mut self,
        data: &[u8],
        progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<()> {
        let total = data.len() as u64;
        if total > MAX_BLOB_LEN {
            return Err(WireError::FrameTooLarge {
                len: total,
                max: MAX_BLOB_LEN,
            });
        }
        self.send_value(TRANSFER_ANNOUNCE, &total).await?;
        let mut sent = 0u64;
        for block in data.chunks(BLOCK_LEN) {
            self.send(TRANSFER_BLOCK, block).await?;
            sent += block.len() as u64;
            progress(sent, total);
        }
        let done: std::result::Result<(), Failure> = Ok(());
        self.send_value(TRANSFER_DONE, &done).await
    }

    /// Receive one blob sent by [`Channel::send_blob`].
    pub async fn receive_blob(
        &mut self,
        progress: &mut (dyn FnMut(u64, u64) + Send),
    ) -> Result<Vec<u8>> {
        let total: u64 = self.receive_value(TRANSFER_ANNOUNCE).await?;
        if total > MAX_BLOB_LEN {
            return Err(self.violation(WireError::FrameTooLarge {
                len: total,
                max: MAX_BLOB_LEN,
            }));
        }

        // Grow with the data rather than trusting the announcement up front
        let mut data = Vec::with_capacity(total.min(INITIAL_CAPACITY) as usize);
        while (data.len() as u64) < total {
            let block = self.receive(TRANSFER_BLOCK).await?;
            if block.payload.is_empty() || block.payload.len() > BLOCK_LEN {
                return Err(self.violation(WireError::Protocol(format!(
                    "transfer block of {} bytes",
                    block.payload.len()
                ))));
            }
            if (data.len() + block.payload.len()) as u64 > total {
                return Err(self.violation(WireError::Protocol(format!(
                    "transfer overruns announced {} bytes",
                    total
                ))));
            }
            data.extend_from_slice(&block.payload);
            progress(data.len() as u64, total);
        }

        let done: std::result::Result<(), Failure> = self.receive_value(TRANSFER_DONE).await?;
        done.map_err(WireError::Aborted)?;
        Ok(data)
    }
}

/// Progress callback that ignores updates.
pub fn no_progress() -> impl FnMut(u64, u64) + Send {
    |_, _| {}
}
