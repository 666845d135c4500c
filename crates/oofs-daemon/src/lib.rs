//! # oofs-daemon
//!
//! The `oofsd` session server. Each accepted TCP connection gets its own
//! worker task that owns the stream and its own copy of the permission table
//! until logout or disconnect.

mod permission;
pub mod server;
pub mod session;

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

pub use permission::{required_access, PathAccess};
pub use server::Server;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Session with {peer} failed: {reason}")]
    Session { peer: SocketAddr, reason: String },
}

pub type Result<T> = std::result::Result<T, DaemonError>;
