use std::io;

use oofs_identity::IdentityError;
use oofs_pack::PackError;
use oofs_wire::{Failure, FailureKind, WireError};
use thiserror::Error;

/// Every failure an operation can report.
///
/// Only [`OofsError::Transport`] is worth retrying: the next call reconnects.
/// Everything else is a definite answer from the filesystem or the worker.
#[derive(Error, Debug)]
pub enum OofsError {
    #[error("Transport error: {0}")]
    Transport(#[source] WireError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Corrupt data: {0}")]
    Corrupt(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Cannot resolve host {0}")]
    Unresolvable(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OofsError>;

impl OofsError {
    pub fn is_transport(&self) -> bool {
        matches!(self, OofsError::Transport(_))
    }

    /// Classify an I/O error that happened while touching `context`.
    pub fn from_io(err: io::Error, context: impl std::fmt::Display) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => OofsError::NotFound(format!("{}: {}", context, err)),
            io::ErrorKind::PermissionDenied => {
                OofsError::AccessDenied(format!("{}: {}", context, err))
            }
            io::ErrorKind::AlreadyExists => {
                OofsError::AlreadyExists(format!("{}: {}", context, err))
            }
            io::ErrorKind::InvalidData => OofsError::Corrupt(format!("{}: {}", context, err)),
            _ => OofsError::Io(io::Error::new(err.kind(), format!("{}: {}", context, err))),
        }
    }

    /// Serializable form sent back by a session worker.
    pub fn to_failure(&self) -> Failure {
        let kind = match self {
            OofsError::AccessDenied(_) => FailureKind::AccessDenied,
            OofsError::NotFound(_) => FailureKind::NotFound,
            OofsError::AlreadyExists(_) => FailureKind::AlreadyExists,
            OofsError::Corrupt(_) => FailureKind::Corrupt,
            OofsError::ResourceExhausted(_) => FailureKind::ResourceExhausted,
            OofsError::Protocol(_) => FailureKind::Protocol,
            OofsError::Transport(_)
            | OofsError::Unresolvable(_)
            | OofsError::Io(_)
            | OofsError::Config(_) => FailureKind::Io,
        };
        let message = match self {
            OofsError::AccessDenied(m)
            | OofsError::NotFound(m)
            | OofsError::AlreadyExists(m)
            | OofsError::Corrupt(m)
            | OofsError::ResourceExhausted(m)
            | OofsError::Protocol(m) => m.clone(),
            other => other.to_string(),
        };
        Failure::new(kind, message)
    }
}

impl From<Failure> for OofsError {
    fn from(failure: Failure) -> Self {
        let Failure { kind, message } = failure;
        match kind {
            FailureKind::AccessDenied => OofsError::AccessDenied(message),
            FailureKind::NotFound => OofsError::NotFound(message),
            FailureKind::AlreadyExists => OofsError::AlreadyExists(message),
            FailureKind::Corrupt => OofsError::Corrupt(message),
            FailureKind::ResourceExhausted => OofsError::ResourceExhausted(message),
            FailureKind::Protocol => OofsError::Protocol(message),
            FailureKind::Io => OofsError::Io(io::Error::other(message)),
        }
    }
}

impl From<WireError> for OofsError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Aborted(failure) => failure.into(),
            other => OofsError::Transport(other),
        }
    }
}

impl From<IdentityError> for OofsError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Io(e) => OofsError::Io(e),
            e @ IdentityError::LockTimeout { .. } => OofsError::ResourceExhausted(e.to_string()),
            e @ IdentityError::Corrupt { .. } => OofsError::Corrupt(e.to_string()),
            e @ IdentityError::OutsideRoot { .. } => OofsError::NotFound(e.to_string()),
            e @ IdentityError::NotAnObject(_) => OofsError::NotFound(e.to_string()),
        }
    }
}

impl From<PackError> for OofsError {
    fn from(err: PackError) -> Self {
        match err {
            PackError::Io(e) => OofsError::Io(e),
            e @ PackError::Invalid(_) => OofsError::Corrupt(e.to_string()),
            PackError::Walk(e) => match e.into_io_error() {
                Some(io) => OofsError::Io(io),
                None => OofsError::Io(io::Error::other("filesystem loop while archiving")),
            },
        }
    }
}
