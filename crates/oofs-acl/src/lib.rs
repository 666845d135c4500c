//! # oofs-acl
//!
//! Longest-prefix access control for OOFS session workers.
//!
//! ## Permission File
//!
//! ```text
//! all::
//! :1:0:/db
//! bob:b3$<salt>$<hash>:
//! :1:1:/db/ext/bob
//! ```
//!
//! A line with a non-empty first field opens a subject block
//! (`login:password-hash:`); the lines below it with an empty first field
//! are that subject's rules (`:read:write:/prefix`). Subject `all` holds
//! the wildcard rules that apply to every login.
//!
//! ## Evaluation
//!
//! Among the wildcard rules and the login's own rules whose prefix covers
//! the target path (component-wise), the longest prefix wins. On a tie the
//! login's own rule wins. No matching rule denies.

mod mode;
mod password;
mod table;

pub use mode::Mode;
pub use password::{hash_password, verify_password};
pub use table::{AccessTable, Rule, Subject, WILDCARD};

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading a permission file.
#[derive(Error, Debug)]
pub enum AclError {
    #[error("Cannot read permission file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Permission file line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Cannot create permission file: {0}")]
    Create(#[from] AdminError),
}

/// Outcome of an administrative edit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("No such {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    Duplicate(String),

    #[error("Malformed mode {0:?} (expected r, w, rw or -)")]
    MalformedMode(String),

    #[error("Failed to persist permission file: {0}")]
    PersistFailed(String),
}

pub type Result<T> = std::result::Result<T, AclError>;
