//! # oofs-remote
//!
//! Uniform access to OOFS stores on this machine or behind an `oofsd`.
//!
//! A [`Connection`] names a target and classifies it once: local targets run
//! through [`LocalFs`], remote ones go over the session protocol. Callers see
//! the same operations and the same [`OofsError`] taxonomy either way.

mod context;
mod error;
pub mod connection;
pub mod local;
pub mod twosided;

pub use connection::{classify, local_addresses, resolve, Connection, Locality, Target};
pub use context::{NoProgress, OpContext, ProgressSink};
pub use error::{OofsError, Result};
pub use local::{Executed, LocalFs};
pub use twosided::{compare_between, copy_between};
