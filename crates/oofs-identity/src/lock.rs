//! Cross-process table lock.
//!
//! A uniquely named placeholder holding `pid nonce` is written next to the
//! table and then linked onto the fixed lock name. The link either creates
//! the lock name or fails because it exists, so it is the single race-free
//! decision point. Release deletes the lock file. A lock whose recorded pid
//! is no longer running is removed by one reclaimer, then acquisition
//! retries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use oofs_config::{log_identity_debug, log_identity_warn};
use tracing::field::display;

use crate::uuidgen;
use crate::{IdentityError, Result};

/// Name of the lock file in a store root.
pub const LOCK_FILE: &str = ".oofs_table.lock";

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub attempts: u32,
    pub retry: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            attempts: 50,
            retry: Duration::from_millis(100),
        }
    }
}

/// Held table lock; released on drop.
#[derive(Debug)]
pub struct TableLock {
    path: PathBuf,
    owner: String,
}

impl TableLock {
    pub fn acquire(lock_path: &Path, options: LockOptions) -> Result<Self> {
        let nonce = uuidgen::generate().simple().to_string();
        let owner = format!("{} {}\n", std::process::id(), nonce);
        let placeholder = sibling(lock_path, &nonce);
        fs::write(&placeholder, &owner)?;

        let outcome = Self::contend(&placeholder, lock_path, options);
        if let Err(e) = fs::remove_file(&placeholder) {
            log_identity_debug!("Failed to remove lock placeholder", error = display(&e));
        }

        match outcome {
            Ok(true) => Ok(Self {
                path: lock_path.to_path_buf(),
                owner,
            }),
            Ok(false) => Err(IdentityError::LockTimeout {
                path: lock_path.to_path_buf(),
                attempts: options.attempts,
            }),
            Err(e) => Err(e),
        }
    }

    fn contend(placeholder: &Path, lock_path: &Path, options: LockOptions) -> Result<bool> {
        for _ in 0..options.attempts.max(1) {
            match fs::hard_link(placeholder, lock_path) {
                Ok(()) => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if reclaim_if_dead(lock_path)? {
                        continue;
                    }
                    std::thread::sleep(options.retry);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TableLock {
    fn drop(&mut self) {
        // Only remove the lock if it is still ours.
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents == self.owner => {
                if let Err(e) = fs::remove_file(&self.path) {
                    log_identity_warn!("Failed to release table lock", path = display(self.path.display()), error = display(&e));
                }
            }
            Ok(_) => {
                log_identity_warn!("Table lock was taken over; not removing", path = display(self.path.display()));
            }
            Err(e) => {
                log_identity_warn!("Table lock vanished before release", path = display(self.path.display()), error = display(&e));
            }
        }
    }
}

fn sibling(lock_path: &Path, tag: &str) -> PathBuf {
    let name = lock_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| LOCK_FILE.to_string());
    lock_path.with_file_name(format!("{}.{}", name, tag))
}

fn parse_owner(contents: &str) -> Option<i32> {
    contents.split_whitespace().next()?.parse().ok()
}

fn owner_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM: the process exists but belongs to someone else
        Err(_) => true,
    }
}

/// Remove `lock_path` if its owner is dead. Returns true when the caller
/// should retry immediately.
fn reclaim_if_dead(lock_path: &Path) -> Result<bool> {
    let contents = match fs::read_to_string(lock_path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    let Some(pid) = parse_owner(&contents) else {
        return Ok(false);
    };
    if owner_alive(pid) {
        return Ok(false);
    }
    remove_stale(lock_path, &contents)
}

/// Delete the lock instance whose contents are `stale`, if it is still the
/// one in place.
///
/// Reclaimers of one instance contend for a guard named after that
/// instance's contents; only the guard holder may delete it. Lock contents
/// are never reused, so once the instance is gone a late reclaimer finds
/// different contents and leaves the new lock alone. A guard left behind
/// by a crashed reclaimer blocks reclamation of that instance, and
/// acquisition then times out.
fn remove_stale(lock_path: &Path, stale: &str) -> Result<bool> {
    let tag = blake3::hash(stale.as_bytes()).to_hex();
    let guard = sibling(lock_path, &format!("reclaim.{}", &tag.as_str()[..16]));
    let claim = sibling(lock_path, &format!("claim.{}", uuidgen::generate().simple()));
    fs::write(&claim, format!("{}\n", std::process::id()))?;
    let won = fs::hard_link(&claim, &guard);
    if let Err(e) = fs::remove_file(&claim) {
        log_identity_debug!("Failed to remove reclaim placeholder", error = display(&e));
    }
    match won {
        Ok(()) => {}
        // Another process is reclaiming this instance
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    let removed = match fs::read_to_string(lock_path) {
        Ok(current) if current == stale => fs::remove_file(lock_path).map(|()| true),
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    };
    if let Err(e) = fs::remove_file(&guard) {
        log_identity_debug!("Failed to remove reclaim guard", error = display(&e));
    }
    if removed? {
        log_identity_warn!("Reclaimed table lock from dead owner");
    }
    Ok(true)
}
