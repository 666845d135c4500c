//! Direct filesystem execution of operations.
//!
//! Used by a [`Connection`](crate::Connection) whose target is this machine
//! and by session workers on behalf of remote callers. Identity-affecting
//! mutations are followed by reconciliation of the store they touched; paths
//! outside any store skip it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use oofs_config::{log_identity_debug, Config};
use oofs_config::path::normalize_lexical;
use oofs_identity::{
    ConflictPolicy, LockOptions, PastePolicy, Store, IDENTITY_FILE,
};
use oofs_wire::{DirEntry, FileKind, FileStat, Operation, Outcome};
use walkdir::WalkDir;

use crate::{OofsError, Result};

/// Result of executing one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub outcome: Outcome,
    /// Bytes produced by downloads (`ReadFile`, `Archive`)
    pub download: Option<Vec<u8>>,
}

impl Executed {
    fn outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            download: None,
        }
    }

    fn streamed(data: Vec<u8>) -> Self {
        Self {
            outcome: Outcome::Streamed {
                size: data.len() as u64,
            },
            download: Some(data),
        }
    }
}

/// Synchronous executor for operations against the local disk.
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    lock: LockOptions,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize_lexical(path))
    } else {
        Ok(normalize_lexical(std::env::current_dir()?.join(path)))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> OofsError + '_ {
    move |e| OofsError::from_io(e, path.display())
}

impl LocalFs {
    pub fn new(lock: LockOptions) -> Self {
        Self { lock }
    }

    /// Lock tuning from `[identity]`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(LockOptions {
            attempts: config.identity.lock_attempts,
            retry: config.identity.lock_retry(),
        })
    }

    fn store(&self, root: &Path) -> Result<Store> {
        Ok(Store::open(absolute(root)?).with_lock_options(self.lock))
    }

    /// Reconcile `path` in whatever store contains it.
    fn reconcile_at(&self, path: &Path, policy: ConflictPolicy) -> Result<()> {
        let Some(store) = Store::discover(path) else {
            log_identity_debug!("No store root above path, skipping reconcile");
            return Ok(());
        };
        store
            .with_lock_options(self.lock)
            .reconcile(path, true, policy)?;
        Ok(())
    }

    pub fn execute(&self, op: Operation) -> Result<Executed> {
        match op {
            Operation::Stat { path } => {
                let path = absolute(&path)?;
                let meta = fs::symlink_metadata(&path).map_err(io_err(&path))?;
                Ok(Executed::outcome(Outcome::Stat(FileStat::from_metadata(&meta))))
            }
            Operation::List { path } => {
                let path = absolute(&path)?;
                Ok(Executed::outcome(Outcome::Entries(list(&path)?)))
            }
            Operation::ReadFile { path } => {
                let path = absolute(&path)?;
                let data = fs::read(&path).map_err(io_err(&path))?;
                Ok(Executed::streamed(data))
            }
            Operation::WriteFile { path, data } => {
                let path = absolute(&path)?;
                fs::write(&path, &data).map_err(io_err(&path))?;
                if path.file_name().and_then(|n| n.to_str()) == Some(IDENTITY_FILE) {
                    if let Some(object) = path.parent() {
                        self.reconcile_at(object, ConflictPolicy::FavorTable)?;
                    }
                }
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::Copy { src, dst } => {
                let (src, dst) = (absolute(&src)?, absolute(&dst)?);
                copy_any(&src, &dst)?;
                self.reconcile_at(&dst, ConflictPolicy::FavorTable)?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::Compare { a, b } => {
                let (a, b) = (absolute(&a)?, absolute(&b)?);
                Ok(Executed::outcome(Outcome::Flag(same_bytes(&a, &b)?)))
            }
            Operation::Rename { from, to } => {
                let (from, to) = (absolute(&from)?, absolute(&to)?);
                fs::rename(&from, &to).map_err(io_err(&from))?;
                self.reconcile_at(&to, ConflictPolicy::FavorTable)?;
                self.reconcile_at(&from, ConflictPolicy::FavorTable)?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::Symlink { target, link } => {
                let link = absolute(&link)?;
                std::os::unix::fs::symlink(&target, &link).map_err(io_err(&link))?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::ReadLink { path } => {
                let path = absolute(&path)?;
                let target = fs::read_link(&path).map_err(io_err(&path))?;
                Ok(Executed::outcome(Outcome::Path(target)))
            }
            Operation::RealPath { path } => {
                let path = absolute(&path)?;
                let real = fs::canonicalize(&path).map_err(io_err(&path))?;
                Ok(Executed::outcome(Outcome::Path(real)))
            }
            Operation::MakeDir { path } => {
                let path = absolute(&path)?;
                fs::create_dir(&path).map_err(io_err(&path))?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::RemoveDir { path } => {
                let path = absolute(&path)?;
                fs::remove_dir(&path).map_err(io_err(&path))?;
                self.reconcile_at(&path, ConflictPolicy::FavorTable)?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::RemoveAll { path } => {
                let path = absolute(&path)?;
                let meta = fs::symlink_metadata(&path).map_err(io_err(&path))?;
                if meta.is_dir() {
                    fs::remove_dir_all(&path).map_err(io_err(&path))?;
                } else {
                    fs::remove_file(&path).map_err(io_err(&path))?;
                }
                self.reconcile_at(&path, ConflictPolicy::FavorTable)?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::Archive { path, recursive } => {
                let path = absolute(&path)?;
                if !path.is_dir() {
                    return Err(OofsError::NotFound(format!(
                        "{}: not a directory",
                        path.display()
                    )));
                }
                Ok(Executed::streamed(oofs_pack::pack(&path, recursive)?))
            }
            Operation::Dearchive { dest, archive } => {
                let dest = absolute(&dest)?;
                oofs_pack::unpack(&archive, &dest)?;
                self.reconcile_at(&dest, ConflictPolicy::FavorTable)?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::Paste {
                dest,
                archive,
                policy,
            } => {
                let dest = absolute(&dest)?;
                self.paste(&dest, &archive, policy)?;
                Ok(Executed::outcome(Outcome::Unit))
            }
            Operation::Prototype { path } => {
                let path = absolute(&path)?;
                Ok(Executed::outcome(Outcome::Flag(prototype(&path)?)))
            }
            Operation::GetUuid { root, path, create } => {
                let uuid = self.store(&root)?.get_uuid(&absolute(&path)?, create)?;
                Ok(Executed::outcome(Outcome::Uuid(uuid)))
            }
            Operation::LookupUuid { root, uuid } => {
                let found = self.store(&root)?.lookup_uuid(uuid)?;
                Ok(Executed::outcome(Outcome::MaybePath(found)))
            }
            Operation::Reconcile {
                root,
                scan,
                recursive,
                policy,
            } => {
                let log = self
                    .store(&root)?
                    .reconcile(&absolute(&scan)?, recursive, policy)?;
                Ok(Executed::outcome(Outcome::Audit(log)))
            }
            Operation::FixOofs { root, renumber } => {
                let log = self.store(&root)?.fix_oofs(renumber)?;
                Ok(Executed::outcome(Outcome::Audit(log)))
            }
        }
    }

    fn paste(&self, dest: &Path, archive: &[u8], policy: PastePolicy) -> Result<()> {
        if fs::symlink_metadata(dest).is_ok() {
            return Err(OofsError::AlreadyExists(dest.display().to_string()));
        }
        oofs_pack::unpack(archive, dest)?;
        match Store::discover(dest) {
            Some(store) => {
                store.with_lock_options(self.lock).adopt(dest, policy)?;
            }
            None => log_identity_debug!("Pasted outside any store, identities untouched"),
        }
        Ok(())
    }
}

fn list(path: &Path) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(io_err(path))? {
        let entry = entry?;
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind: FileKind::from_file_type(entry.file_type()?),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Copy a file, a symlink, or a whole directory tree. Symlinks are copied as
/// links.
fn copy_any(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(io_err(src))?;
    if !meta.is_dir() {
        return copy_entry(src, dst, &meta);
    }
    if dst.starts_with(src) {
        return Err(OofsError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("cannot copy {} into itself", src.display()),
        )));
    }
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| OofsError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| OofsError::Io(io::Error::other(e)))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            clear_link(&target)?;
            fs::create_dir_all(&target).map_err(io_err(&target))?;
        } else {
            let meta = entry.metadata().map_err(|e| OofsError::Io(e.into()))?;
            copy_entry(entry.path(), &target, &meta)?;
        }
    }
    Ok(())
}

/// Copy one non-directory entry. A link already at `dst` is replaced, never
/// written through.
fn copy_entry(src: &Path, dst: &Path, meta: &fs::Metadata) -> Result<()> {
    clear_link(dst)?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(src).map_err(io_err(src))?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst).map_err(io_err(dst))?;
        }
        std::os::unix::fs::symlink(target, dst).map_err(io_err(dst))?;
    } else {
        fs::copy(src, dst).map_err(io_err(src))?;
    }
    Ok(())
}

fn clear_link(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(path).map_err(io_err(path))
        }
        _ => Ok(()),
    }
}

fn same_bytes(a: &Path, b: &Path) -> Result<bool> {
    let (meta_a, meta_b) = (
        fs::metadata(a).map_err(io_err(a))?,
        fs::metadata(b).map_err(io_err(b))?,
    );
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(fs::read(a).map_err(io_err(a))? == fs::read(b).map_err(io_err(b))?)
}

/// Replace `path` with `../../<name>` when that file has identical bytes.
fn prototype(path: &Path) -> Result<bool> {
    let meta = fs::symlink_metadata(path).map_err(io_err(path))?;
    if !meta.is_file() {
        return Ok(false);
    }
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(false);
    };
    let relative = Path::new("..").join("..").join(name);
    // The link resolves from the directory it really sits in
    let real_dir = fs::canonicalize(dir).map_err(io_err(dir))?;
    let ancestor = normalize_lexical(real_dir.join(&relative));
    match fs::symlink_metadata(&ancestor) {
        Ok(m) if m.is_file() => {}
        _ => return Ok(false),
    }
    if !same_bytes(path, &ancestor)? {
        return Ok(false);
    }

    // Build the link beside the file, then swap it into place.
    let staged = path.with_file_name(format!(".{}.proto", name.to_string_lossy()));
    std::os::unix::fs::symlink(&relative, &staged).map_err(io_err(&staged))?;
    fs::rename(&staged, path).map_err(io_err(path))?;
    Ok(true)
}
