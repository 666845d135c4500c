//! # oofs-identity
//!
//! UUID identities for OOFS objects and the per-store identity table that
//! indexes them.
//!
//! ## Model
//!
//! - An *object* is a directory; its children live under `ext/`.
//! - An object owning `.oofs_uuid` has an identity.
//! - An object owning `.oofs_node` is a hyperlink to the object whose
//!   identity matches.
//! - The store root holds `.oofs_table`, the UUID → path index. It is only
//!   rewritten while holding the table lock (`.oofs_table.lock`).
//!
//! [`Store::reconcile`] repairs the table against the tree; [`Store::fix_oofs`]
//! additionally garbage-collects identities nothing links to.

pub mod lock;
pub mod object;
mod reconcile;
pub mod table;
pub mod uuidgen;

pub use oofs_types::{Action, AuditLog, ConflictPolicy, PastePolicy};
pub use lock::{LockOptions, TableLock, LOCK_FILE};
pub use object::{NodeLink, CHILD_DIR, IDENTITY_FILE, NODE_FILE};
pub use table::{IdentityTable, TableEntry, TABLE_FILE};

use std::path::{Component, Path, PathBuf};

use oofs_config::path::{normalize_lexical, strip_prefix_safe};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table lock {path} not acquired after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("Corrupt identity data in {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("{path} is outside store root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Not an object directory: {0}")]
    NotAnObject(PathBuf),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// One object store, identified by its root directory.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    lock_options: LockOptions,
}

impl Store {
    /// Open the store rooted at `root`. Nothing is touched on disk.
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            root: normalize_lexical(root),
            lock_options: LockOptions::default(),
        }
    }

    /// Open a store and make sure its table file exists.
    pub fn init(root: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open(root);
        if !store.table_path().exists() {
            IdentityTable::default().save(&store.table_path())?;
        }
        Ok(store)
    }

    /// Find the store containing `path`: the nearest ancestor (inclusive)
    /// holding a table file.
    pub fn discover(path: impl AsRef<Path>) -> Option<Self> {
        let path = normalize_lexical(path);
        path.ancestors()
            .find(|dir| dir.join(TABLE_FILE).is_file())
            .map(Self::open)
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn table_path(&self) -> PathBuf {
        self.root.join(TABLE_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Acquire the table lock with this store's retry settings.
    pub fn lock(&self) -> Result<TableLock> {
        TableLock::acquire(&self.lock_path(), self.lock_options)
    }

    /// Store-relative form of `path`: `/` for the root, `/ext/rose/` below.
    pub fn relative(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = normalize_lexical(path);
        let rel = strip_prefix_safe(&path, &self.root).ok_or_else(|| IdentityError::OutsideRoot {
            path: path.clone(),
            root: self.root.clone(),
        })?;
        let mut out = String::from("/");
        for component in rel.components() {
            if let Component::Normal(name) = component {
                out.push_str(&name.to_string_lossy());
                out.push('/');
            }
        }
        Ok(out)
    }

    /// Absolute path of a store-relative path.
    pub fn absolute(&self, rel: &str) -> PathBuf {
        let trimmed = rel.trim_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }

    /// Snapshot of the table, read under the lock.
    pub fn table(&self) -> Result<IdentityTable> {
        let _guard = self.lock()?;
        IdentityTable::load(&self.table_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_relative_and_absolute() {
        let store = Store::open("/db");
        assert_eq!(store.relative("/db").unwrap(), "/");
        assert_eq!(store.relative("/db/ext/rose").unwrap(), "/ext/rose/");
        assert_eq!(store.relative("/db/ext/rose/").unwrap(), "/ext/rose/");
        assert_eq!(store.absolute("/ext/rose/"), PathBuf::from("/db/ext/rose"));
        assert_eq!(store.absolute("/"), PathBuf::from("/db"));
        assert!(matches!(
            store.relative("/elsewhere"),
            Err(IdentityError::OutsideRoot { .. })
        ));
        // `..` cannot escape the root lexically
        assert!(store.relative("/db/../etc").is_err());
    }

    #[test]
    fn test_discover_finds_nearest_table() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("db");
        std::fs::create_dir_all(root.join("ext/rose")).unwrap();
        assert!(Store::discover(root.join("ext/rose")).is_none());

        Store::init(&root).unwrap();
        let store = Store::discover(root.join("ext/rose")).unwrap();
        assert_eq!(store.root(), root.as_path());
    }
}
