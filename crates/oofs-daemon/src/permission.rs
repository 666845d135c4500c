use std::io;
use std::path::{Path, PathBuf};

use oofs_acl::{AccessTable, Mode};
use oofs_config::path::{normalize_lexical, resolve_links, resolve_links_at};
use oofs_identity::{ConflictPolicy, PastePolicy, Store};
use oofs_wire::{Failure, FailureKind, Operation};

/// One path an operation touches and the access it needs there.
///
/// Grants are tested against the path the kernel would actually reach, so
/// every symlink along `path` is resolved first. `follow` says whether a
/// link in the last component is followed too: operations that act on the
/// link itself (stat, rename, removal) leave it alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAccess {
    pub path: PathBuf,
    /// Directory a relative `path` is taken from, as for a symlink's target
    pub base: Option<PathBuf>,
    pub mode: Mode,
    pub follow: bool,
}

impl PathAccess {
    fn new(path: &Path, mode: Mode, follow: bool) -> Self {
        Self {
            path: path.to_path_buf(),
            base: None,
            mode,
            follow,
        }
    }

    fn read(path: &Path, follow: bool) -> Self {
        Self::new(path, Mode::READ, follow)
    }

    fn write(path: &Path, follow: bool) -> Self {
        Self::new(path, Mode::WRITE, follow)
    }

    /// `relative` as seen from inside `dir`.
    fn beside(dir: &Path, relative: &Path, mode: Mode) -> Self {
        Self {
            path: relative.to_path_buf(),
            base: Some(dir.to_path_buf()),
            mode,
            follow: true,
        }
    }

    /// The path as the caller named it.
    fn named(&self) -> PathBuf {
        match &self.base {
            Some(dir) => normalize_lexical(dir.join(&self.path)),
            None => normalize_lexical(&self.path),
        }
    }

    /// The path the kernel would reach, or None for a relative request.
    fn resolve(&self) -> io::Result<Option<PathBuf>> {
        match &self.base {
            Some(dir) if dir.is_absolute() => {
                resolve_links_at(normalize_lexical(dir), &self.path, self.follow).map(Some)
            }
            None if self.path.is_absolute() => resolve_links(&self.path, self.follow).map(Some),
            _ => Ok(None),
        }
    }
}

/// Paths an operation touches and the access each needs.
///
/// Copy reads its source and writes its destination; rename writes both
/// ends. Identity operations need write access when they may change the
/// tree, and write access on the store root when they let the tree
/// overrule its table.
pub fn required_access(op: &Operation) -> Vec<PathAccess> {
    use Operation::*;
    match op {
        Stat { path } | ReadLink { path } => vec![PathAccess::read(path, false)],
        List { path } | ReadFile { path } | RealPath { path } | Archive { path, .. } => {
            vec![PathAccess::read(path, true)]
        }
        Compare { a, b } => vec![PathAccess::read(a, true), PathAccess::read(b, true)],
        LookupUuid { root, .. } => vec![PathAccess::read(root, true)],
        GetUuid { path, create, .. } => {
            let mode = if *create { Mode::WRITE } else { Mode::READ };
            vec![PathAccess::new(path, mode, true)]
        }
        WriteFile { path, .. } | Dearchive { dest: path, .. } => {
            vec![PathAccess::write(path, true)]
        }
        MakeDir { path } | RemoveDir { path } | RemoveAll { path } => {
            vec![PathAccess::write(path, false)]
        }
        Prototype { path } => {
            let mut needed = vec![PathAccess::write(path, false)];
            if let (Some(dir), Some(name)) = (path.parent(), path.file_name()) {
                let ancestor = Path::new("..").join("..").join(name);
                needed.push(PathAccess::beside(dir, &ancestor, Mode::READ));
            }
            needed
        }
        Symlink { target, link } => {
            let mut needed = vec![PathAccess::write(link, false)];
            match link.parent() {
                Some(dir) => needed.push(PathAccess::beside(dir, target, Mode::WRITE)),
                None => needed.push(PathAccess::write(target, true)),
            }
            needed
        }
        Paste { dest, policy, .. } => {
            let mut needed = vec![PathAccess::write(dest, true)];
            if *policy == PastePolicy::Preserve {
                if let Some(store) = Store::discover(dest) {
                    needed.push(PathAccess::write(store.root(), true));
                }
            }
            needed
        }
        Reconcile {
            root, scan, policy, ..
        } => {
            let mut needed = vec![PathAccess::write(scan, true)];
            if *policy == ConflictPolicy::FavorTree {
                needed.push(PathAccess::write(root, true));
            }
            needed
        }
        FixOofs { root, .. } => vec![PathAccess::write(root, true)],
        Copy { src, dst } => vec![PathAccess::read(src, false), PathAccess::write(dst, false)],
        Rename { from, to } => vec![PathAccess::write(from, false), PathAccess::write(to, false)],
    }
}

/// Check every path `op` touches. Relative paths never match a rule, and a
/// path whose links cannot be resolved is refused.
pub(crate) fn authorize(acl: &AccessTable, login: &str, op: &Operation) -> Result<(), Failure> {
    for access in required_access(op) {
        let named = access.named();
        match access.resolve() {
            Ok(Some(real)) if acl.test(login, &real, access.mode) => {}
            Ok(Some(real)) if real != named => {
                return Err(denied(
                    login,
                    access.mode,
                    format!("{} (resolves to {})", named.display(), real.display()),
                ));
            }
            _ => return Err(denied(login, access.mode, named.display().to_string())),
        }
    }
    Ok(())
}

fn denied(login: &str, mode: Mode, what: String) -> Failure {
    Failure::new(
        FailureKind::AccessDenied,
        format!("{} may not {} {}", login, verb(mode), what),
    )
}

fn verb(mode: Mode) -> &'static str {
    if mode.write {
        "write"
    } else {
        "read"
    }
}
