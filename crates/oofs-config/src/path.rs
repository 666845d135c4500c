//! Path normalization utilities shared by the client, the worker and the
//! permission engine.
//!
//! Paths received over the wire are untrusted; they are normalized lexically
//! before any prefix comparison so that `..` cannot climb out of a granted
//! subtree, and symlinks are resolved so that a link cannot point out of it
//! either.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Symlinks followed while resolving one path before giving up.
pub const MAX_LINK_HOPS: usize = 40;

/// Normalize a path without touching the filesystem.
///
/// Removes `.` components and resolves `..` against the preceding component.
/// `..` at the root of an absolute path is dropped; for relative paths a
/// leading `..` is kept.
///
/// # Example
/// ```
/// use oofs_config::path::normalize_lexical;
/// assert_eq!(normalize_lexical("/a/./b/../c"), std::path::PathBuf::from("/a/c"));
/// assert_eq!(normalize_lexical("/../etc"), std::path::PathBuf::from("/etc"));
/// ```
pub fn normalize_lexical(path: impl AsRef<Path>) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}

/// True when `prefix` names `path` itself or one of its ancestors.
///
/// Comparison is per component, so `/a/b` is not a prefix of `/a/bc`.
pub fn is_component_prefix(prefix: impl AsRef<Path>, path: impl AsRef<Path>) -> bool {
    path.as_ref().starts_with(prefix.as_ref())
}

/// Strip a prefix from a path safely.
///
/// Returns the relative portion after the prefix, or None if the path
/// doesn't start with the prefix.
pub fn strip_prefix_safe(path: impl AsRef<Path>, prefix: impl AsRef<Path>) -> Option<PathBuf> {
    path.as_ref()
        .strip_prefix(prefix.as_ref())
        .ok()
        .map(|p| p.to_path_buf())
}

/// Where the kernel would land when opening `path`.
///
/// `path` is normalized lexically first, then every symlink along it is
/// replaced by its target. Unlike [`fs::canonicalize`] the path need not
/// exist: resolution stops at the first component that cannot be inspected
/// and the rest is appended as is. The final component is only followed when
/// `follow_last` is set. Relative paths are resolved against `/`.
pub fn resolve_links(path: impl AsRef<Path>, follow_last: bool) -> io::Result<PathBuf> {
    let pending = names(&normalize_lexical(path)).collect();
    walk(PathBuf::from("/"), pending, follow_last)
}

/// Resolve `relative` the way a symlink stored in `dir` would see it.
///
/// `dir` is resolved completely first. `relative` is then walked as is, so a
/// `..` after a link climbs out of the link's target, as the kernel does.
/// An absolute `relative` ignores `dir`.
pub fn resolve_links_at(
    dir: impl AsRef<Path>,
    relative: impl AsRef<Path>,
    follow_last: bool,
) -> io::Result<PathBuf> {
    let relative = relative.as_ref();
    let base = if relative.is_absolute() {
        PathBuf::from("/")
    } else {
        resolve_links(dir, true)?
    };
    walk(base, names(relative).collect(), follow_last)
}

fn walk(
    mut resolved: PathBuf,
    mut pending: VecDeque<OsString>,
    follow_last: bool,
) -> io::Result<PathBuf> {
    let mut hops = 0;

    while let Some(name) = pending.pop_front() {
        if name == ".." {
            resolved.pop();
            continue;
        }
        let candidate = resolved.join(&name);
        let follow = follow_last || !pending.is_empty();
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if follow && meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("too many levels of symbolic links at {}", candidate.display()),
                    ));
                }
                let target = fs::read_link(&candidate)?;
                if target.is_absolute() {
                    resolved = PathBuf::from("/");
                }
                for part in names(&target).collect::<Vec<_>>().into_iter().rev() {
                    pending.push_front(part);
                }
            }
            Ok(_) => resolved = candidate,
            Err(_) => {
                // Nothing below an entry we cannot see is a link we could follow
                resolved = candidate;
                for rest in pending.drain(..) {
                    if rest == ".." {
                        resolved.pop();
                    } else {
                        resolved.push(rest);
                    }
                }
            }
        }
    }
    Ok(resolved)
}

/// Normal and `..` components as owned names; `.` and the root are dropped.
fn names(path: &Path) -> impl Iterator<Item = OsString> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name.to_os_string()),
        Component::ParentDir => Some(OsString::from("..")),
        _ => None,
    })
}
