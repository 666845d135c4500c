//! On-disk representation of objects: identity files, node (hyperlink) files
//! and the child container.
//!
//! ```text
//! /db/                    store root (holds .oofs_table)
//!   .oofs_uuid            {uuid} of the root object
//!   ext/
//!     rose/               child object
//!       .oofs_uuid
//!       ext/
//!         leaf/
//!           .oofs_node    {uuid} display name   (hyperlink)
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::{IdentityError, Result};

/// File holding an object's own UUID.
pub const IDENTITY_FILE: &str = ".oofs_uuid";
/// File making an object a hyperlink to another object's UUID.
pub const NODE_FILE: &str = ".oofs_node";
/// Directory under an object holding its children.
pub const CHILD_DIR: &str = "ext";

/// Parse `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`.
pub fn parse_braced(text: &str) -> Option<Uuid> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    Uuid::parse_str(inner).ok()
}

/// Render a UUID in the braced on-disk form.
pub fn format_braced(uuid: &Uuid) -> String {
    uuid.braced().to_string()
}

/// Read an object's identity file.
///
/// Returns `Ok(None)` when the object has no identity file (or is not a
/// directory at all).
pub fn read_identity(object: &Path) -> Result<Option<Uuid>> {
    let file = object.join(IDENTITY_FILE);
    if !file.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&file)?;
    let first = text.lines().next().unwrap_or("").trim();
    parse_braced(first)
        .map(Some)
        .ok_or_else(|| IdentityError::Corrupt {
            path: file,
            reason: format!("not a braced uuid: {:?}", first),
        })
}

pub fn write_identity(object: &Path, uuid: &Uuid) -> Result<()> {
    fs::write(object.join(IDENTITY_FILE), format!("{}\n", format_braced(uuid)))?;
    Ok(())
}

/// Delete an object's identity file. Returns whether one existed.
pub fn remove_identity(object: &Path) -> Result<bool> {
    match fs::remove_file(object.join(IDENTITY_FILE)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Contents of a node file: the referenced UUID and an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLink {
    pub uuid: Uuid,
    pub name: Option<String>,
}

impl NodeLink {
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: Some(name.into()),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let (token, rest) = match line.split_once(' ') {
            Some((token, rest)) => (token, Some(rest)),
            None => (line, None),
        };
        let uuid = parse_braced(token)?;
        let name = rest.map(str::to_string).filter(|n| !n.is_empty());
        Some(Self { uuid, name })
    }

    fn render(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}\n", format_braced(&self.uuid), name),
            None => format!("{}\n", format_braced(&self.uuid)),
        }
    }
}

pub fn read_node(object: &Path) -> Result<Option<NodeLink>> {
    let file = object.join(NODE_FILE);
    if !file.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&file)?;
    let first = text.lines().next().unwrap_or("").trim_end();
    NodeLink::parse(first)
        .map(Some)
        .ok_or_else(|| IdentityError::Corrupt {
            path: file,
            reason: format!("malformed node line: {:?}", first),
        })
}

pub fn write_node(object: &Path, link: &NodeLink) -> Result<()> {
    fs::write(object.join(NODE_FILE), link.render())?;
    Ok(())
}

/// Names of an object's children, sorted. Symlinks are not objects.
pub fn children(object: &Path) -> Result<Vec<String>> {
    let container = object.join(CHILD_DIR);
    let entries = match fs::read_dir(&container) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// True when `path` is a real directory (not a symlink to one).
pub fn is_object_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Iterative pre-order walk over an object tree.
///
/// Yields `(absolute path, store-relative path)` pairs, parents before
/// children and siblings in name order. Uses an explicit stack so deep trees
/// cannot exhaust the call stack.
pub struct ObjectWalk {
    stack: Vec<(PathBuf, String)>,
    recursive: bool,
}

impl ObjectWalk {
    pub fn new(start: PathBuf, start_rel: String, recursive: bool) -> Self {
        Self {
            stack: vec![(start, start_rel)],
            recursive,
        }
    }
}

impl Iterator for ObjectWalk {
    type Item = Result<(PathBuf, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (abs, rel) = self.stack.pop()?;
            if !is_object_dir(&abs) {
                continue;
            }
            if self.recursive {
                match children(&abs) {
                    Ok(names) => {
                        for name in names.into_iter().rev() {
                            let child_abs = abs.join(CHILD_DIR).join(&name);
                            let child_rel = format!("{}{}/{}/", rel, CHILD_DIR, name);
                            self.stack.push((child_abs, child_rel));
                        }
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(Ok((abs, rel)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identity_file_roundtrip_and_removal() {
        let temp = tempdir().unwrap();
        let uuid = Uuid::new_v4();

        assert_eq!(read_identity(temp.path()).unwrap(), None);
        write_identity(temp.path(), &uuid).unwrap();
        assert_eq!(read_identity(temp.path()).unwrap(), Some(uuid));

        let raw = fs::read_to_string(temp.path().join(IDENTITY_FILE)).unwrap();
        assert!(raw.starts_with('{') && raw.trim_end().ends_with('}'));

        assert!(remove_identity(temp.path()).unwrap());
        assert!(!remove_identity(temp.path()).unwrap());
    }

    #[test]
    fn test_corrupt_identity_is_reported() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join(IDENTITY_FILE), "not-a-uuid\n").unwrap();
        assert!(matches!(
            read_identity(temp.path()),
            Err(IdentityError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_node_file_with_and_without_name() {
        let temp = tempdir().unwrap();
        let uuid = Uuid::new_v4();

        write_node(temp.path(), &NodeLink::new(uuid, "Main Panel")).unwrap();
        let link = read_node(temp.path()).unwrap().unwrap();
        assert_eq!(link.uuid, uuid);
        assert_eq!(link.name.as_deref(), Some("Main Panel"));

        write_node(temp.path(), &NodeLink { uuid, name: None }).unwrap();
        assert_eq!(read_node(temp.path()).unwrap().unwrap().name, None);
    }

    #[test]
    fn test_walk_is_preorder_and_skips_plain_dirs() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("ext/b/ext/c")).unwrap();
        fs::create_dir_all(root.join("ext/a")).unwrap();
        // Not under the child container: never visited
        fs::create_dir_all(root.join("data/ignored")).unwrap();

        let rels: Vec<String> = ObjectWalk::new(root.to_path_buf(), "/".to_string(), true)
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(rels, vec!["/", "/ext/a/", "/ext/b/", "/ext/b/ext/c/"]);

        let shallow: Vec<String> = ObjectWalk::new(root.to_path_buf(), "/".to_string(), false)
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(shallow, vec!["/"]);
    }
}
