//! # oofs-pack
//!
//! Archive stream for moving object subtrees as one sized blob.
//!
//! ## Stream Format
//!
//! ```text
//! +----------------+
//! | Magic (8B)     |  "OOFSPACK"
//! | Version (4B)   |  u32 LE
//! +----------------+
//! | Markers        |  until end of stream
//! +----------------+
//!
//! 'D' name                       enter directory
//! 'U'                            leave directory
//! 'F' name mode:u32 size:u64 ..  regular file
//! 'L' name target                symbolic link
//! ```
//!
//! Names and link targets are u16-length-prefixed UTF-8. Names may not
//! contain `/` or be `.`/`..`, so an archive can never write outside its
//! destination.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Magic bytes for archive identification
const PACK_MAGIC: &[u8; 8] = b"OOFSPACK";
/// Current archive format version
const PACK_VERSION: u32 = 1;

const MARK_ENTER: u8 = b'D';
const MARK_LEAVE: u8 = b'U';
const MARK_FILE: u8 = b'F';
const MARK_LINK: u8 = b'L';

#[derive(Error, Debug)]
pub enum PackError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Invalid archive: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PackError>;

/// What an unpack created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackStats {
    pub dirs: u64,
    pub files: u64,
    pub links: u64,
    pub bytes: u64,
}

struct PackWriter {
    out: Vec<u8>,
}

impl PackWriter {
    fn new() -> Self {
        let mut out = Vec::with_capacity(4096);
        out.extend_from_slice(PACK_MAGIC);
        out.extend_from_slice(&PACK_VERSION.to_le_bytes());
        Self { out }
    }

    fn text(&mut self, text: &str) -> Result<()> {
        let len = u16::try_from(text.len())
            .map_err(|_| PackError::Invalid(format!("name too long: {}", text)))?;
        self.out.extend_from_slice(&len.to_le_bytes());
        self.out.extend_from_slice(text.as_bytes());
        Ok(())
    }

    fn enter(&mut self, name: &str) -> Result<()> {
        self.out.push(MARK_ENTER);
        self.text(name)
    }

    fn leave(&mut self) {
        self.out.push(MARK_LEAVE);
    }

    fn file(&mut self, name: &str, mode: u32, data: &[u8]) -> Result<()> {
        self.out.push(MARK_FILE);
        self.text(name)?;
        self.out.extend_from_slice(&mode.to_le_bytes());
        self.out.extend_from_slice(&(data.len() as u64).to_le_bytes());
        self.out.extend_from_slice(data);
        Ok(())
    }

    fn link(&mut self, name: &str, target: &str) -> Result<()> {
        self.out.push(MARK_LINK);
        self.text(name)?;
        self.text(target)
    }
}

fn utf8_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PackError::Invalid(format!("non UTF-8 name: {}", path.display())))
}

/// Archive the contents of `dir`.
///
/// Without `recursive` only the files and links directly inside `dir` are
/// included.
pub fn pack(dir: &Path, recursive: bool) -> Result<Vec<u8>> {
    let mut writer = PackWriter::new();
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut open = 0usize;

    let walk = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walk {
        let entry = entry?;
        while open >= entry.depth() {
            writer.leave();
            open -= 1;
        }

        let name = utf8_name(entry.path())?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            if recursive {
                writer.enter(name)?;
                open += 1;
            }
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            let target = target
                .to_str()
                .ok_or_else(|| PackError::Invalid(format!("non UTF-8 link target in {}", name)))?;
            writer.link(name, target)?;
        } else if file_type.is_file() {
            let mode = entry.metadata()?.permissions().mode() & 0o7777;
            let data = fs::read(entry.path())?;
            writer.file(name, mode, &data)?;
        } else {
            tracing::debug!(path = %entry.path().display(), "Skipping special file");
        }
    }
    while open > 0 {
        writer.leave();
        open -= 1;
    }
    Ok(writer.out)
}

struct PackReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PackReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| PackError::Invalid(format!("truncated at offset {}", self.pos)))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn text(&mut self) -> Result<&'a str> {
        let len = self.u16()? as usize;
        std::str::from_utf8(self.take(len)?)
            .map_err(|_| PackError::Invalid(format!("non UTF-8 text at offset {}", self.pos)))
    }

    fn name(&mut self) -> Result<&'a str> {
        let name = self.text()?;
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(PackError::Invalid(format!("illegal entry name {:?}", name)));
        }
        Ok(name)
    }

    fn done(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Remove a non-directory entry so it can be replaced.
fn clear_slot(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Err(PackError::Invalid(format!(
            "{} is a directory",
            path.display()
        ))),
        Ok(_) => Ok(fs::remove_file(path)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Recreate an archive's contents under `dest`, creating `dest` if needed.
/// Existing files and links with the same names are replaced.
pub fn unpack(bytes: &[u8], dest: &Path) -> Result<UnpackStats> {
    let mut reader = PackReader { data: bytes, pos: 0 };
    if reader.take(PACK_MAGIC.len())? != PACK_MAGIC {
        return Err(PackError::Invalid("Bad magic bytes".to_string()));
    }
    let version = reader.u32()?;
    if version != PACK_VERSION {
        return Err(PackError::Invalid(format!("Unsupported version: {}", version)));
    }

    fs::create_dir_all(dest)?;
    let mut stats = UnpackStats::default();
    let mut stack: Vec<PathBuf> = vec![dest.to_path_buf()];

    while !reader.done() {
        let marker = reader.take(1)?[0];
        // The stack always holds at least `dest`
        let cwd = stack.last().cloned().unwrap_or_else(|| dest.to_path_buf());
        match marker {
            MARK_ENTER => {
                let dir = cwd.join(reader.name()?);
                match fs::symlink_metadata(&dir) {
                    Ok(meta) if meta.is_dir() => {}
                    Ok(_) => {
                        fs::remove_file(&dir)?;
                        fs::create_dir(&dir)?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&dir)?,
                    Err(e) => return Err(e.into()),
                }
                stats.dirs += 1;
                stack.push(dir);
            }
            MARK_LEAVE => {
                if stack.len() == 1 {
                    return Err(PackError::Invalid("unbalanced directory exit".to_string()));
                }
                stack.pop();
            }
            MARK_FILE => {
                let path = cwd.join(reader.name()?);
                let mode = reader.u32()?;
                let size = reader.u64()?;
                let size = usize::try_from(size)
                    .map_err(|_| PackError::Invalid(format!("file size {} too large", size)))?;
                let data = reader.take(size)?;
                clear_slot(&path)?;
                fs::write(&path, data)?;
                fs::set_permissions(&path, fs::Permissions::from_mode(mode & 0o7777))?;
                stats.files += 1;
                stats.bytes += data.len() as u64;
            }
            MARK_LINK => {
                let path = cwd.join(reader.name()?);
                let target = reader.text()?;
                clear_slot(&path)?;
                std::os::unix::fs::symlink(target, &path)?;
                stats.links += 1;
            }
            other => {
                return Err(PackError::Invalid(format!(
                    "unknown marker 0x{:02x} at offset {}",
                    other,
                    reader.pos - 1
                )));
            }
        }
    }

    if stack.len() != 1 {
        return Err(PackError::Invalid("unterminated directory".to_string()));
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut out = PACK_MAGIC.to_vec();
        out.extend_from_slice(&PACK_VERSION.to_le_bytes());
        out
    }

    #[test]
    fn test_empty_archive_is_header_only() {
        let temp = tempfile::TempDir::new().unwrap();
        let bytes = pack(temp.path(), true).unwrap();
        assert_eq!(bytes, header());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = unpack(b"NOTAPACK\x01\0\0\0", temp.path()).unwrap_err();
        assert!(matches!(err, PackError::Invalid(_)));
    }

    #[test]
    fn test_rejects_parent_escape() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut writer = PackWriter::new();
        writer.file("..", 0o644, b"x").unwrap();
        let err = unpack(&writer.out, &temp.path().join("dest")).unwrap_err();
        assert!(matches!(err, PackError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unbalanced_markers() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut leave_only = header();
        leave_only.push(MARK_LEAVE);
        assert!(unpack(&leave_only, temp.path()).is_err());

        let mut writer = PackWriter::new();
        writer.enter("open").unwrap();
        assert!(unpack(&writer.out, temp.path()).is_err());
    }

    #[test]
    fn test_rejects_truncated_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut writer = PackWriter::new();
        writer.file("a", 0o644, b"hello").unwrap();
        let cut = &writer.out[..writer.out.len() - 2];
        assert!(matches!(unpack(cut, temp.path()), Err(PackError::Invalid(_))));
    }
}
