//! Operation vocabulary shared by the client and the session worker.

use std::fmt;
use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use oofs_types::{AuditLog, ConflictPolicy, PastePolicy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::opcode;

/// One filesystem or identity operation and its arguments.
///
/// Byte payloads of uploads (`WriteFile`, `Dearchive`, `Paste`) travel as a
/// chunked blob after the request, not inside it; see
/// [`Operation::take_upload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Stat { path: PathBuf },
    List { path: PathBuf },
    ReadFile { path: PathBuf },
    WriteFile { path: PathBuf, data: Vec<u8> },
    Copy { src: PathBuf, dst: PathBuf },
    Compare { a: PathBuf, b: PathBuf },
    Rename { from: PathBuf, to: PathBuf },
    Symlink { target: PathBuf, link: PathBuf },
    ReadLink { path: PathBuf },
    RealPath { path: PathBuf },
    MakeDir { path: PathBuf },
    RemoveDir { path: PathBuf },
    RemoveAll { path: PathBuf },
    Archive { path: PathBuf, recursive: bool },
    Dearchive { dest: PathBuf, archive: Vec<u8> },
    Paste {
        dest: PathBuf,
        archive: Vec<u8>,
        policy: PastePolicy,
    },
    Prototype { path: PathBuf },
    GetUuid {
        root: PathBuf,
        path: PathBuf,
        create: bool,
    },
    LookupUuid { root: PathBuf, uuid: Uuid },
    Reconcile {
        root: PathBuf,
        scan: PathBuf,
        recursive: bool,
        policy: ConflictPolicy,
    },
    FixOofs { root: PathBuf, renumber: bool },
}

impl Operation {
    /// Request code of this operation.
    pub fn opcode(&self) -> u32 {
        match self {
            Operation::Stat { .. } => opcode::STAT,
            Operation::List { .. } => opcode::LIST,
            Operation::ReadFile { .. } => opcode::READ_FILE,
            Operation::WriteFile { .. } => opcode::WRITE_FILE,
            Operation::Copy { .. } => opcode::COPY,
            Operation::Compare { .. } => opcode::COMPARE,
            Operation::Rename { .. } => opcode::RENAME,
            Operation::Symlink { .. } => opcode::SYMLINK,
            Operation::ReadLink { .. } => opcode::READ_LINK,
            Operation::RealPath { .. } => opcode::REAL_PATH,
            Operation::MakeDir { .. } => opcode::MAKE_DIR,
            Operation::RemoveDir { .. } => opcode::REMOVE_DIR,
            Operation::RemoveAll { .. } => opcode::REMOVE_ALL,
            Operation::Archive { .. } => opcode::ARCHIVE,
            Operation::Dearchive { .. } => opcode::DEARCHIVE,
            Operation::Paste { .. } => opcode::PASTE,
            Operation::Prototype { .. } => opcode::PROTOTYPE,
            Operation::GetUuid { .. } => opcode::GET_UUID,
            Operation::LookupUuid { .. } => opcode::LOOKUP_UUID,
            Operation::Reconcile { .. } => opcode::RECONCILE,
            Operation::FixOofs { .. } => opcode::FIX_OOFS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Stat { .. } => "stat",
            Operation::List { .. } => "list",
            Operation::ReadFile { .. } => "read",
            Operation::WriteFile { .. } => "write",
            Operation::Copy { .. } => "copy",
            Operation::Compare { .. } => "compare",
            Operation::Rename { .. } => "rename",
            Operation::Symlink { .. } => "symlink",
            Operation::ReadLink { .. } => "readlink",
            Operation::RealPath { .. } => "realpath",
            Operation::MakeDir { .. } => "mkdir",
            Operation::RemoveDir { .. } => "rmdir",
            Operation::RemoveAll { .. } => "rm",
            Operation::Archive { .. } => "archive",
            Operation::Dearchive { .. } => "dearchive",
            Operation::Paste { .. } => "paste",
            Operation::Prototype { .. } => "prototype",
            Operation::GetUuid { .. } => "get_uuid",
            Operation::LookupUuid { .. } => "lookup_uuid",
            Operation::Reconcile { .. } => "reconcile",
            Operation::FixOofs { .. } => "fixoofs",
        }
    }

    /// Move the upload payload out, leaving an empty buffer behind.
    pub fn take_upload(&mut self) -> Option<Vec<u8>> {
        match self {
            Operation::WriteFile { data, .. } => Some(std::mem::take(data)),
            Operation::Dearchive { archive, .. } | Operation::Paste { archive, .. } => {
                Some(std::mem::take(archive))
            }
            _ => None,
        }
    }

    /// Put a received upload payload back in place.
    pub fn restore_upload(&mut self, bytes: Vec<u8>) {
        match self {
            Operation::WriteFile { data, .. } => *data = bytes,
            Operation::Dearchive { archive, .. } | Operation::Paste { archive, .. } => {
                *archive = bytes
            }
            _ => {}
        }
    }

    pub fn has_upload(&self) -> bool {
        matches!(
            self,
            Operation::WriteFile { .. } | Operation::Dearchive { .. } | Operation::Paste { .. }
        )
    }

    /// Operations whose reply is followed by a blob.
    pub fn has_download(&self) -> bool {
        matches!(self, Operation::ReadFile { .. } | Operation::Archive { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
    Other,
}

impl FileKind {
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            FileKind::Symlink
        } else if file_type.is_dir() {
            FileKind::Dir
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub kind: FileKind,
    pub size: u64,
    pub mode: u32,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
}

impl FileStat {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            kind: FileKind::from_file_type(meta.file_type()),
            size: meta.len(),
            mode: meta.mode() & 0o7777,
            mtime: meta.mtime(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileKind,
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Unit,
    Stat(FileStat),
    Entries(Vec<DirEntry>),
    /// A blob of `size` bytes follows the reply
    Streamed { size: u64 },
    Flag(bool),
    Path(PathBuf),
    Uuid(Uuid),
    MaybePath(Option<PathBuf>),
    Audit(AuditLog),
}

/// Semantic failure categories carried back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    AccessDenied,
    NotFound,
    AlreadyExists,
    Corrupt,
    ResourceExhausted,
    Protocol,
    Io,
}

/// A semantic failure in serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a local I/O error.
    pub fn from_io(err: &io::Error, context: impl fmt::Display) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => FailureKind::NotFound,
            io::ErrorKind::PermissionDenied => FailureKind::AccessDenied,
            io::ErrorKind::AlreadyExists => FailureKind::AlreadyExists,
            io::ErrorKind::InvalidData => FailureKind::Corrupt,
            io::ErrorKind::OutOfMemory => FailureKind::ResourceExhausted,
            _ => FailureKind::Io,
        };
        Self::new(kind, format!("{}: {}", context, err))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

/// Payload of every operation response.
pub type Reply = std::result::Result<Outcome, Failure>;
