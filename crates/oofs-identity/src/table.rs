//! The identity table: an ordered UUID → store-relative path index.
//!
//! ## File Format
//!
//! ```text
//! {6f1c03a2-52a4-4c59-9d8e-0b1f5f3c2a10} /
//! {0c7d6f2e-1b6e-4a9a-8a5e-2b8f0d9f4c11} /ext/rose/
//! {9a2e51d4-3f0b-4f6d-b0a1-77e6c1d2e3f4} /ext/rose/ext/leaf/
//!                                        <- blank line terminates
//! ```
//!
//! Malformed lines are skipped on load.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::object::{format_braced, parse_braced};
use crate::Result;

/// Name of the table file in a store root.
pub const TABLE_FILE: &str = ".oofs_table";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub uuid: Uuid,
    /// Store-relative path with leading and trailing `/`
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityTable {
    pub entries: Vec<TableEntry>,
}

impl IdentityTable {
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                break;
            }
            match parse_line(line) {
                Some(entry) => entries.push(entry),
                None => debug!(line, "Skipping malformed identity table line"),
            }
        }
        Self { entries }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format_braced(&entry.uuid));
            out.push(' ');
            out.push_str(&entry.path);
            out.push('\n');
        }
        out.push('\n');
        out
    }

    /// Load the table, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save using the write-rename pattern so readers never see a torn table.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(self.render().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str) -> Option<TableEntry> {
    let (token, path) = line.split_once(' ')?;
    let uuid = parse_braced(token)?;
    if uuid.is_nil() || !path.starts_with('/') || !path.ends_with('/') {
        return None;
    }
    Some(TableEntry {
        uuid,
        path: path.to_string(),
    })
}
