use serde::{Deserialize, Serialize};

/// How to resolve two objects claiming one UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Keep the object the table already points at; strip the walked one.
    FavorTable,
    /// Keep the walked object; strip the old holder and repoint the entry.
    FavorTree,
}

/// Identity handling for a pasted subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PastePolicy {
    Preserve,
    Renew,
}
