//! Audit log returned by reconciliation and fix-up passes.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A walked object's identity was appended to the table
    Added { uuid: Uuid, path: String },
    /// An entry failed validation and was removed from the table
    Dropped { uuid: Uuid, path: String },
    /// Favor-table conflict: the walked duplicate lost its identity file
    DuplicateStripped {
        uuid: Uuid,
        kept: String,
        stripped: String,
    },
    /// Favor-tree conflict: the previous holder lost its identity file and
    /// the entry now points at the walked object
    Repointed { uuid: Uuid, from: String, to: String },
    /// Hyperlinks reference a UUID that no object owns
    Broken { uuid: Uuid, referrers: Vec<String> },
    /// An identity nothing links to was removed
    Unused { uuid: Uuid, path: String },
    /// An object and all of its referrers moved to a fresh UUID
    Renumbered {
        old: Uuid,
        new: Uuid,
        path: String,
        referrers: Vec<String>,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Added { uuid, path } => write!(f, "added    {} {}", uuid.braced(), path),
            Action::Dropped { uuid, path } => write!(f, "dropped  {} {}", uuid.braced(), path),
            Action::DuplicateStripped {
                uuid,
                kept,
                stripped,
            } => write!(
                f,
                "dup      {} removed from {} (kept {})",
                uuid.braced(),
                stripped,
                kept
            ),
            Action::Repointed { uuid, from, to } => {
                write!(f, "moved    {} {} -> {}", uuid.braced(), from, to)
            }
            Action::Broken { uuid, referrers } => write!(
                f,
                "broken   {} referenced by {}",
                uuid.braced(),
                referrers.join(", ")
            ),
            Action::Unused { uuid, path } => write!(f, "unused   {} {}", uuid.braced(), path),
            Action::Renumbered {
                old,
                new,
                path,
                referrers,
            } => write!(
                f,
                "renumber {} -> {} {} ({} links)",
                old.braced(),
                new.braced(),
                path,
                referrers.len()
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub actions: Vec<Action>,
}

impl AuditLog {
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn extend(&mut self, other: AuditLog) {
        self.actions.extend(other.actions);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Number of duplicate identities removed under favor-table.
    pub fn duplicates_stripped(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::DuplicateStripped { .. }))
            .count()
    }
}
