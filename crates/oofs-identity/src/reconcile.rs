//! Table reconciliation, identity lookup and identity garbage collection.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use oofs_config::path::normalize_lexical;
use oofs_config::{log_identity_debug, log_identity_info, log_identity_warn};
use oofs_types::{Action, AuditLog, ConflictPolicy, PastePolicy};
use tracing::field::display;
use uuid::Uuid;

use crate::object::{
    is_object_dir, read_identity, read_node, remove_identity, write_identity, write_node,
    ObjectWalk,
};
use crate::table::{IdentityTable, TableEntry};
use crate::{uuidgen, IdentityError, Result, Store};

/// Identity file contents, with corrupt files treated as absent.
fn identity_of(object: &Path) -> Result<Option<Uuid>> {
    match read_identity(object) {
        Ok(found) => Ok(found),
        Err(IdentityError::Corrupt { path, reason }) => {
            log_identity_warn!("Ignoring corrupt identity file", path = display(path.display()), reason = display(&reason));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Per-entry validation state for one reconcile pass.
struct Validation {
    state: Vec<Option<bool>>,
}

impl Validation {
    fn check(&mut self, store: &Store, entries: &[TableEntry], index: usize) -> Result<bool> {
        if let Some(valid) = self.state[index] {
            return Ok(valid);
        }
        let entry = &entries[index];
        let object = store.absolute(&entry.path);
        let valid = is_object_dir(&object) && identity_of(&object)? == Some(entry.uuid);
        self.state[index] = Some(valid);
        Ok(valid)
    }

    /// First valid entry holding `uuid`.
    fn holder(&mut self, store: &Store, entries: &[TableEntry], uuid: Uuid) -> Result<Option<usize>> {
        for index in 0..entries.len() {
            if entries[index].uuid == uuid && self.check(store, entries, index)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn invalidate(&mut self, entries: &[TableEntry], uuid: Uuid, path: &str) {
        for (index, entry) in entries.iter().enumerate() {
            if entry.uuid == uuid && entry.path == path {
                self.state[index] = Some(false);
            }
        }
    }
}

impl Store {
    /// Repair the table against the tree at `scan`.
    ///
    /// Entries under `scan` (exactly `scan` when not recursive) are validated
    /// up front; entries elsewhere only when a walked object's UUID refers to
    /// them. The table file is rewritten only if its entries changed.
    pub fn reconcile(&self, scan: &Path, recursive: bool, policy: ConflictPolicy) -> Result<AuditLog> {
        let _guard = self.lock()?;
        self.reconcile_locked(scan, recursive, policy)
    }

    pub(crate) fn reconcile_locked(
        &self,
        scan: &Path,
        recursive: bool,
        policy: ConflictPolicy,
    ) -> Result<AuditLog> {
        let scan_rel = self.relative(scan)?;
        let table_path = self.table_path();
        let original = IdentityTable::load(&table_path)?;
        let mut entries = original.entries.clone();
        let mut validation = Validation {
            state: vec![None; entries.len()],
        };

        let in_scope = |path: &str| {
            if recursive {
                path.starts_with(scan_rel.as_str())
            } else {
                path == scan_rel
            }
        };
        for index in 0..entries.len() {
            if in_scope(&entries[index].path) {
                validation.check(self, &entries, index)?;
            }
        }

        let mut log = AuditLog::default();
        let walk = ObjectWalk::new(self.absolute(&scan_rel), scan_rel.clone(), recursive);
        for item in walk {
            let (object, rel) = item?;
            let Some(uuid) = identity_of(&object)? else {
                continue;
            };

            match validation.holder(self, &entries, uuid)? {
                None => {
                    entries.push(TableEntry {
                        uuid,
                        path: rel.clone(),
                    });
                    validation.state.push(Some(true));
                    log.push(Action::Added { uuid, path: rel });
                }
                Some(index) if entries[index].path == rel => {}
                Some(index) => match policy {
                    ConflictPolicy::FavorTable => {
                        remove_identity(&object)?;
                        validation.invalidate(&entries, uuid, &rel);
                        log.push(Action::DuplicateStripped {
                            uuid,
                            kept: entries[index].path.clone(),
                            stripped: rel,
                        });
                    }
                    ConflictPolicy::FavorTree => {
                        let from = entries[index].path.clone();
                        remove_identity(&self.absolute(&from))?;
                        validation.invalidate(&entries, uuid, &from);
                        entries[index].path = rel.clone();
                        validation.state[index] = Some(true);
                        log.push(Action::Repointed { uuid, from, to: rel });
                    }
                },
            }
        }

        let mut kept: Vec<TableEntry> = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let invalid = validation.state[index] == Some(false);
            if invalid || kept.contains(&entry) {
                log.push(Action::Dropped {
                    uuid: entry.uuid,
                    path: entry.path,
                });
            } else {
                kept.push(entry);
            }
        }

        if kept != original.entries {
            IdentityTable { entries: kept }.save(&table_path)?;
        }
        if !log.is_empty() {
            log_identity_info!(
                "Reconciled identity table",
                scan = scan_rel.as_str(),
                actions = log.len()
            );
        }
        Ok(log)
    }

    /// Identity of the object at `path`, optionally creating one.
    ///
    /// Returns the nil UUID when the object has no valid identity and
    /// `create` is false. An identity stripped as a duplicate during the
    /// initial reconcile is replaced by a fresh one when `create` is set.
    pub fn get_uuid(&self, path: &Path, create: bool) -> Result<Uuid> {
        let object = normalize_lexical(path);
        if !is_object_dir(&object) {
            return Err(IdentityError::NotAnObject(object));
        }
        let _guard = self.lock()?;
        self.reconcile_locked(&object, false, ConflictPolicy::FavorTable)?;
        if let Some(uuid) = identity_of(&object)? {
            return Ok(uuid);
        }
        if !create {
            return Ok(Uuid::nil());
        }

        let uuid = uuidgen::generate();
        write_identity(&object, &uuid)?;
        self.reconcile_locked(&object, false, ConflictPolicy::FavorTable)?;
        log_identity_debug!("Assigned new identity", uuid = display(uuid));
        Ok(uuid)
    }

    /// Absolute path of the first valid table entry for `uuid`.
    pub fn lookup_uuid(&self, uuid: Uuid) -> Result<Option<PathBuf>> {
        let _guard = self.lock()?;
        let table = IdentityTable::load(&self.table_path())?;
        let mut validation = Validation {
            state: vec![None; table.entries.len()],
        };
        Ok(validation
            .holder(self, &table.entries, uuid)?
            .map(|index| self.absolute(&table.entries[index].path)))
    }

    /// Reconcile the whole store, then garbage-collect identities.
    ///
    /// Identities with no referencing hyperlink are removed (the store root
    /// keeps its identity). Hyperlinks to UUIDs no object owns are reported
    /// as broken. With `renumber`, every linked object and all of its
    /// referrers move to one fresh UUID.
    pub fn fix_oofs(&self, renumber: bool) -> Result<AuditLog> {
        let _guard = self.lock()?;
        let root = self.root().to_path_buf();
        let mut log = self.reconcile_locked(&root, true, ConflictPolicy::FavorTable)?;

        let mut owners: BTreeMap<Uuid, (PathBuf, String)> = BTreeMap::new();
        let mut edges: BTreeMap<Uuid, Vec<(PathBuf, String)>> = BTreeMap::new();
        for item in ObjectWalk::new(root.clone(), "/".to_string(), true) {
            let (object, rel) = item?;
            if let Some(uuid) = identity_of(&object)? {
                owners.entry(uuid).or_insert_with(|| (object.clone(), rel.clone()));
            }
            match read_node(&object) {
                Ok(Some(link)) => edges.entry(link.uuid).or_default().push((object, rel)),
                Ok(None) => {}
                Err(IdentityError::Corrupt { path, reason }) => {
                    log_identity_warn!("Ignoring corrupt node file", path = display(path.display()), reason = display(&reason));
                }
                Err(e) => return Err(e),
            }
        }

        for (uuid, referrers) in &edges {
            if !owners.contains_key(uuid) {
                log.push(Action::Broken {
                    uuid: *uuid,
                    referrers: referrers.iter().map(|(_, rel)| rel.clone()).collect(),
                });
            }
        }

        for (uuid, (object, rel)) in owners {
            match edges.get(&uuid) {
                None if rel == "/" => {}
                None => {
                    remove_identity(&object)?;
                    log.push(Action::Unused { uuid, path: rel });
                }
                Some(referrers) if renumber => {
                    let fresh = uuidgen::generate();
                    write_identity(&object, &fresh)?;
                    for (referrer, _) in referrers {
                        relink(referrer, fresh)?;
                    }
                    log.push(Action::Renumbered {
                        old: uuid,
                        new: fresh,
                        path: rel,
                        referrers: referrers.iter().map(|(_, rel)| rel.clone()).collect(),
                    });
                }
                Some(_) => {}
            }
        }

        log.extend(self.reconcile_locked(&root, true, ConflictPolicy::FavorTable)?);
        Ok(log)
    }

    /// Give every object under `dir` a fresh identity, rewriting hyperlinks
    /// inside the subtree that pointed at the old ones.
    pub fn renew_subtree(&self, dir: &Path) -> Result<AuditLog> {
        let _guard = self.lock()?;
        self.renew_locked(dir)
    }

    fn renew_locked(&self, dir: &Path) -> Result<AuditLog> {
        let dir_rel = self.relative(dir)?;
        let start = self.absolute(&dir_rel);

        let mut renewed: HashMap<Uuid, (Uuid, String)> = HashMap::new();
        for item in ObjectWalk::new(start.clone(), dir_rel.clone(), true) {
            let (object, rel) = item?;
            if let Some(old) = identity_of(&object)? {
                let fresh = uuidgen::generate();
                write_identity(&object, &fresh)?;
                renewed.insert(old, (fresh, rel));
            }
        }

        let mut referrers: HashMap<Uuid, Vec<String>> = HashMap::new();
        for item in ObjectWalk::new(start, dir_rel, true) {
            let (object, rel) = item?;
            let Ok(Some(link)) = read_node(&object) else {
                continue;
            };
            if let Some((fresh, _)) = renewed.get(&link.uuid) {
                relink(&object, *fresh)?;
                referrers.entry(link.uuid).or_default().push(rel);
            }
        }

        let mut log = AuditLog::default();
        let mut actions: Vec<Action> = renewed
            .into_iter()
            .map(|(old, (new, path))| Action::Renumbered {
                old,
                new,
                path,
                referrers: referrers.remove(&old).unwrap_or_default(),
            })
            .collect();
        actions.sort_by(|a, b| match (a, b) {
            (Action::Renumbered { path: pa, .. }, Action::Renumbered { path: pb, .. }) => pa.cmp(pb),
            _ => std::cmp::Ordering::Equal,
        });
        for action in actions {
            log.push(action);
        }
        Ok(log)
    }

    /// Register a freshly pasted subtree.
    ///
    /// `Preserve` keeps the pasted identities and strips any other holder;
    /// `Renew` first moves the subtree to fresh identities, so nothing
    /// elsewhere is touched.
    pub fn adopt(&self, dir: &Path, policy: PastePolicy) -> Result<AuditLog> {
        let _guard = self.lock()?;
        match policy {
            PastePolicy::Preserve => self.reconcile_locked(dir, true, ConflictPolicy::FavorTree),
            PastePolicy::Renew => {
                let mut log = self.renew_locked(dir)?;
                log.extend(self.reconcile_locked(dir, true, ConflictPolicy::FavorTable)?);
                Ok(log)
            }
        }
    }
}

/// Point a hyperlink at `uuid`, keeping its display name.
fn relink(object: &Path, uuid: Uuid) -> Result<()> {
    let mut link = read_node(object)?.ok_or_else(|| IdentityError::NotAnObject(object.to_path_buf()))?;
    link.uuid = uuid;
    write_node(object, &link)
}
