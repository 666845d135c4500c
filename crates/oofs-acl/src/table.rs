//! The in-memory permission table, its file format and admin edits.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use oofs_config::path::{is_component_prefix, normalize_lexical};
use oofs_config::{log_acl_info, log_acl_warn};
use tracing::field::display;

use crate::password::{hash_password, verify_password};
use crate::{AclError, AdminError, Mode, Result};

/// Subject whose rules apply to every login.
pub const WILDCARD: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub mode: Mode,
    pub prefix: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub login: String,
    /// Stored password hash; empty means login is impossible
    pub password_hash: String,
    pub rules: Vec<Rule>,
}

impl Subject {
    fn new(login: &str, password_hash: String) -> Self {
        Self {
            login: login.to_string(),
            password_hash,
            rules: Vec::new(),
        }
    }

    fn rule_index(&self, prefix: &Path) -> Option<usize> {
        self.rules.iter().position(|r| r.prefix == prefix)
    }
}

/// Permission table for one worker.
///
/// Edits persist the whole table to its backing file. The table does no
/// locking of its own; a single admin writer is assumed.
#[derive(Debug, Clone, Default)]
pub struct AccessTable {
    subjects: Vec<Subject>,
    file: Option<PathBuf>,
}

impl AccessTable {
    /// Load the permission file at `path`.
    ///
    /// A missing file is an error unless `create_if_missing` is set, in which
    /// case an empty table is written there.
    pub fn load(path: &Path, create_if_missing: bool) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let mut table = Self::parse(&text)?;
                table.file = Some(path.to_path_buf());
                Ok(table)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound && create_if_missing => {
                let table = Self {
                    subjects: Vec::new(),
                    file: Some(path.to_path_buf()),
                };
                table.persist()?;
                log_acl_info!("Created empty permission file", path = display(path.display()));
                Ok(table)
            }
            Err(source) => Err(AclError::Unreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse permission file text. The result has no backing file.
    pub fn parse(text: &str) -> Result<Self> {
        let mut subjects: Vec<Subject> = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: &str| AclError::Malformed {
                line: line_no,
                reason: reason.to_string(),
            };

            if let Some(rest) = line.strip_prefix(':') {
                let mut fields = rest.splitn(3, ':');
                let (Some(read), Some(write), Some(prefix)) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    return Err(malformed("rule needs :read:write:path"));
                };
                let subject = subjects
                    .last_mut()
                    .ok_or_else(|| malformed("rule before any subject"))?;
                let mode = Mode {
                    read: parse_flag(read).ok_or_else(|| malformed("read flag must be 1 or 0"))?,
                    write: parse_flag(write)
                        .ok_or_else(|| malformed("write flag must be 1 or 0"))?,
                };
                if !prefix.starts_with('/') {
                    return Err(malformed("rule path must be absolute"));
                }
                subject.rules.push(Rule {
                    mode,
                    prefix: normalize_lexical(prefix),
                });
            } else {
                let mut fields = line.splitn(3, ':');
                let login = fields.next().unwrap_or("");
                let Some(hash) = fields.next() else {
                    return Err(malformed("subject needs login:password:"));
                };
                if subjects.iter().any(|s| s.login == login) {
                    return Err(malformed("subject listed twice"));
                }
                subjects.push(Subject::new(login, hash.to_string()));
            }
        }
        Ok(Self {
            subjects,
            file: None,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for subject in &self.subjects {
            out.push_str(&format!("{}:{}:\n", subject.login, subject.password_hash));
            for rule in &subject.rules {
                out.push_str(&format!(
                    ":{}:{}:{}\n",
                    Mode::flag(rule.mode.read),
                    Mode::flag(rule.mode.write),
                    rule.prefix.display()
                ));
            }
        }
        out
    }

    pub fn subjects(&self) -> &[Subject] {
        &self.subjects
    }

    pub fn subject(&self, login: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.login == login)
    }

    fn subject_mut(&mut self, login: &str) -> std::result::Result<&mut Subject, AdminError> {
        self.subjects
            .iter_mut()
            .find(|s| s.login == login)
            .ok_or_else(|| AdminError::NotFound(format!("user {}", login)))
    }

    /// Whether `login` may access `path` with every bit of `wanted`.
    pub fn test(&self, login: &str, path: &Path, wanted: Mode) -> bool {
        let path = normalize_lexical(path);
        // (prefix depth, is the login's own rule, granted mode)
        let mut best: Option<(usize, bool, Mode)> = None;

        let candidates = self
            .subject(WILDCARD)
            .into_iter()
            .map(|s| (s, false))
            .chain(
                self.subject(login)
                    .filter(|_| login != WILDCARD)
                    .map(|s| (s, true)),
            );
        for (subject, own) in candidates {
            for rule in &subject.rules {
                if !is_component_prefix(&rule.prefix, &path) {
                    continue;
                }
                let depth = rule.prefix.components().count();
                let better = match best {
                    None => true,
                    Some((best_depth, _, _)) => depth > best_depth || (depth == best_depth && own),
                };
                if better {
                    best = Some((depth, own, rule.mode));
                }
            }
        }
        best.map(|(_, _, mode)| mode.allows(wanted)).unwrap_or(false)
    }

    /// Check a login attempt. The wildcard subject never logs in.
    pub fn authenticate(&self, login: &str, password: &str) -> bool {
        if login == WILDCARD {
            return false;
        }
        match self.subject(login) {
            Some(subject) if !subject.password_hash.is_empty() => {
                verify_password(&subject.password_hash, password)
            }
            _ => false,
        }
    }

    pub fn add_user(&mut self, login: &str, password: &str) -> std::result::Result<(), AdminError> {
        if !valid_login(login) {
            return Err(AdminError::NotFound(format!("valid login {:?}", login)));
        }
        if self.subject(login).is_some() {
            return Err(AdminError::Duplicate(format!("user {}", login)));
        }
        let hash = if login == WILDCARD {
            String::new()
        } else {
            hash_password(password)
        };
        self.subjects.push(Subject::new(login, hash));
        self.persist()
    }

    pub fn delete_user(&mut self, login: &str) -> std::result::Result<(), AdminError> {
        let before = self.subjects.len();
        self.subjects.retain(|s| s.login != login);
        if self.subjects.len() == before {
            return Err(AdminError::NotFound(format!("user {}", login)));
        }
        self.persist()
    }

    pub fn change_login(&mut self, old: &str, new: &str) -> std::result::Result<(), AdminError> {
        if old == WILDCARD || new == WILDCARD {
            return Err(AdminError::Duplicate(WILDCARD.to_string()));
        }
        if !valid_login(new) {
            return Err(AdminError::NotFound(format!("valid login {:?}", new)));
        }
        if self.subject(new).is_some() {
            return Err(AdminError::Duplicate(format!("user {}", new)));
        }
        self.subject_mut(old)?.login = new.to_string();
        self.persist()
    }

    pub fn change_password(&mut self, login: &str, password: &str) -> std::result::Result<(), AdminError> {
        if login == WILDCARD {
            return Err(AdminError::NotFound(format!("user {}", login)));
        }
        self.subject_mut(login)?.password_hash = hash_password(password);
        self.persist()
    }

    /// Add a rule. Rules for the wildcard subject create its block on demand.
    pub fn add_rule(&mut self, login: &str, mode: &str, prefix: &Path) -> std::result::Result<(), AdminError> {
        let mode: Mode = mode.parse()?;
        let prefix = normalize_lexical(prefix);
        if login == WILDCARD && self.subject(WILDCARD).is_none() {
            self.subjects.insert(0, Subject::new(WILDCARD, String::new()));
        }
        let subject = self.subject_mut(login)?;
        if subject.rule_index(&prefix).is_some() {
            return Err(AdminError::Duplicate(format!(
                "rule {} for {}",
                prefix.display(),
                login
            )));
        }
        subject.rules.push(Rule { mode, prefix });
        self.persist()
    }

    pub fn change_rule(&mut self, login: &str, prefix: &Path, mode: &str) -> std::result::Result<(), AdminError> {
        let mode: Mode = mode.parse()?;
        let prefix = normalize_lexical(prefix);
        let subject = self.subject_mut(login)?;
        let index = subject
            .rule_index(&prefix)
            .ok_or_else(|| AdminError::NotFound(format!("rule {} for {}", prefix.display(), login)))?;
        subject.rules[index].mode = mode;
        self.persist()
    }

    pub fn delete_rule(&mut self, login: &str, prefix: &Path) -> std::result::Result<(), AdminError> {
        let prefix = normalize_lexical(prefix);
        let subject = self.subject_mut(login)?;
        let index = subject
            .rule_index(&prefix)
            .ok_or_else(|| AdminError::NotFound(format!("rule {} for {}", prefix.display(), login)))?;
        subject.rules.remove(index);
        self.persist()
    }

    /// Write the full table to its backing file via a temporary sibling.
    fn persist(&self) -> std::result::Result<(), AdminError> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp_path = path.with_extension("tmp");
            {
                let mut file = fs::File::create(&tmp_path)?;
                file.write_all(self.render().as_bytes())?;
                file.sync_all()?;
            }
            fs::rename(&tmp_path, path)
        };
        match write() {
            Ok(()) => {
                log_acl_info!("Permission file saved", subjects = self.subjects.len());
                Ok(())
            }
            Err(e) => {
                log_acl_warn!("Failed to persist permission file", error = display(&e));
                Err(AdminError::PersistFailed(format!("{}: {}", path.display(), e)))
            }
        }
    }
}

fn parse_flag(field: &str) -> Option<bool> {
    match field {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

/// Logins are stored in the first field of a `login:hash:` line.
fn valid_login(login: &str) -> bool {
    !login.is_empty() && !login.contains(':') && !login.contains(char::is_whitespace)
}
