//! Command-line locations: `/path` on this machine or `[login@]host:/path`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use oofs_config::path::normalize_lexical;
use oofs_config::Config;
use oofs_remote::{Connection, Locality, ProgressSink, Target};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub host: Option<String>,
    pub login: Option<String>,
    pub path: PathBuf,
}

impl FromStr for Location {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // A leading `/`, `.` or a colon-free word is a path on this machine
        let remote = match s.split_once(':') {
            Some((head, tail)) if !head.is_empty() && !head.contains('/') => Some((head, tail)),
            _ => None,
        };
        let Some((head, path)) = remote else {
            return Ok(Self {
                host: None,
                login: None,
                path: PathBuf::from(s),
            });
        };

        let (login, host) = match head.split_once('@') {
            Some((login, host)) => (Some(login.to_string()), host),
            None => (None, head),
        };
        if host.is_empty() || login.as_deref() == Some("") {
            bail!("malformed location '{}'", s);
        }
        if !path.starts_with('/') {
            bail!("remote path in '{}' must be absolute", s);
        }
        Ok(Self {
            host: Some(host.to_string()),
            login,
            path: normalize_lexical(path),
        })
    }
}

impl Location {
    /// Absolute form of the path. Local relative paths resolve against the
    /// current directory.
    pub fn absolute_path(&self) -> Result<PathBuf> {
        if self.path.is_absolute() {
            return Ok(normalize_lexical(&self.path));
        }
        if let Some(host) = &self.host {
            bail!("path {} on {} must be absolute", self.path.display(), host);
        }
        let cwd = std::env::current_dir().context("Cannot read current directory")?;
        Ok(normalize_lexical(cwd.join(&self.path)))
    }

    /// Resolve `other` (a bare path) on the same machine as `self`.
    pub fn sibling(&self, other: &Path) -> Self {
        Self {
            host: self.host.clone(),
            login: self.login.clone(),
            path: other.to_path_buf(),
        }
    }
}

/// Options shared by every subcommand that opens a connection.
pub struct Access {
    pub config: Config,
    pub login: Option<String>,
    pub password: Option<String>,
    /// Treat every host as remote, even this one
    pub force_remote: bool,
    pub progress: Option<Arc<dyn ProgressSink>>,
}

impl Access {
    pub fn connect(&self, location: &Location) -> Result<Connection> {
        tracing::debug!(host = ?location.host, path = %location.path.display(), "Opening connection");
        let mut conn = match &location.host {
            None => Connection::local(&self.config),
            Some(host) => {
                let login = location
                    .login
                    .clone()
                    .or_else(|| self.login.clone())
                    .or_else(|| std::env::var("USER").ok())
                    .context("No login given; use login@host or --login")?;
                let password = self
                    .password
                    .clone()
                    .context("No password given; use --password or OOFS_PASSWORD")?;
                let target = Target::new(host.clone(), self.config.server.port, login, password);
                let conn = Connection::new(target, &self.config);
                if self.force_remote {
                    conn.with_locality(Locality::Remote)
                } else {
                    conn
                }
            }
        };
        if let Some(progress) = &self.progress {
            conn = conn.with_progress(Arc::clone(progress));
        }
        Ok(conn)
    }
}
