//! # oofs-config
//!
//! Configuration management for OOFS clients and the `oofsd` server.
//!
//! Loads configuration from:
//! 1. Built-in defaults
//! 2. `<config-dir>/config.toml`
//! 3. Environment variables (highest priority)
//!
//! There is no process-global instance: binaries call [`Config::load`] once and
//! pass the value down.

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the configuration directory.
pub const ENV_CONFIG_DIR: &str = "VLAB_CONFIG_DIR";
/// Environment variable naming the temporary directory.
pub const ENV_TMP_DIR: &str = "VLAB_TMP_DIR";
/// Environment variable overriding the server port.
pub const ENV_PORT: &str = "OOFS_PORT";

/// Well-known server port.
pub const DEFAULT_PORT: u16 = 7141;

/// Name of the permission file inside the config directory.
pub const PASSWORD_FILE: &str = "rapasswords";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub identity: IdentityConfig,
}

impl Config {
    /// Load config from the process environment and the config directory.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load config using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config_dir = lookup(ENV_CONFIG_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(PathsConfig::default_config_dir);

        let file = config_dir.join("config.toml");
        let mut config = if file.exists() {
            debug!("Loading config from {:?}", file);
            Self::from_file(&file)?
        } else {
            Config::default()
        };
        config.paths.config_dir = config_dir;

        config.apply_env_overrides(lookup)?;
        Ok(config)
    }

    /// Parse a config file without applying environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup(ENV_TMP_DIR) {
            self.paths.temp_dir = PathBuf::from(dir);
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_PORT,
                value: port,
            })?;
        }
        Ok(())
    }

    /// Path of the permission file: `<config-dir>/rapasswords`.
    pub fn password_file(&self) -> PathBuf {
        self.paths.config_dir.join(PASSWORD_FILE)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds `config.toml` and the permission file
    pub config_dir: PathBuf,
    /// Staging area for two-sided transfers
    pub temp_dir: PathBuf,
}

impl PathsConfig {
    fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".vlab"))
            .unwrap_or_else(|| PathBuf::from(".vlab"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_dir: Self::default_config_dir(),
            temp_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Server (`oofsd`) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen: String,
    pub port: u16,
    /// Per-frame I/O timeout for session workers (0 disables)
    pub io_timeout_secs: u64,
}

impl ServerConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            io_timeout_secs: 300,
        }
    }
}

/// Client-side connection behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect attempts before a call fails with a transport error
    pub connect_attempts: u32,
    /// Address-lookup attempts during classification
    pub resolve_attempts: u32,
    pub retry_delay_ms: u64,
    /// Per-frame I/O timeout (0 disables)
    pub io_timeout_secs: u64,
}

impl ClientConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_secs > 0).then(|| Duration::from_secs(self.io_timeout_secs))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            resolve_attempts: 3,
            retry_delay_ms: 200,
            io_timeout_secs: 300,
        }
    }
}

/// Identity table lock tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub lock_attempts: u32,
    pub lock_retry_ms: u64,
}

impl IdentityConfig {
    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            lock_attempts: 50,
            lock_retry_ms: 100,
        }
    }
}
