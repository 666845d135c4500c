//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated config directory (permission file lives here)
//! - An isolated temp directory for staged transfers
//! - A store root for identity tests
//!
//! # Usage
//!
//! ```ignore
//! use oofs_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let config = env.config();
//!     // config.password_file() and env.store_root are isolated
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated configuration directory
    pub config_dir: PathBuf,
    /// Isolated staging directory
    pub temp_dir: PathBuf,
    /// Root of an empty object store
    pub store_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        // Symlink-free, so resolved paths match the ones handed out
        let root = temp_dir.path().canonicalize()?;

        let config_dir = root.join("config");
        let staging = root.join("tmp");
        let store_root = root.join("db");

        std::fs::create_dir_all(&config_dir)?;
        std::fs::create_dir_all(&staging)?;
        std::fs::create_dir_all(&store_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            config_dir,
            temp_dir: staging,
            store_root,
            test_id,
        })
    }

    /// Config pointing at this environment.
    ///
    /// The server binds an ephemeral loopback port and lock retries are short
    /// so contention tests finish quickly.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.paths.config_dir = self.config_dir.clone();
        cfg.paths.temp_dir = self.temp_dir.clone();
        cfg.server.listen = "127.0.0.1".to_string();
        cfg.server.port = 0;
        cfg.server.io_timeout_secs = 10;
        cfg.client.retry_delay_ms = 20;
        cfg.client.io_timeout_secs = 10;
        cfg.identity.lock_attempts = 5;
        cfg.identity.lock_retry_ms = 10;
        cfg
    }

    /// Create an object directory (and its parents) relative to the store root.
    pub fn create_object(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.store_root.join(relative_path.trim_start_matches('/'));
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Create a file with content relative to the store root.
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.store_root.join(relative_path.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.config_dir.exists());
        assert!(env.temp_dir.exists());
        assert!(env.store_root.exists());
    }

    #[test]
    fn test_environment_ids_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.test_id, env2.test_id);
        assert_ne!(env1.store_root, env2.store_root);
    }

    #[test]
    fn test_config_points_into_environment() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert!(cfg.password_file().starts_with(&env.config_dir));
        assert_eq!(cfg.server.port, 0);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("/ext/rose/panel.cfg", b"x=1").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"x=1");
    }
}
