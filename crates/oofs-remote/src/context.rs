//! Per-call context passed explicitly instead of process globals.

use std::path::PathBuf;
use std::sync::Arc;

use oofs_config::Config;

/// Receives transfer progress for chunked uploads and downloads.
pub trait ProgressSink: Send + Sync {
    /// A transfer of `total` bytes is starting.
    fn start(&self, _label: &str, _total: u64) {}

    fn update(&self, done: u64, total: u64);

    fn finish(&self) {}
}

/// Progress sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&self, _done: u64, _total: u64) {}
}

#[derive(Clone)]
pub struct OpContext {
    /// Where two-sided operations stage data
    pub temp_dir: PathBuf,
    pub progress: Arc<dyn ProgressSink>,
}

impl OpContext {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            progress: Arc::new(NoProgress),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.paths.temp_dir.clone())
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }
}

impl std::fmt::Debug for OpContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpContext")
            .field("temp_dir", &self.temp_dir)
            .finish_non_exhaustive()
    }
}
