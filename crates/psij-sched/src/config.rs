//! Batch executor configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use psij_hal::{ExecutorConfig, LauncherRegistry, default_work_directory};
use serde::{Deserialize, Serialize};

/// Environment variable forcing `keep_files`.
pub const KEEP_FILES_ENV: &str = "PSIJ_BATCH_KEEP_FILES";

/// Configuration for batch-scheduler executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Base work directory. Each executor uses `<work_directory>/<name>`.
    pub work_directory: PathBuf,

    /// Delay between the end of one queue poll and the start of the next.
    pub queue_polling_interval: Duration,

    /// Delay before the first queue poll.
    pub initial_queue_polling_delay: Duration,

    /// Consecutive status-command failures tolerated before all tracked
    /// jobs are failed.
    pub queue_polling_error_threshold: u32,

    /// Keep submit scripts and auxiliary files after jobs finish.
    pub keep_files: bool,

    /// Timeout for every scheduler command.
    pub command_timeout: Duration,

    /// Launchers available to the executor.
    #[serde(skip)]
    pub launchers: Arc<LauncherRegistry>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            work_directory: default_work_directory(),
            queue_polling_interval: Duration::from_secs(30),
            initial_queue_polling_delay: Duration::from_secs(2),
            queue_polling_error_threshold: 2,
            keep_files: false,
            command_timeout: Duration::from_secs(60),
            launchers: Arc::default(),
        }
    }
}

impl BatchConfig {
    /// Batch defaults on top of a generic executor configuration, with
    /// environment overrides applied.
    pub fn from_executor_config(config: ExecutorConfig) -> Self {
        Self {
            work_directory: config.work_directory,
            launchers: config.launchers,
            ..Self::default()
        }
        .with_env_overrides()
    }

    /// Apply `PSIJ_BATCH_KEEP_FILES`.
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var_os(KEEP_FILES_ENV).is_some() {
            self.keep_files = true;
        }
        self
    }

    /// Set the work directory.
    pub fn with_work_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_directory = dir.into();
        self
    }

    /// Set the queue polling interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.queue_polling_interval = interval;
        self
    }

    /// Set the initial queue polling delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_queue_polling_delay = delay;
        self
    }

    /// Set the polling error threshold.
    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.queue_polling_error_threshold = threshold;
        self
    }

    /// Set whether files are kept.
    pub fn with_keep_files(mut self, keep: bool) -> Self {
        self.keep_files = keep;
        self
    }

    /// Set the command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
