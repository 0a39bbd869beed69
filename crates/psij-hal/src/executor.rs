//! Executor trait and configuration.
//!
//! The [`JobExecutor`] trait defines the contract shared by every backend:
//!
//! ```text
//!   submit() ──→ [background loop] ──→ set_job_status() ──→ Job::set_status()
//!    (async)       (poll / reaper)        (enrichment)        (commit + notify)
//! ```
//!
//! ## Method table
//!
//! | Method | Kind | Required | Returns |
//! |--------|------|----------|---------|
//! | `name()` | sync | yes | `&str` |
//! | `version()` | sync | yes | `&str` |
//! | `submit()` | async | yes | `HalResult<()>` |
//! | `cancel()` | async | yes | `HalResult<()>` |
//! | `list()` | async | yes | `HalResult<Vec<String>>` |
//! | `attach()` | async | yes | `HalResult<()>` |
//! | `set_status_callback()` | sync | yes | `()` |
//! | `status_callback()` | sync | yes | `Option<StatusCallback>` |
//! | `set_job_status()` | sync | provided | `()` |

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HalError, HalResult};
use crate::job::{Job, StatusCallback};
use crate::launcher::Launcher;
use crate::registry::LauncherRegistry;
use crate::spec::JobSpec;
use crate::state::JobState;
use crate::status::JobStatus;

/// Environment variable overriding the executor work directory.
pub const WORK_DIR_ENV: &str = "PSIJ_WORK_DIR";

/// Configuration shared by all executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Directory for submit scripts and auxiliary files.
    pub work_directory: PathBuf,
    /// Launchers available to the executor.
    #[serde(skip)]
    pub launchers: Arc<LauncherRegistry>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            work_directory: default_work_directory(),
            launchers: Arc::default(),
        }
    }
}

impl ExecutorConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var(WORK_DIR_ENV) {
            if !dir.is_empty() {
                config.work_directory = PathBuf::from(dir);
            }
        }
        config
    }

    /// Set the work directory.
    pub fn with_work_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_directory = dir.into();
        self
    }

    /// Set the launcher registry.
    pub fn with_launchers(mut self, launchers: Arc<LauncherRegistry>) -> Self {
        self.launchers = launchers;
        self
    }
}

/// `~/.psij/work`, or `./.psij/work` without a home directory.
pub fn default_work_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".psij")
        .join("work")
}

/// Trait for job executors.
///
/// # Contract
///
/// - `submit()` requires a `New` job with a spec, binds the job to this
///   executor and sets its native id before returning. Status changes
///   arrive only through notification.
/// - `cancel()` is best effort; success means the request was sent.
/// - `attach()` binds a fresh job to an existing native job and re-derives
///   its state from the backend.
/// - All status updates go through `set_job_status()`.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Name of this executor, e.g. `"slurm"`.
    fn name(&self) -> &str;

    /// Version of this executor.
    fn version(&self) -> &str;

    /// Submit a job.
    async fn submit(&self, job: &Arc<Job>) -> HalResult<()>;

    /// Request cancellation of a job.
    async fn cancel(&self, job: &Job) -> HalResult<()>;

    /// Native ids of jobs known to the backend for the current user.
    async fn list(&self) -> HalResult<Vec<String>>;

    /// Attach `job` to an existing native job.
    async fn attach(&self, job: &Arc<Job>, native_id: &str) -> HalResult<()>;

    /// Set the executor-wide status callback.
    fn set_status_callback(&self, callback: StatusCallback);

    /// The executor-wide status callback, if any.
    fn status_callback(&self) -> Option<StatusCallback>;

    /// Push a status into a job.
    fn set_job_status(&self, job: &Job, status: JobStatus) {
        job.set_status(status);
    }
}

/// Storage for an executor-wide status callback.
#[derive(Default)]
pub struct CallbackSlot(Mutex<Option<StatusCallback>>);

impl CallbackSlot {
    pub fn set(&self, callback: StatusCallback) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(callback);
        }
    }

    pub fn get(&self) -> Option<StatusCallback> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}

impl std::fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.get().is_some() { "CallbackSlot(set)" } else { "CallbackSlot(empty)" })
    }
}

/// Check that `job` can be submitted and return its spec.
pub fn check_submittable(job: &Job) -> HalResult<Arc<JobSpec>> {
    let state = job.state();
    if state != JobState::New {
        return Err(HalError::InvalidJob(format!(
            "Job {} must be in the NEW state to be submitted (found {})",
            job.id(),
            state
        )));
    }
    let spec = job
        .spec()
        .cloned()
        .ok_or_else(|| HalError::InvalidJob(format!("Job {} has no spec", job.id())))?;
    spec.validate()?;
    Ok(spec)
}

/// Check that `job` can be attached.
pub fn check_attachable(job: &Job) -> HalResult<()> {
    let state = job.state();
    if state != JobState::New {
        return Err(HalError::InvalidJob(format!(
            "Job {} must be in the NEW state to be attached (found {})",
            job.id(),
            state
        )));
    }
    Ok(())
}

/// Per-executor cache of resolved launchers.
#[derive(Debug)]
pub struct LauncherCache {
    registry: Arc<LauncherRegistry>,
    cache: Mutex<FxHashMap<String, Arc<dyn Launcher>>>,
}

impl LauncherCache {
    /// Default launcher name.
    pub const DEFAULT_LAUNCHER: &'static str = "single";

    pub fn new(registry: Arc<LauncherRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Resolve the launcher for `spec`, creating it on first use.
    pub fn get(&self, spec: &JobSpec) -> HalResult<Arc<dyn Launcher>> {
        let name = spec.launcher.as_deref().unwrap_or(Self::DEFAULT_LAUNCHER);
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| HalError::Configuration("launcher cache poisoned".into()))?;
        if let Some(launcher) = cache.get(name) {
            return Ok(launcher.clone());
        }
        debug!("Resolving launcher: {}", name);
        let launcher = self.registry.create(name, None)?;
        cache.insert(name.to_string(), launcher.clone());
        Ok(launcher)
    }
}
