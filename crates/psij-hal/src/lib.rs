//! PSI/J job model and executor contract
//!
//! This crate provides a uniform interface for running jobs on local
//! machines and HPC batch schedulers. Client code describes a job once and
//! submits it through any [`JobExecutor`]; the executor tracks the job and
//! reports state changes asynchronously.
//!
//! # Overview
//!
//! - [`JobSpec`] describes what to run, with [`JobAttributes`] and
//!   [`ResourceSpec`].
//! - [`Job`] holds the current [`JobStatus`] and lets clients wait for or
//!   subscribe to state changes.
//! - [`JobExecutor`] is the contract every backend implements.
//! - [`Launcher`]s build the command line for a job (`single`, `mpirun`,
//!   `srun`).
//! - [`ExecutorRegistry`] and [`LauncherRegistry`] map names and versions to
//!   implementations.
//!
//! # Supported Executors
//!
//! | Executor | Crate |
//! |----------|-------|
//! | `local` | `psij-adapter-local` |
//! | `slurm` | `psij-sched` |
//! | `pbs` | `psij-sched` |
//!
//! # Example: Running a Job
//!
//! ```ignore
//! use std::time::Duration;
//! use psij_hal::{ExecutorConfig, ExecutorRegistry, Job, JobSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = ExecutorRegistry::new();
//!     psij_adapter_local::register(&mut registry)?;
//!
//!     let executor = registry.create("local", None, ExecutorConfig::from_env())?;
//!     let job = Job::new(JobSpec::new("/bin/echo", ["hello"]));
//!     job.set_status_callback(|job, status| println!("{job}: {status}"));
//!
//!     executor.submit(&job).await?;
//!     let status = job.wait(Some(Duration::from_secs(10))).await;
//!     println!("Final status: {:?}", status);
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Custom Executor
//!
//! ```ignore
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use psij_hal::{CallbackSlot, HalResult, Job, JobExecutor, StatusCallback};
//!
//! struct MyExecutor {
//!     callback: CallbackSlot,
//! }
//!
//! #[async_trait]
//! impl JobExecutor for MyExecutor {
//!     fn name(&self) -> &str { "mine" }
//!     fn version(&self) -> &str { "0.1.0" }
//!
//!     async fn submit(&self, job: &Arc<Job>) -> HalResult<()> {
//!         // Validate, bind, start, set native id
//!         # todo!()
//!     }
//!
//!     async fn cancel(&self, job: &Job) -> HalResult<()> { # todo!() }
//!     async fn list(&self) -> HalResult<Vec<String>> { # todo!() }
//!     async fn attach(&self, job: &Arc<Job>, native_id: &str) -> HalResult<()> { # todo!() }
//!
//!     fn set_status_callback(&self, callback: StatusCallback) {
//!         self.callback.set(callback);
//!     }
//!
//!     fn status_callback(&self) -> Option<StatusCallback> {
//!         self.callback.get()
//!     }
//! }
//! ```

pub mod error;
pub mod executor;
pub mod job;
pub mod launcher;
pub mod registry;
pub mod spec;
pub mod state;
pub mod status;

pub use error::{HalError, HalResult};
pub use executor::{
    CallbackSlot, ExecutorConfig, JobExecutor, LauncherCache, WORK_DIR_ENV, check_attachable,
    check_submittable, default_work_directory,
};
pub use job::{Job, StatusCallback};
pub use launcher::{LAUNCHER_DONE_MARKER, Launcher, MultipleLauncher, SingleLauncher};
pub use registry::{ExecutorRegistry, LauncherRegistry, PluginVersion, VersionConstraint};
pub use spec::{ComputedResources, JobAttributes, JobSpec, ResourceSpec};
pub use state::JobState;
pub use status::{JobStatus, StatusMetadata};
