//! PSI/J batch-scheduler engine for SLURM and PBS clusters
//!
//! This crate runs jobs through HPC batch schedulers by driving their
//! command-line tools. A generic [`BatchExecutor`] handles everything common
//! to batch systems; a small [`BatchScheduler`] adapter supplies the
//! scheduler-specific commands, script template and output parsers.
//!
//! # Overview
//!
//! 1. **Submission**: render a submit script into the work directory and
//!    run the submit command to obtain the native id
//! 2. **Queue polling**: a background task queries the scheduler for all
//!    tracked jobs and pushes status changes to them
//! 3. **Finalization**: the job's exit-code file decides success or
//!    failure, and its output file becomes the failure message
//!
//! # Supported Schedulers
//!
//! | Scheduler | Commands | Executor |
//! |-----------|----------|----------|
//! | SLURM | sbatch, squeue, scancel | [`SlurmExecutor`] |
//! | PBS Pro / OpenPBS | qsub, qstat, qdel | [`PbsExecutor`] |
//!
//! # Example: SLURM Submission
//!
//! ```ignore
//! use std::time::Duration;
//! use psij_hal::{JobAttributes, JobExecutor, Job, JobSpec};
//! use psij_sched::{BatchConfig, BatchExecutor, SlurmConfig, SlurmScheduler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let slurm = SlurmScheduler::new(SlurmConfig {
//!         default_partition: Some("debug".into()),
//!         ..Default::default()
//!     });
//!     let executor = BatchExecutor::new(slurm, BatchConfig::default());
//!
//!     let spec = JobSpec::new("/bin/hostname", Vec::<String>::new())
//!         .with_attributes(JobAttributes::default().with_duration(Duration::from_secs(300)));
//!     let job = Job::new(spec);
//!
//!     executor.submit(&job).await?;
//!     let status = job.wait(None).await;
//!     println!("Final status: {:?}", status);
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod functions;
pub mod pbs;
pub mod poller;
pub mod scheduler;
pub mod script;
pub mod slurm;

use std::sync::Arc;

use psij_hal::{ExecutorRegistry, HalResult, JobExecutor};

// Re-exports
pub use command::{CommandOutput, run_checked, run_command};
pub use config::{BatchConfig, KEEP_FILES_ENV};
pub use error::{SchedError, SchedResult};
pub use executor::BatchExecutor;
pub use functions::FunctionLibrary;
pub use pbs::{PbsConfig, PbsExecutor, PbsScheduler};
pub use poller::{JobRegistry, QueuePoller};
pub use scheduler::{BatchScheduler, current_user, last_token};
pub use script::{ScriptContext, write_launch_section};
pub use slurm::{SlurmConfig, SlurmExecutor, SlurmScheduler};

/// Version under which the batch executors are registered.
pub const EXECUTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register the `slurm` and `pbs` executors.
pub fn register(registry: &mut ExecutorRegistry) -> HalResult<()> {
    registry.register_factory("slurm", EXECUTOR_VERSION, |config| {
        let executor = BatchExecutor::new(
            SlurmScheduler::default(),
            BatchConfig::from_executor_config(config),
        );
        Ok(executor as Arc<dyn JobExecutor>)
    })?;
    registry.register_factory("pbs", EXECUTOR_VERSION, |config| {
        let executor = BatchExecutor::new(
            PbsScheduler::default(),
            BatchConfig::from_executor_config(config),
        );
        Ok(executor as Arc<dyn JobExecutor>)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use psij_hal::ExecutorConfig;

    #[test]
    fn test_register() {
        let mut registry = ExecutorRegistry::new();
        register(&mut registry).unwrap();
        assert_eq!(registry.available_executors(), vec!["pbs", "slurm"]);

        let dir = tempfile::tempdir().unwrap();
        let config = ExecutorConfig::default().with_work_directory(dir.path());
        let slurm = registry.create("slurm", Some(">= 0.1"), config.clone()).unwrap();
        assert_eq!(slurm.name(), "slurm");
        assert_eq!(slurm.version(), EXECUTOR_VERSION);
        assert!(registry.create("slurm", Some(">= 99"), config).is_err());
    }
}
