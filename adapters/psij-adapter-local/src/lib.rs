//! PSI/J Local Executor
//!
//! This crate runs jobs as child processes of the current process. It is
//! useful for testing, development, and workflows on a single machine.
//!
//! # Features
//!
//! - **Launchers**: jobs start through the configured launcher (`single` by
//!   default, or `mpirun`/`srun`)
//! - **Captured Output**: combined stdout/stderr ends up in the failure
//!   message of failed jobs
//! - **Attach**: existing processes can be tracked by pid
//!
//! # Exit Mapping
//!
//! | Process exit | Job state |
//! |--------------|-----------|
//! | `0` | `Completed` |
//! | signal after `cancel()` | `Canceled` |
//! | anything else | `Failed` |
//!
//! Attached processes are not children of this process, so their exit
//! status cannot be observed; they always end as `Completed`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use psij_adapter_local::LocalExecutor;
//! use psij_hal::{ExecutorConfig, Job, JobExecutor, JobSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = LocalExecutor::new(ExecutorConfig::from_env());
//!
//!     let job = Job::new(JobSpec::new("/bin/echo", ["hello"]));
//!     executor.submit(&job).await?;
//!
//!     let status = job.wait(Some(Duration::from_secs(10))).await;
//!     println!("Final status: {:?}", status);
//!     Ok(())
//! }
//! ```

mod executor;
mod reaper;

use std::sync::Arc;

use psij_hal::{ExecutorRegistry, HalResult, JobExecutor};

pub use executor::LocalExecutor;
pub use reaper::REAPER_INTERVAL;

/// Register the `local` executor.
pub fn register(registry: &mut ExecutorRegistry) -> HalResult<()> {
    registry.register_factory("local", env!("CARGO_PKG_VERSION"), |config| {
        Ok(LocalExecutor::new(config) as Arc<dyn JobExecutor>)
    })
}
