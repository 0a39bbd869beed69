//! SLURM adapter for job submission and tracking.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use psij_hal::{Job, JobStatus};
use serde::{Deserialize, Serialize};

use crate::error::SchedResult;
use crate::executor::BatchExecutor;
use crate::scheduler::BatchScheduler;
use crate::script::ScriptContext;
use crate::slurm::parser;
use crate::slurm::templates;

/// Executor submitting jobs through SLURM.
pub type SlurmExecutor = BatchExecutor<SlurmScheduler>;

/// Configuration for SLURM adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlurmConfig {
    /// Partition used when the job names no queue.
    pub default_partition: Option<String>,

    /// Account used when the job names no project.
    pub default_account: Option<String>,

    /// Modules to load before running.
    pub modules: Vec<String>,

    /// Additional `#SBATCH` directives, without the prefix.
    pub extra_directives: Vec<String>,
}

/// Adapter for SLURM HPC scheduler.
#[derive(Debug, Default)]
pub struct SlurmScheduler {
    config: SlurmConfig,
}

impl SlurmScheduler {
    /// Create a new SLURM adapter with the given configuration.
    pub fn new(config: SlurmConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }
}

impl BatchScheduler for SlurmScheduler {
    fn name(&self) -> &str {
        "slurm"
    }

    fn generate_submit_script(
        &self,
        job: &Job,
        ctx: &ScriptContext<'_>,
        out: &mut dyn Write,
    ) -> SchedResult<()> {
        let script = templates::generate_batch_script(job, ctx, &self.config)?;
        out.write_all(script.as_bytes())?;
        Ok(())
    }

    fn submit_command(&self, _job: &Job, script_path: &Path) -> Vec<String> {
        vec!["sbatch".into(), script_path.display().to_string()]
    }

    fn job_id_from_submit_output(&self, out: &str) -> SchedResult<String> {
        parser::parse_sbatch_output(out)
    }

    fn cancel_command(&self, native_id: &str) -> Vec<String> {
        vec!["scancel".into(), "-Q".into(), native_id.into()]
    }

    fn is_benign_cancel_failure(&self, _exit_code: i32, output: &str) -> bool {
        parser::is_finished_job_message(output)
    }

    fn status_command(&self, _native_ids: &[String]) -> Vec<String> {
        ["squeue", "-O", "JobArrayID,StateCompact,Reason", "-t", "all", "--me"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn parse_status_output(&self, out: &str) -> SchedResult<HashMap<String, JobStatus>> {
        parser::parse_squeue_output(out)
    }

    fn list_command(&self) -> Vec<String> {
        ["squeue", "--me", "-o", "%i", "-h", "-r", "-t", "all"]
            .into_iter()
            .map(String::from)
            .collect()
    }
}
