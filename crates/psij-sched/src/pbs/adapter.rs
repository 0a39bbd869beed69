//! PBS adapter for job submission and tracking.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use psij_hal::{Job, JobStatus};
use serde::{Deserialize, Serialize};

use crate::error::SchedResult;
use crate::executor::BatchExecutor;
use crate::pbs::parser;
use crate::pbs::templates;
use crate::scheduler::{current_user, BatchScheduler};
use crate::script::ScriptContext;

/// Executor submitting jobs through PBS.
pub type PbsExecutor = BatchExecutor<PbsScheduler>;

/// Configuration for PBS adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PbsConfig {
    /// Queue used when the job names no queue.
    pub default_queue: Option<String>,

    /// Account used when the job names no project.
    pub default_account: Option<String>,

    /// Modules to load before running.
    pub modules: Vec<String>,
}

/// Adapter for PBS Pro / OpenPBS.
#[derive(Debug, Default)]
pub struct PbsScheduler {
    config: PbsConfig,
}

impl PbsScheduler {
    pub fn new(config: PbsConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &PbsConfig {
        &self.config
    }
}

impl BatchScheduler for PbsScheduler {
    fn name(&self) -> &str {
        "pbs"
    }

    fn generate_submit_script(
        &self,
        job: &Job,
        ctx: &ScriptContext<'_>,
        out: &mut dyn Write,
    ) -> SchedResult<()> {
        let script = templates::generate_pbs_script(job, ctx, &self.config)?;
        out.write_all(script.as_bytes())?;
        Ok(())
    }

    fn submit_command(&self, _job: &Job, script_path: &Path) -> Vec<String> {
        vec!["qsub".into(), script_path.display().to_string()]
    }

    fn job_id_from_submit_output(&self, out: &str) -> SchedResult<String> {
        parser::parse_qsub_output(out)
    }

    fn cancel_command(&self, native_id: &str) -> Vec<String> {
        vec!["qdel".into(), native_id.into()]
    }

    fn is_benign_cancel_failure(&self, _exit_code: i32, output: &str) -> bool {
        parser::is_finished_job_message(output)
    }

    fn status_command(&self, native_ids: &[String]) -> Vec<String> {
        let mut cmd: Vec<String> = ["qstat", "-f", "-F", "json", "-x"]
            .into_iter()
            .map(String::from)
            .collect();
        cmd.extend(native_ids.iter().cloned());
        cmd
    }

    fn parse_status_output(&self, out: &str) -> SchedResult<HashMap<String, JobStatus>> {
        parser::parse_qstat_json_output(out)
    }

    fn list_command(&self) -> Vec<String> {
        vec!["qstat".into(), "-u".into(), current_user()]
    }

    fn parse_list_output(&self, out: &str) -> SchedResult<Vec<String>> {
        Ok(parser::parse_qstat_list_output(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbs_commands() {
        let pbs = PbsScheduler::default();
        let job = Job::new(psij_hal::JobSpec::default());
        assert_eq!(
            pbs.submit_command(&job, Path::new("/w/pbs/a.job")),
            vec!["qsub", "/w/pbs/a.job"]
        );
        assert_eq!(pbs.cancel_command("7.srv"), vec!["qdel", "7.srv"]);
        assert_eq!(
            pbs.status_command(&["7.srv".into(), "8.srv".into()]),
            vec!["qstat", "-f", "-F", "json", "-x", "7.srv", "8.srv"]
        );
        assert_eq!(pbs.list_command()[..2], ["qstat", "-u"]);
    }
}
