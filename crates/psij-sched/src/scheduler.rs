//! Per-scheduler adapter contract.
//!
//! A [`BatchScheduler`] knows how to talk to one batch system: how to write
//! a submit script, which commands submit, cancel, query and list jobs, and
//! how to read their output. Everything else (work directory, queue polling,
//! error escalation, exit-code reconciliation) lives in
//! [`BatchExecutor`](crate::BatchExecutor).
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `generate_submit_script()` | write the job script |
//! | `submit_command()` / `job_id_from_submit_output()` | submit, read native id |
//! | `cancel_command()` / `is_benign_cancel_failure()` | cancel |
//! | `status_command()` / `parse_status_output()` | queue polling |
//! | `list_command()` / `parse_list_output()` | list own jobs |

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use psij_hal::{Job, JobStatus};

use crate::error::SchedResult;
use crate::script::ScriptContext;

/// Adapter for one batch scheduler.
pub trait BatchScheduler: Send + Sync + 'static {
    /// Executor name, also the work subdirectory name.
    fn name(&self) -> &str;

    /// Executor version.
    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    /// Write the submit script for `job`.
    ///
    /// The script must append the launched command's output to
    /// `<script_dir>/<native id>.out` and write its exit code to
    /// `<script_dir>/<native id>.ec`.
    fn generate_submit_script(
        &self,
        job: &Job,
        ctx: &ScriptContext<'_>,
        out: &mut dyn Write,
    ) -> SchedResult<()>;

    /// Command submitting the script at `script_path`.
    fn submit_command(&self, job: &Job, script_path: &Path) -> Vec<String>;

    /// Extract the native id from the submit command's stdout.
    fn job_id_from_submit_output(&self, out: &str) -> SchedResult<String>;

    /// Command cancelling `native_id`.
    fn cancel_command(&self, native_id: &str) -> Vec<String>;

    /// Whether a failed cancel only means the job already finished.
    fn is_benign_cancel_failure(&self, _exit_code: i32, _output: &str) -> bool {
        false
    }

    /// Command reporting the status of `native_ids`.
    fn status_command(&self, native_ids: &[String]) -> Vec<String>;

    /// Parse the status command's stdout into `native id -> status`.
    /// Jobs missing from the result are assumed completed.
    fn parse_status_output(&self, out: &str) -> SchedResult<HashMap<String, JobStatus>>;

    /// Command listing the current user's jobs.
    fn list_command(&self) -> Vec<String>;

    /// Parse the list command's stdout into native ids.
    fn parse_list_output(&self, out: &str) -> SchedResult<Vec<String>> {
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Last whitespace-separated token of the submit output.
pub fn last_token(out: &str) -> Option<String> {
    out.split_whitespace().last().map(str::to_string)
}

/// Name of the submitting user.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}
