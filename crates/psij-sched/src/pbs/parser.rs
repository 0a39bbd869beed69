//! Parsers for PBS command output.

use std::collections::HashMap;

use psij_hal::{JobState, JobStatus};
use serde::Deserialize;

use crate::error::{SchedError, SchedResult};

/// Exit status PBS reports for a job killed by `qdel`.
const KILLED_EXIT_STATUS: i32 = 265;

/// Top level of `qstat -F json` output.
#[derive(Debug, Deserialize)]
struct QstatReport {
    #[serde(rename = "Jobs", default)]
    jobs: HashMap<String, QstatJob>,
}

#[derive(Debug, Deserialize)]
struct QstatJob {
    job_state: String,
    #[serde(rename = "Exit_status")]
    exit_status: Option<i32>,
    comment: Option<String>,
}

/// Parse qsub output to extract job ID.
///
/// qsub output format varies by PBS implementation:
/// - PBS Pro: "12345.pbs-server"
/// - OpenPBS: "12345.hostname"
pub fn parse_qsub_output(output: &str) -> SchedResult<String> {
    let Some(job_id) = output.split_whitespace().last() else {
        return Err(SchedError::Parse("Empty qsub output".to_string()));
    };

    // Format: <number>[.<server>]
    let number = job_id.split('.').next().unwrap_or_default();
    if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit() || c == '[' || c == ']') {
        return Ok(job_id.to_string());
    }

    Err(SchedError::Parse(format!(
        "Unexpected qsub output format: {}",
        output.trim()
    )))
}

/// Parse `qstat -f -F json -x` output into job statuses.
///
/// ```text
/// {
///     "Jobs": {
///         "12345.pbs-server": {
///             "job_state": "F",
///             "Exit_status": 0,
///             "comment": "Job run at ... and finished"
///         }
///     }
/// }
/// ```
pub fn parse_qstat_json_output(output: &str) -> SchedResult<HashMap<String, JobStatus>> {
    if output.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let report: QstatReport = serde_json::from_str(output)?;
    let mut statuses = HashMap::with_capacity(report.jobs.len());

    for (job_id, info) in report.jobs {
        let mut state = parse_pbs_state(&info.job_state)?;
        let mut exit_code = None;

        if state == JobState::Completed {
            match info.exit_status {
                Some(KILLED_EXIT_STATUS) => state = JobState::Canceled,
                Some(code) if code != 0 => {
                    state = JobState::Failed;
                    exit_code = Some(code);
                }
                _ => {}
            }
        }

        let mut status = JobStatus::new(state);
        if let Some(code) = exit_code {
            status = status.with_exit_code(code);
        }
        if let Some(comment) = info.comment {
            status = status.with_message(comment);
        }
        statuses.insert(job_id, status);
    }

    Ok(statuses)
}

/// Map a PBS state letter to a job state.
pub fn parse_pbs_state(state: &str) -> SchedResult<JobState> {
    let state = match state {
        "B" | "E" | "R" => JobState::Active,
        "F" | "X" => JobState::Completed,
        "H" | "M" | "Q" | "S" | "T" | "U" | "W" => JobState::Queued,
        other => {
            return Err(SchedError::Parse(format!("Unknown PBS state: {}", other)));
        }
    };
    Ok(state)
}

/// Parse brief `qstat -u <user>` output into job ids.
///
/// ```text
/// Job ID          Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
/// --------------- -------- -------- ---------- ------ --- --- ------ ----- - -----
/// 12345.server    user     workq    my_job      4242   1   1    --  00:10 R 00:01
/// ```
pub fn parse_qstat_list_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|token| token.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// Whether qdel output says the job is already gone.
pub fn is_finished_job_message(output: &str) -> bool {
    output.contains("has finished")
        || output.contains("has already finished")
        || output.contains("Unknown Job Id")
}
