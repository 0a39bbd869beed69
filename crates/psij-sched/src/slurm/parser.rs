//! Parsers for SLURM command output.

use std::collections::HashMap;

use psij_hal::{JobState, JobStatus};

use crate::error::{SchedError, SchedResult};

/// Parse sbatch output to extract job ID.
///
/// sbatch output format: "Submitted batch job 12345"
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();

    if let Some(job_id) = trimmed.split_whitespace().last() {
        if job_id.chars().all(|c| c.is_ascii_digit() || c == '_' || c == ';') {
            return Ok(job_id.to_string());
        }
    }

    Err(SchedError::Parse(format!(
        "Unexpected sbatch output format: {}",
        trimmed
    )))
}

/// Parse squeue output into job statuses.
///
/// Expected format (from `squeue -O JobArrayID,StateCompact,Reason`):
/// ```text
/// JOBID               ST                  REASON
/// 12345               R                   None
/// 12346               PD                  Resources
/// ```
pub fn parse_squeue_output(output: &str) -> SchedResult<HashMap<String, JobStatus>> {
    let mut statuses = HashMap::new();

    // Skip header line
    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() != 3 {
            return Err(SchedError::Parse(format!(
                "Unexpected squeue line: {}",
                line
            )));
        }

        let state = parse_slurm_state(cols[1])?;
        let mut status = JobStatus::new(state);
        if state == JobState::Failed {
            status = status.with_message(reason_message(cols[2]));
        }
        statuses.insert(cols[0].to_string(), status);
    }

    Ok(statuses)
}

/// Map a compact SLURM state code to a job state.
pub fn parse_slurm_state(state: &str) -> SchedResult<JobState> {
    let state = match state {
        "PD" | "CF" | "RD" | "RF" | "RH" | "RV" => JobState::Queued,
        "R" | "CG" | "RQ" | "SO" | "RS" | "SI" | "SE" | "ST" | "S" => JobState::Active,
        "CD" => JobState::Completed,
        "CA" => JobState::Canceled,
        "BF" | "DL" | "F" | "NF" | "OOM" | "PR" | "TO" => JobState::Failed,
        other => {
            return Err(SchedError::Parse(format!(
                "Unknown SLURM state: {}",
                other
            )));
        }
    };
    Ok(state)
}

/// Human-readable description of a SLURM reason code.
pub fn reason_message(reason: &str) -> String {
    let msg = match reason {
        "AssociationJobLimit" => "The job's association has reached its maximum job count.",
        "AssociationResourceLimit" => "The job's association has reached some resource limit.",
        "AssociationTimeLimit" => "The job's association has reached its time limit.",
        "BadConstraints" => "The job's constraints can not be satisfied.",
        "BeginTime" => "The job's earliest start time has not yet been reached.",
        "Cleaning" => "The job is being requeued and still cleaning up from its previous execution.",
        "Dependency" => "This job is waiting for a dependent job to complete.",
        "FrontEndDown" => "No front end node is available to execute this job.",
        "InactiveLimit" => "The job reached the system InactiveLimit.",
        "InvalidAccount" => "The job's account is invalid.",
        "InvalidQOS" => "The job's QOS is invalid.",
        "JobHeldAdmin" => "The job is held by a system administrator.",
        "JobHeldUser" => "The job is held by the user.",
        "JobLaunchFailure" => {
            "The job could not be launched. This may be due to a file system problem, invalid program name, etc."
        }
        "Licenses" => "The job is waiting for a license.",
        "NodeDown" => "A node required by the job is down.",
        "NonZeroExitCode" => "The job terminated with a non-zero exit code.",
        "PartitionDown" => "The partition required by this job is in a DOWN state.",
        "PartitionInactive" => {
            "The partition required by this job is in an Inactive state and not able to start jobs."
        }
        "PartitionNodeLimit" => {
            "The number of nodes required by this job is outside of its partition's current limits."
        }
        "PartitionTimeLimit" => "The job's time limit exceeds its partition's current time limit.",
        "Priority" => {
            "One or more higher priority jobs exist for this partition or advanced reservation."
        }
        "Prolog" => "Its PrologSlurmctld program is still running.",
        "QOSJobLimit" => "The job's QOS has reached its maximum job count.",
        "QOSResourceLimit" => "The job's QOS has reached some resource limit.",
        "QOSTimeLimit" => "The job's QOS has reached its time limit.",
        "ReqNodeNotAvail" => {
            "Some node specifically required by the job is not currently available."
        }
        "Reservation" => "The job is waiting its advanced reservation to become available.",
        "Resources" => "The job is waiting for resources to become available.",
        "SystemFailure" => "Failure of the Slurm system, a file system, the network, etc.",
        "TimeLimit" => "The job exhausted its time limit.",
        "QOSUsageThreshold" => "Required QOS threshold has been breached.",
        "WaitingForScheduling" => {
            "No reason has been set for this job yet. Waiting for the scheduler to determine the appropriate reason."
        }
        other => return other.to_string(),
    };
    msg.to_string()
}

/// Whether scancel output says the job is already gone.
pub fn is_finished_job_message(output: &str) -> bool {
    output.contains("already completing")
        || output.contains("Job has already finished")
        || output.contains("Invalid job id specified")
}
