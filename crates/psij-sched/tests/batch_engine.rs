//! Integration tests for the batch executor using a shell-backed scheduler.
//!
//! The stub scheduler runs `sh -c` snippets in place of real scheduler
//! commands, so the tests exercise submission, queue polling, error
//! escalation and exit-code reconciliation without a cluster.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use psij_hal::{Job, JobExecutor, JobSpec, JobState, JobStatus};
use psij_sched::{
    BatchConfig, BatchExecutor, BatchScheduler, SchedError, SchedResult, ScriptContext,
    last_token, write_launch_section,
};

/// Scheduler whose commands are shell snippets that tests can swap.
#[derive(Default)]
struct StubScheduler {
    submit: Mutex<String>,
    status: Mutex<String>,
    cancel: Mutex<String>,
}

fn sh(script: &Mutex<String>) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.lock().unwrap().clone()]
}

impl BatchScheduler for StubScheduler {
    fn name(&self) -> &str {
        "stub"
    }

    fn generate_submit_script(
        &self,
        _job: &Job,
        ctx: &ScriptContext<'_>,
        out: &mut dyn Write,
    ) -> SchedResult<()> {
        out.write_all(b"#!/bin/sh\n")?;
        write_launch_section(ctx, "STUB_JOB_ID", out)
    }

    fn submit_command(&self, _job: &Job, _script_path: &Path) -> Vec<String> {
        sh(&self.submit)
    }

    fn job_id_from_submit_output(&self, out: &str) -> SchedResult<String> {
        last_token(out).ok_or_else(|| SchedError::Parse("empty submit output".into()))
    }

    fn cancel_command(&self, _native_id: &str) -> Vec<String> {
        sh(&self.cancel)
    }

    fn is_benign_cancel_failure(&self, _exit_code: i32, output: &str) -> bool {
        output.contains("already gone")
    }

    fn status_command(&self, _native_ids: &[String]) -> Vec<String> {
        sh(&self.status)
    }

    fn parse_status_output(&self, out: &str) -> SchedResult<HashMap<String, JobStatus>> {
        let mut statuses = HashMap::new();
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            let mut cols = line.split_whitespace();
            let (Some(id), Some(state)) = (cols.next(), cols.next()) else {
                return Err(SchedError::Parse(format!("bad line: {line}")));
            };
            let state = match state {
                "Q" => JobState::Queued,
                "R" => JobState::Active,
                other => return Err(SchedError::Parse(format!("bad state: {other}"))),
            };
            statuses.insert(id.to_string(), JobStatus::new(state));
        }
        Ok(statuses)
    }

    fn list_command(&self) -> Vec<String> {
        vec!["sh".into(), "-c".into(), "printf '11\\n12\\n'".into()]
    }
}

impl StubScheduler {
    fn set_submit(&self, script: &str) {
        *self.submit.lock().unwrap() = script.to_string();
    }

    fn set_status(&self, script: &str) {
        *self.status.lock().unwrap() = script.to_string();
    }

    fn set_cancel(&self, script: &str) {
        *self.cancel.lock().unwrap() = script.to_string();
    }
}

fn executor(dir: &Path, threshold: u32) -> Arc<BatchExecutor<StubScheduler>> {
    let config = BatchConfig::default()
        .with_work_directory(dir)
        .with_initial_delay(Duration::from_secs(3600))
        .with_polling_interval(Duration::from_secs(3600))
        .with_error_threshold(threshold)
        .with_command_timeout(Duration::from_secs(10));
    BatchExecutor::new(StubScheduler::default(), config)
}

fn aux_file(exec: &BatchExecutor<StubScheduler>, name: &str) -> PathBuf {
    exec.work_directory().join(name)
}

fn record_states(job: &Job) -> Arc<Mutex<Vec<JobState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    job.set_status_callback(move |_, status| sink.lock().unwrap().push(status.state));
    seen
}

// ---------------------------------------------------------------------------
// Submission and lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_poll_complete() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    exec.scheduler().set_submit("echo 'Submitted job 99'");

    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    let seen = record_states(&job);

    exec.submit(&job).await.unwrap();
    assert_eq!(job.state(), JobState::Queued);
    assert_eq!(job.native_id(), Some("99"));
    assert_eq!(
        job.status().metadata.unwrap()["native_id"],
        serde_json::json!("99")
    );
    assert!(job.is_bound());
    assert_eq!(exec.tracked_jobs(), 1);

    let script_path = aux_file(&exec, &format!("{}.job", job.id()));
    let script = std::fs::read_to_string(&script_path).unwrap();
    assert!(script.starts_with("#!/bin/sh\n"));
    assert!(script.contains("/bin/true\n"));

    exec.scheduler().set_status("echo '99 R'");
    exec.poll().await;
    assert_eq!(job.state(), JobState::Active);

    std::fs::write(aux_file(&exec, "99.ec"), "0\n").unwrap();
    std::fs::write(aux_file(&exec, "99.out"), "").unwrap();

    // Absent from the status output means completed
    exec.scheduler().set_status("true");
    exec.poll().await;

    let status = job.status();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.exit_code, Some(0));
    assert_eq!(exec.tracked_jobs(), 0);
    assert!(!script_path.exists());
    assert!(!aux_file(&exec, "99.ec").exists());
    assert!(!aux_file(&exec, "99.out").exists());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![JobState::Queued, JobState::Active, JobState::Completed]
    );
}

#[tokio::test]
async fn test_nonzero_exit_code_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    exec.scheduler().set_submit("echo 7");

    let job = Job::new(JobSpec::new("/bin/false", Vec::<String>::new()));
    exec.submit(&job).await.unwrap();

    std::fs::write(aux_file(&exec, "7.ec"), "3").unwrap();
    std::fs::write(aux_file(&exec, "7.out"), "boom").unwrap();
    exec.scheduler().set_status("true");
    exec.poll().await;

    let status = job.status();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.exit_code, Some(3));
    assert_eq!(status.message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_keep_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = BatchConfig::default()
        .with_work_directory(dir.path())
        .with_initial_delay(Duration::from_secs(3600))
        .with_keep_files(true);
    let exec = BatchExecutor::new(StubScheduler::default(), config);
    exec.scheduler().set_submit("echo 8");

    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    exec.submit(&job).await.unwrap();
    std::fs::write(aux_file(&exec, "8.ec"), "0").unwrap();
    exec.scheduler().set_status("true");
    exec.poll().await;

    assert_eq!(job.state(), JobState::Completed);
    assert!(aux_file(&exec, "8.ec").exists());
    assert!(aux_file(&exec, &format!("{}.job", job.id())).exists());
}

#[tokio::test]
async fn test_submit_failure() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    exec.scheduler().set_submit("echo 'queue closed' >&2; exit 2");

    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    let err = exec.submit(&job).await.unwrap_err();
    assert!(err.to_string().contains("queue closed"));
    assert_eq!(job.state(), JobState::New);
    assert_eq!(exec.tracked_jobs(), 0);
}

#[tokio::test]
async fn test_submit_rejects_non_new_job() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    exec.scheduler().set_submit("echo 5");

    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    exec.submit(&job).await.unwrap();
    assert!(exec.submit(&job).await.is_err());
}

// ---------------------------------------------------------------------------
// Queue polling errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_polling_errors_fail_jobs_past_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let a = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    let b = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    exec.attach(&a, "1").await.unwrap();
    exec.attach(&b, "2").await.unwrap();

    exec.scheduler().set_status("echo 'scheduler down' >&2; exit 1");
    exec.poll().await;
    exec.poll().await;
    assert_eq!(a.state(), JobState::New);
    assert_eq!(exec.tracked_jobs(), 2);

    exec.poll().await;
    for job in [&a, &b] {
        let status = job.status();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.unwrap().contains("scheduler down"));
    }
    assert_eq!(exec.tracked_jobs(), 0);
}

#[tokio::test]
async fn test_mass_failure_of_queued_job() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 0);
    exec.scheduler().set_submit("echo 12");

    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    let seen = record_states(&job);
    exec.submit(&job).await.unwrap();
    assert_eq!(job.state(), JobState::Queued);

    exec.scheduler().set_status("exit 1");
    exec.poll().await;

    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(*seen.lock().unwrap(), vec![JobState::Queued, JobState::Failed]);
}

#[tokio::test]
async fn test_successful_poll_resets_error_count() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    exec.attach(&job, "3").await.unwrap();

    exec.scheduler().set_status("exit 1");
    exec.poll().await;
    exec.poll().await;

    exec.scheduler().set_status("echo '3 Q'");
    exec.poll().await;
    assert_eq!(job.state(), JobState::Queued);

    exec.scheduler().set_status("exit 1");
    exec.poll().await;
    exec.poll().await;
    assert_eq!(job.state(), JobState::Queued);
    assert_eq!(exec.tracked_jobs(), 1);
}

#[tokio::test]
async fn test_unparseable_status_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    exec.attach(&job, "4").await.unwrap();

    exec.scheduler().set_status("echo '4 ???'");
    exec.poll().await;

    let status = job.status();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.message.unwrap().contains("bad state"));
}

// ---------------------------------------------------------------------------
// Cancel, list, attach
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let job = Job::new(JobSpec::new("/bin/sleep", ["60"]));
    exec.attach(&job, "6").await.unwrap();

    exec.scheduler().set_cancel("true");
    job.cancel().await.unwrap();

    exec.scheduler().set_cancel("echo 'job already gone' >&2; exit 1");
    exec.cancel(&job).await.unwrap();

    exec.scheduler().set_cancel("echo 'permission denied' >&2; exit 1");
    let err = exec.cancel(&job).await.unwrap_err();
    assert!(err.to_string().contains("Failed to cancel job: permission denied"));
}

#[tokio::test]
async fn test_cancel_without_native_id() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let job = Job::new(JobSpec::new("/bin/true", Vec::<String>::new()));
    assert!(exec.cancel(&job).await.is_err());
}

#[tokio::test]
async fn test_list() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    assert_eq!(exec.list().await.unwrap(), vec!["11", "12"]);
}

#[tokio::test]
async fn test_attach_same_job_twice_fails() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let job = Job::detached();
    exec.attach(&job, "9").await.unwrap();
    assert_eq!(job.native_id(), Some("9"));
    assert!(exec.attach(&job, "9").await.is_err());
    assert_eq!(exec.tracked_jobs(), 1);
}

#[tokio::test]
async fn test_jobs_sharing_native_id_see_same_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let a = Job::detached();
    let b = Job::detached();
    exec.attach(&a, "5").await.unwrap();
    exec.attach(&b, "5").await.unwrap();
    assert_eq!(exec.tracked_jobs(), 1);

    std::fs::create_dir_all(exec.work_directory()).unwrap();
    std::fs::write(aux_file(&exec, "5.ec"), "1").unwrap();
    std::fs::write(aux_file(&exec, "5.out"), "oops").unwrap();
    exec.scheduler().set_status("true");
    exec.poll().await;

    for job in [&a, &b] {
        let status = job.status();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.exit_code, Some(1));
        assert_eq!(status.message.as_deref(), Some("oops"));
    }
    assert_eq!(exec.tracked_jobs(), 0);
    assert!(!aux_file(&exec, "5.ec").exists());
    assert!(!aux_file(&exec, "5.out").exists());
}

#[tokio::test]
async fn test_wait_follows_polled_status() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(dir.path(), 2);
    let job = Job::detached();
    exec.attach(&job, "10").await.unwrap();

    let waiter = {
        let job = job.clone();
        tokio::spawn(async move { job.wait(Some(Duration::from_secs(10))).await })
    };
    exec.scheduler().set_status("true");
    exec.poll().await;

    let status = waiter.await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
}
