//! Integration tests for the demo helpers.

use psij_demos::{describe_status, executor_registry, split_command};
use psij_hal::{JobState, JobStatus};

#[test]
fn test_registry_has_all_executors() {
    let registry = executor_registry().unwrap();
    assert_eq!(registry.available_executors(), vec!["local", "pbs", "slurm"]);
}

#[test]
fn test_split_command() {
    let (exe, args) = split_command(vec!["/bin/echo".into(), "a".into(), "b".into()]).unwrap();
    assert_eq!(exe, "/bin/echo");
    assert_eq!(args, vec!["a", "b"]);
    assert!(split_command(Vec::new()).is_none());
}

#[test]
fn test_describe_status() {
    let status = JobStatus::new(JobState::Failed)
        .with_exit_code(2)
        .with_message("boom\n");
    assert_eq!(describe_status(&status), "FAILED (exit code 2): boom");
    assert_eq!(describe_status(&JobStatus::new(JobState::Active)), "ACTIVE");
}
