//! Local executor implementation.

use std::os::unix::fs::MetadataExt;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, info, instrument};

use psij_hal::{
    CallbackSlot, ExecutorConfig, HalError, HalResult, Job, JobExecutor, JobSpec, JobState,
    JobStatus, LauncherCache, StatusCallback, check_attachable, check_submittable,
};

use crate::reaper::{ProcessEntry, ProcessReaper, TrackedProcess, pid_alive};

/// Executor running jobs as child processes of this process.
///
/// Combined stdout and stderr of each job are captured in an anonymous
/// temporary file and reported in the failure message if the job fails.
pub struct LocalExecutor {
    config: ExecutorConfig,
    launchers: LauncherCache,
    /// Running processes by job id.
    processes: Mutex<FxHashMap<String, Arc<ProcessEntry>>>,
    callback: CallbackSlot,
    self_ref: Weak<Self>,
}

impl LocalExecutor {
    /// Create a new local executor.
    pub fn new(config: ExecutorConfig) -> Arc<Self> {
        let launchers = LauncherCache::new(config.launchers.clone());
        Arc::new_cyclic(|self_ref| Self {
            config,
            launchers,
            processes: Mutex::new(FxHashMap::default()),
            callback: CallbackSlot::default(),
            self_ref: self_ref.clone(),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of processes not yet reaped.
    pub fn running(&self) -> usize {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn as_dyn(&self) -> Weak<dyn JobExecutor> {
        self.self_ref.clone()
    }

    /// Drop the process entry of `job`.
    pub(crate) fn forget(&self, job: &Job) {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job.id());
    }

    /// Hand `entry` to the reaper. The job's `Queued` and `Active` statuses
    /// must already be committed, so the reaper's final status comes last.
    fn start_reaping(&self, entry: Arc<ProcessEntry>) -> HalResult<()> {
        let job = entry.job().clone();
        if let Err(e) = ProcessReaper::global().register(entry) {
            self.forget(&job);
            self.set_job_status(
                &job,
                JobStatus::new(JobState::Failed).with_message(e.to_string()),
            );
            return Err(e);
        }
        Ok(())
    }

    fn entry(&self, job: &Job) -> Option<Arc<ProcessEntry>> {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job.id())
            .cloned()
    }

    fn spawn(&self, job: &Arc<Job>, spec: &JobSpec) -> HalResult<Option<Arc<ProcessEntry>>> {
        let launcher = self.launchers.get(spec)?;
        let argv = launcher.launch_command(job)?;
        debug!("Job {}: launch command: {:?}", job.id(), argv);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HalError::InvalidJob("Empty launch command".into()))?;

        let output = tempfile::tempfile()?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(output.try_clone()?)
            .stderr(output.try_clone()?);
        if let Some(dir) = &spec.directory {
            cmd.current_dir(dir);
        }
        if !spec.inherit_environment {
            cmd.env_clear();
        }
        cmd.envs(&spec.environment);

        // Hold the table lock so a concurrent cancel() sees either no
        // process and a NEW job, or the registered process.
        let mut processes = self.processes.lock().unwrap_or_else(PoisonError::into_inner);
        if job.state() == JobState::Canceled {
            debug!("Job {}: canceled before launch", job.id());
            return Ok(None);
        }
        let child = cmd
            .spawn()
            .map_err(|e| HalError::submit(format!("Failed to start {}: {}", program, e)))?;
        let pid = child.id();
        job.set_native_id(pid.to_string())?;

        let entry = Arc::new(ProcessEntry::new(
            job.clone(),
            self.self_ref.clone(),
            Some(launcher),
            TrackedProcess::Child { child, output },
        ));
        processes.insert(job.id().to_string(), entry.clone());
        drop(processes);

        info!("Job {}: started process {}", job.id(), pid);
        Ok(Some(entry))
    }
}

#[async_trait]
impl JobExecutor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    #[instrument(skip_all, fields(job = %job.id()))]
    async fn submit(&self, job: &Arc<Job>) -> HalResult<()> {
        let spec = check_submittable(job)?;
        job.bind(self.as_dyn())?;

        let Some(entry) = self.spawn(job, &spec)? else {
            return Ok(());
        };
        self.set_job_status(job, JobStatus::new(JobState::Queued));
        self.set_job_status(job, JobStatus::new(JobState::Active));

        // Canceled while launching
        if job.state() == JobState::Canceled {
            entry.request_kill();
        }
        self.start_reaping(entry)
    }

    async fn cancel(&self, job: &Job) -> HalResult<()> {
        match self.entry(job) {
            Some(entry) => {
                debug!("Job {}: kill requested", job.id());
                entry.request_kill();
            }
            None if job.state() == JobState::New => {
                self.set_job_status(job, JobStatus::new(JobState::Canceled));
                // submit() may have launched the process in the meantime
                if let Some(entry) = self.entry(job) {
                    entry.request_kill();
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn list(&self) -> HalResult<Vec<String>> {
        // SAFETY: getuid(2) cannot fail.
        let uid = unsafe { libc::getuid() };
        let mut pids = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            match entry.metadata() {
                Ok(meta) if meta.uid() == uid => pids.push(name.to_string()),
                _ => {}
            }
        }
        Ok(pids)
    }

    async fn attach(&self, job: &Arc<Job>, native_id: &str) -> HalResult<()> {
        check_attachable(job)?;
        let pid: i32 = native_id
            .trim()
            .parse()
            .map_err(|_| HalError::InvalidJob(format!("Invalid pid: {}", native_id)))?;
        if !pid_alive(pid) {
            return Err(HalError::InvalidJob(format!("No such process: {}", pid)));
        }
        job.bind(self.as_dyn())?;
        job.set_native_id(native_id.trim())?;

        let entry = Arc::new(ProcessEntry::new(
            job.clone(),
            self.self_ref.clone(),
            None,
            TrackedProcess::Attached { pid },
        ));
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.id().to_string(), entry.clone());
        info!("Job {}: attached to process {}", job.id(), pid);

        self.set_job_status(job, JobStatus::new(JobState::Queued));
        self.set_job_status(job, JobStatus::new(JobState::Active));
        self.start_reaping(entry)
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        self.callback.set(callback);
    }

    fn status_callback(&self) -> Option<StatusCallback> {
        self.callback.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_new_job() {
        let executor = LocalExecutor::new(ExecutorConfig::default());
        let job = Job::new(JobSpec::new("/bin/sleep", ["10"]));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        job.set_status_callback(move |_, status| sink.lock().unwrap().push(status.state));

        executor.cancel(&job).await.unwrap();
        assert_eq!(job.state(), JobState::Canceled);
        assert_eq!(*seen.lock().unwrap(), vec![JobState::Canceled]);
        assert!(executor.submit(&job).await.is_err());
        assert_eq!(executor.running(), 0);
    }

    #[tokio::test]
    async fn test_attach_invalid_pid() {
        let executor = LocalExecutor::new(ExecutorConfig::default());
        let job = Job::detached();
        assert!(executor.attach(&job, "not-a-pid").await.is_err());
        assert!(executor.attach(&job, "-1").await.is_err());
        assert!(!job.is_bound());
    }

    #[tokio::test]
    async fn test_list_includes_self() {
        let executor = LocalExecutor::new(ExecutorConfig::default());
        let pids = executor.list().await.unwrap();
        assert!(pids.contains(&std::process::id().to_string()));
    }
}
