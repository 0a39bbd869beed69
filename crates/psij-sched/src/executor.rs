//! Generic batch-scheduler executor.
//!
//! # Submission
//!
//! ```text
//!   submit() ──→ <jobId>.job ──→ submit command ──→ native id ──→ Queued
//!                                                                  │
//!                                                          register with poller
//! ```
//!
//! # Queue polling
//!
//! One tokio task per executor polls the scheduler with a fixed delay.
//! Jobs missing from the status output are assumed completed. Consecutive
//! status-command failures beyond `queue_polling_error_threshold` fail every
//! tracked job; unparseable output fails them immediately.
//!
//! # Finalization
//!
//! When a job reaches a final state the exit code in `<nativeId>.ec`
//! overrides the reported state (non-zero means `Failed`), `<nativeId>.out`
//! becomes the failure message, and the submit script and auxiliary files
//! are removed unless `keep_files` is set.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use psij_hal::{
    CallbackSlot, HalError, HalResult, Job, JobExecutor, JobState, JobStatus, LauncherCache,
    StatusCallback, check_attachable, check_submittable,
};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{run_checked, run_command};
use crate::config::BatchConfig;
use crate::functions::FunctionLibrary;
use crate::poller::{QueuePoller, poll_loop};
use crate::scheduler::BatchScheduler;
use crate::script::ScriptContext;

/// Executor driving a batch scheduler through its command-line tools.
pub struct BatchExecutor<S: BatchScheduler> {
    scheduler: S,
    config: BatchConfig,
    work_directory: PathBuf,
    launchers: LauncherCache,
    library: FunctionLibrary,
    poller: QueuePoller,
    poll_task: OnceLock<JoinHandle<()>>,
    callback: CallbackSlot,
    self_ref: Weak<Self>,
}

impl<S: BatchScheduler> BatchExecutor<S> {
    /// Create an executor for `scheduler`.
    ///
    /// The queue-poll task starts with the first registered job.
    pub fn new(scheduler: S, config: BatchConfig) -> Arc<Self> {
        let work_directory = config.work_directory.join(scheduler.name());
        let launchers = LauncherCache::new(config.launchers.clone());
        Arc::new_cyclic(|self_ref| Self {
            scheduler,
            config,
            work_directory,
            launchers,
            library: FunctionLibrary,
            poller: QueuePoller::new(),
            poll_task: OnceLock::new(),
            callback: CallbackSlot::default(),
            self_ref: self_ref.clone(),
        })
    }

    /// The scheduler adapter.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// The configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Directory holding this executor's scripts and auxiliary files.
    pub fn work_directory(&self) -> &Path {
        &self.work_directory
    }

    /// Number of native ids tracked by the queue poller.
    pub fn tracked_jobs(&self) -> usize {
        self.poller.len()
    }

    fn as_dyn(&self) -> Weak<dyn JobExecutor> {
        self.self_ref.clone()
    }

    /// Track `job` in the queue poller, starting the poll task if needed.
    pub fn register_job(&self, job: Arc<Job>) -> HalResult<()> {
        let native_id = job
            .native_id()
            .map(str::to_string)
            .ok_or_else(|| HalError::InvalidJob(format!("Job {} has no native id", job.id())))?;
        self.ensure_polling()?;
        info!("Job {}: registering", job.id());
        if !self.poller.register(&native_id, job) {
            debug!("Job with native id {} already registered", native_id);
        }
        Ok(())
    }

    fn ensure_polling(&self) -> HalResult<()> {
        if self.poll_task.get().is_some() {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            HalError::Configuration("batch executors require a tokio runtime".into())
        })?;
        self.poll_task.get_or_init(|| {
            debug!("Starting queue poll task for {}", self.scheduler.name());
            handle.spawn(poll_loop(
                self.self_ref.clone(),
                self.config.initial_queue_polling_delay,
                self.config.queue_polling_interval,
            ))
        });
        Ok(())
    }

    /// Run one queue-poll cycle.
    pub async fn poll(&self) {
        let jobs = self.poller.snapshot();
        if jobs.is_empty() {
            return;
        }
        info!("Polling for {} jobs", jobs.len());

        let mut native_ids: Vec<String> = jobs.keys().cloned().collect();
        native_ids.sort();
        let argv = self.scheduler.status_command(&native_ids);

        let output = match run_command(&argv, self.config.command_timeout).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                self.handle_poll_error(
                    false,
                    &format!(
                        "Status command {:?} exited with {}: {}",
                        argv.first().map(String::as_str).unwrap_or_default(),
                        output.exit_code,
                        output.combined()
                    ),
                );
                return;
            }
            Err(e) => {
                self.handle_poll_error(false, &format!("Failed to poll for job status: {e}"));
                return;
            }
        };
        self.poller.reset_errors();
        debug!("Output from status command: {}", output.stdout);

        let statuses = match self.scheduler.parse_status_output(&output.stdout) {
            Ok(statuses) => statuses,
            Err(e) => {
                self.handle_poll_error(true, &format!("Failed to parse job status: {e}"));
                return;
            }
        };

        for (native_id, job_list) in jobs {
            let status = statuses
                .get(&native_id)
                .cloned()
                .unwrap_or_else(|| JobStatus::new(JobState::Completed));
            if status.is_final() {
                self.finalize(&native_id, &job_list, status);
            } else {
                for job in &job_list {
                    self.set_job_status(job, status.clone());
                }
            }
        }
    }

    fn handle_poll_error(&self, immediate: bool, message: &str) {
        warn!("Polling error: {}", message);
        let count = self.poller.record_error();
        if !immediate && count <= self.config.queue_polling_error_threshold {
            return;
        }
        self.poller.reset_errors();
        let jobs = self.poller.drain();
        error!(
            "Failing {} tracked jobs after polling errors: {}",
            jobs.len(),
            message
        );
        for (native_id, job_list) in jobs {
            self.finalize(
                &native_id,
                &job_list,
                JobStatus::new(JobState::Failed).with_message(message),
            );
        }
    }

    /// Apply a final status to every job sharing `native_id`.
    ///
    /// The auxiliary files are read once so all jobs observe the same
    /// outcome, and removed once no job is tracked under the id anymore.
    fn finalize(&self, native_id: &str, jobs: &[Arc<Job>], status: JobStatus) {
        let aux = self.read_aux_files(native_id, status.state);
        for job in jobs {
            self.apply_final_status(job, status.clone(), &aux);
        }
        if self.poller.remove_jobs(native_id, jobs) {
            self.remove_aux_files(native_id);
        }
    }

    /// Update a job with a final status reconciled against `aux`.
    fn apply_final_status(&self, job: &Job, mut status: JobStatus, aux: &AuxFiles) {
        let current = job.state();
        if current == status.state || current.is_greater_than(status.state) != Some(false) {
            return;
        }
        aux.enrich(&mut status);
        if !self.config.keep_files {
            self.remove_file(&self.script_path(job));
        }
        job.set_status(status);
    }

    fn aux_path(&self, native_id: &str, suffix: &str) -> PathBuf {
        self.work_directory.join(format!("{native_id}{suffix}"))
    }

    fn script_path(&self, job: &Job) -> PathBuf {
        self.work_directory.join(format!("{}.job", job.id()))
    }

    fn read_aux_file(&self, native_id: &str, suffix: &str) -> Option<String> {
        let path = self.aux_path(native_id, suffix);
        debug!("Attempting to read {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist", path.display());
                None
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Read `<nativeId>.ec` and `<nativeId>.out`. Canceled jobs skip both.
    fn read_aux_files(&self, native_id: &str, state: JobState) -> AuxFiles {
        if state == JobState::Canceled {
            return AuxFiles::default();
        }
        let exit_code = self
            .read_aux_file(native_id, ".ec")
            .and_then(|ec| match ec.trim().parse::<i32>() {
                Ok(code) => Some(code),
                Err(e) => {
                    warn!("Invalid exit code file for {}: {}", native_id, e);
                    None
                }
            });
        let output = self.read_aux_file(native_id, ".out");
        AuxFiles { exit_code, output }
    }

    fn remove_aux_files(&self, native_id: &str) {
        if self.config.keep_files {
            return;
        }
        self.remove_file(&self.aux_path(native_id, ".ec"));
        self.remove_file(&self.aux_path(native_id, ".out"));
    }

    fn remove_file(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Contents of a job's exit-code and output files.
#[derive(Debug, Default)]
struct AuxFiles {
    exit_code: Option<i32>,
    output: Option<String>,
}

impl AuxFiles {
    /// A non-zero exit code turns the status into `Failed`; failed statuses
    /// without a message take the captured output.
    fn enrich(&self, status: &mut JobStatus) {
        if status.state == JobState::Canceled {
            return;
        }
        if let Some(code) = self.exit_code {
            status.exit_code = Some(code);
            if code != 0 {
                status.state = JobState::Failed;
            }
        }
        if status.state == JobState::Failed && status.message.is_none() {
            status.message = self.output.clone();
            debug!("Output from launcher: {:?}", status.message);
        }
    }
}

impl<S: BatchScheduler> Drop for BatchExecutor<S> {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.get() {
            task.abort();
        }
    }
}

#[async_trait]
impl<S: BatchScheduler> JobExecutor for BatchExecutor<S> {
    fn name(&self) -> &str {
        self.scheduler.name()
    }

    fn version(&self) -> &str {
        self.scheduler.version()
    }

    async fn submit(&self, job: &Arc<Job>) -> HalResult<()> {
        let spec = check_submittable(job)?;
        info!("Job {}: submitting", job.id());
        job.bind(self.as_dyn())?;

        fs::create_dir_all(&self.work_directory).await?;

        let launcher = self.launchers.get(&spec)?;
        let launch_command = launcher.launch_command(job)?;
        debug!("Launch command: {:?}", launch_command);

        let ctx = ScriptContext::new(
            job,
            &spec,
            &self.library,
            launch_command,
            &self.work_directory,
        );
        let mut script = Vec::new();
        self.scheduler
            .generate_submit_script(job, &ctx, &mut script)
            .map_err(HalError::from)?;
        let script_path = self.script_path(job);
        fs::write(&script_path, &script).await?;

        debug!("Job {}: running submit command", job.id());
        let argv = self.scheduler.submit_command(job, &script_path);
        let output = run_command(&argv, self.config.command_timeout)
            .await
            .map_err(HalError::from)?;
        if !output.success() {
            return Err(HalError::submit(output.combined()));
        }
        debug!("Job {}: submit command output: {}", job.id(), output.stdout);

        let native_id = self
            .scheduler
            .job_id_from_submit_output(&output.stdout)
            .map_err(HalError::from)?;
        job.set_native_id(native_id.clone())?;
        info!("Job {}: native id: {}", job.id(), native_id);

        self.set_job_status(
            job,
            JobStatus::new(JobState::Queued).with_metadata("native_id", native_id),
        );
        self.register_job(job.clone())
    }

    async fn cancel(&self, job: &Job) -> HalResult<()> {
        let native_id = job
            .native_id()
            .ok_or_else(|| HalError::submit("Job does not have a native ID."))?;
        if job.state().is_final() {
            return Ok(());
        }

        let argv = self.scheduler.cancel_command(native_id);
        let output = run_command(&argv, self.config.command_timeout)
            .await
            .map_err(HalError::from)?;
        if output.success() {
            return Ok(());
        }

        let message = output.combined();
        if self
            .scheduler
            .is_benign_cancel_failure(output.exit_code, &message)
        {
            debug!("Job {}: cancel ignored, job already finished", job.id());
            return Ok(());
        }
        let state = job.state();
        if state.is_final() && state != JobState::Canceled {
            debug!("Job {}: finished ({}) before cancel", job.id(), state);
            return Ok(());
        }
        Err(HalError::submit(format!("Failed to cancel job: {message}")))
    }

    async fn list(&self) -> HalResult<Vec<String>> {
        let output = run_checked(&self.scheduler.list_command(), self.config.command_timeout)
            .await
            .map_err(HalError::from)?;
        self.scheduler
            .parse_list_output(&output.stdout)
            .map_err(HalError::from)
    }

    async fn attach(&self, job: &Arc<Job>, native_id: &str) -> HalResult<()> {
        check_attachable(job)?;
        job.bind(self.as_dyn())?;
        job.set_native_id(native_id)?;
        self.register_job(job.clone())
    }

    fn set_status_callback(&self, callback: StatusCallback) {
        self.callback.set(callback);
    }

    fn status_callback(&self) -> Option<StatusCallback> {
        self.callback.get()
    }

    fn set_job_status(&self, job: &Job, status: JobStatus) {
        match job.native_id() {
            Some(native_id) if status.is_final() => {
                let aux = self.read_aux_files(native_id, status.state);
                self.apply_final_status(job, status, &aux);
                if !self.poller.has_pending(native_id, job) {
                    self.remove_aux_files(native_id);
                }
            }
            _ => job.set_status(status),
        }
    }
}
