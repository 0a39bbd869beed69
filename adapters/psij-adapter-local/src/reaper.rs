//! Process reaper.
//!
//! A single background thread per process watches every job started or
//! attached by a [`LocalExecutor`](crate::LocalExecutor). Every 200 ms it
//! sends pending kills, polls each process without blocking and finalizes
//! the jobs whose processes have exited.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::ExitStatusExt;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use psij_hal::{HalResult, Job, JobExecutor, JobState, JobStatus, Launcher};
use tracing::{debug, error, warn};

use crate::executor::LocalExecutor;

/// Delay between reaper cycles.
pub const REAPER_INTERVAL: Duration = Duration::from_millis(200);

/// OS process behind a job.
#[derive(Debug)]
pub(crate) enum TrackedProcess {
    /// Spawned by this process; output captured in `output`.
    Child { child: Child, output: File },
    /// Started elsewhere and attached by pid.
    Attached { pid: i32 },
}

/// How a tracked process ended.
#[derive(Debug)]
pub(crate) struct ProcessExit {
    /// Exit code, or the negated signal number.
    pub exit_code: i32,
    pub output: String,
    pub time: DateTime<Utc>,
}

/// A job and its OS process.
pub(crate) struct ProcessEntry {
    job: Arc<Job>,
    executor: Weak<LocalExecutor>,
    launcher: Option<Arc<dyn Launcher>>,
    process: Mutex<TrackedProcess>,
    kill_flag: AtomicBool,
    kill_sent: AtomicBool,
}

impl ProcessEntry {
    pub fn new(
        job: Arc<Job>,
        executor: Weak<LocalExecutor>,
        launcher: Option<Arc<dyn Launcher>>,
        process: TrackedProcess,
    ) -> Self {
        Self {
            job,
            executor,
            launcher,
            process: Mutex::new(process),
            kill_flag: AtomicBool::new(false),
            kill_sent: AtomicBool::new(false),
        }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    /// Ask the reaper to kill the process on its next cycle.
    pub fn request_kill(&self) {
        self.kill_flag.store(true, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.kill_flag.load(Ordering::SeqCst)
    }

    /// Send a pending kill, then check for exit without blocking.
    fn check(&self) -> Option<ProcessExit> {
        let mut process = self.process.lock().unwrap_or_else(PoisonError::into_inner);

        if self.kill_requested() && !self.kill_sent.swap(true, Ordering::SeqCst) {
            debug!("Job {}: killing process", self.job.id());
            if let Err(e) = kill(&mut process) {
                warn!("Job {}: failed to kill process: {}", self.job.id(), e);
            }
        }

        match &mut *process {
            TrackedProcess::Child { child, output } => match child.try_wait() {
                Ok(Some(status)) => {
                    let exit_code = status
                        .code()
                        .or_else(|| status.signal().map(|s| -s))
                        .unwrap_or(-1);
                    Some(ProcessExit {
                        exit_code,
                        output: read_output(output),
                        time: Utc::now(),
                    })
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("Job {}: failed to poll process: {}", self.job.id(), e);
                    None
                }
            },
            // Exit status of a non-child is not observable
            TrackedProcess::Attached { pid } => (!pid_alive(*pid)).then(|| ProcessExit {
                exit_code: 0,
                output: String::new(),
                time: Utc::now(),
            }),
        }
    }

    /// Final status for `exit`.
    pub fn final_status(&self, exit: &ProcessExit) -> JobStatus {
        let code = exit.exit_code;
        let status = if code == 0 {
            JobStatus::new(JobState::Completed)
        } else if code < 0 && self.kill_requested() {
            JobStatus::new(JobState::Canceled)
        } else {
            let message = match &self.launcher {
                Some(launcher) if launcher.is_launcher_failure(&exit.output) => {
                    launcher.launcher_failure_message(&exit.output)
                }
                _ => format!("Job failed with exit code {}: {}", code, exit.output.trim_end()),
            };
            JobStatus::new(JobState::Failed).with_message(message)
        };
        status.with_exit_code(code).with_time(exit.time)
    }

    fn finish(&self, exit: ProcessExit) {
        let status = self.final_status(&exit);
        debug!("Job {}: process exited with {}", self.job.id(), exit.exit_code);
        match self.executor.upgrade() {
            Some(executor) => {
                executor.forget(&self.job);
                executor.set_job_status(&self.job, status);
            }
            None => self.job.set_status(status),
        }
    }
}

fn kill(process: &mut TrackedProcess) -> std::io::Result<()> {
    match process {
        TrackedProcess::Child { child, .. } => child.kill(),
        TrackedProcess::Attached { pid } => {
            // SAFETY: kill(2) takes plain integers.
            if unsafe { libc::kill(*pid, libc::SIGKILL) } == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        }
    }
}

/// Whether `pid` names a live process.
pub(crate) fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for existence and permission.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn read_output(output: &mut File) -> String {
    let mut buf = Vec::new();
    if let Err(e) = output
        .seek(SeekFrom::Start(0))
        .and_then(|_| output.read_to_end(&mut buf))
    {
        warn!("Failed to read process output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Process-wide reaper.
pub(crate) struct ProcessReaper {
    entries: Mutex<Vec<Arc<ProcessEntry>>>,
    started: Mutex<bool>,
}

static REAPER: OnceLock<ProcessReaper> = OnceLock::new();

impl ProcessReaper {
    /// The reaper shared by all local executors.
    pub fn global() -> &'static ProcessReaper {
        REAPER.get_or_init(|| ProcessReaper {
            entries: Mutex::new(Vec::new()),
            started: Mutex::new(false),
        })
    }

    /// Watch `entry`, starting the reaper thread if needed.
    pub fn register(&'static self, entry: Arc<ProcessEntry>) -> HalResult<()> {
        self.ensure_started()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }

    fn ensure_started(&'static self) -> HalResult<()> {
        let mut started = self.started.lock().unwrap_or_else(PoisonError::into_inner);
        if !*started {
            thread::Builder::new()
                .name("psij-reaper".into())
                .spawn(move || self.run())?;
            *started = true;
            debug!("Process reaper started");
        }
        Ok(())
    }

    fn run(&self) {
        loop {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();

            let mut finished = Vec::new();
            for entry in entries {
                if let Some(exit) = entry.check() {
                    finished.push((entry, exit));
                }
            }

            if !finished.is_empty() {
                self.entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|e| !finished.iter().any(|(f, _)| Arc::ptr_eq(e, f)));
            }

            for (entry, exit) in finished {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    entry.finish(exit);
                }));
                if result.is_err() {
                    error!("Job {}: panic while finalizing", entry.job.id());
                }
            }

            thread::sleep(REAPER_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psij_hal::{JobSpec, SingleLauncher};

    fn entry(launcher: Option<Arc<dyn Launcher>>) -> ProcessEntry {
        ProcessEntry::new(
            Job::new(JobSpec::new("/bin/true", Vec::<String>::new())),
            Weak::new(),
            launcher,
            TrackedProcess::Attached { pid: 0 },
        )
    }

    fn exit(code: i32, output: &str) -> ProcessExit {
        ProcessExit {
            exit_code: code,
            output: output.to_string(),
            time: Utc::now(),
        }
    }

    #[test]
    fn test_exit_zero_completes() {
        let status = entry(None).final_status(&exit(0, ""));
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.exit_code, Some(0));
    }

    #[test]
    fn test_signal_after_cancel_is_canceled() {
        let e = entry(None);
        assert_eq!(e.final_status(&exit(-9, "")).state, JobState::Failed);
        e.request_kill();
        assert_eq!(e.final_status(&exit(-9, "")).state, JobState::Canceled);
        assert_eq!(e.final_status(&exit(1, "")).state, JobState::Failed);
    }

    #[test]
    fn test_failure_message() {
        let status = entry(Some(Arc::new(SingleLauncher))).final_status(&exit(2, "no such file\n"));
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.exit_code, Some(2));
        assert_eq!(
            status.message.as_deref(),
            Some("Job failed with exit code 2: no such file")
        );
    }

    #[test]
    fn test_pid_alive() {
        assert!(pid_alive(std::process::id() as i32));
        assert!(!pid_alive(0));
        assert!(!pid_alive(-1));
    }
}
