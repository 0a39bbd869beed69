//! Job lifecycle.
//!
//! A [`Job`] owns its current [`JobStatus`]. Executors push new statuses
//! through [`Job::set_status`] (usually via
//! [`JobExecutor::set_job_status`](crate::JobExecutor::set_job_status)),
//! and clients observe them through [`Job::wait`] or a status callback.
//!
//! **Invariants:**
//! - Observed states never decrease under [`JobState::is_greater_than`].
//! - No order level is skipped: a jump from `New` to `Active` first
//!   commits an implicit `Queued`.
//! - Setting the current state again is a no-op that neither wakes
//!   waiters nor invokes callbacks.
//! - Once final, the status never changes.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{HalError, HalResult};
use crate::executor::JobExecutor;
use crate::spec::JobSpec;
use crate::state::JobState;
use crate::status::JobStatus;

/// Callback invoked after every committed status change.
pub type StatusCallback = Arc<dyn Fn(&Job, &JobStatus) + Send + Sync>;

/// A unit of work tracked by an executor.
pub struct Job {
    id: String,
    spec: Option<Arc<JobSpec>>,
    status: watch::Sender<JobStatus>,
    native_id: OnceLock<String>,
    executor: OnceLock<Weak<dyn JobExecutor>>,
    callback: Mutex<Option<StatusCallback>>,
}

impl Job {
    /// Create a job for `spec`, in the `New` state.
    pub fn new(spec: JobSpec) -> Arc<Self> {
        Arc::new(Self::build(Some(Arc::new(spec))))
    }

    /// Create a job sharing an existing spec.
    pub fn with_shared_spec(spec: Arc<JobSpec>) -> Arc<Self> {
        Arc::new(Self::build(Some(spec)))
    }

    /// Create a job without a spec, for use with
    /// [`JobExecutor::attach`](crate::JobExecutor::attach).
    pub fn detached() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    fn build(spec: Option<Arc<JobSpec>>) -> Self {
        let (status, _) = watch::channel(JobStatus::new(JobState::New));
        Self {
            id: Uuid::new_v4().to_string(),
            spec,
            status,
            native_id: OnceLock::new(),
            executor: OnceLock::new(),
            callback: Mutex::new(None),
        }
    }

    /// Process-unique identifier of this job.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The job description, if any.
    pub fn spec(&self) -> Option<&Arc<JobSpec>> {
        self.spec.as_ref()
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Current state.
    pub fn state(&self) -> JobState {
        self.status.borrow().state
    }

    /// Identifier assigned by the backend, once submitted or attached.
    pub fn native_id(&self) -> Option<&str> {
        self.native_id.get().map(String::as_str)
    }

    /// Record the backend identifier. It can be set only once.
    pub fn set_native_id(&self, native_id: impl Into<String>) -> HalResult<()> {
        let native_id = native_id.into();
        self.native_id.set(native_id).map_err(|attempted| HalError::InvalidState {
            expected: "no native id".into(),
            found: format!(
                "native id {} (attempted {})",
                self.native_id().unwrap_or_default(),
                attempted
            ),
        })
    }

    /// The executor this job was submitted to, if it is still alive.
    pub fn executor(&self) -> Option<Arc<dyn JobExecutor>> {
        self.executor.get().and_then(Weak::upgrade)
    }

    /// Bind this job to an executor. A job can be bound only once.
    pub fn bind(&self, executor: Weak<dyn JobExecutor>) -> HalResult<()> {
        self.executor
            .set(executor)
            .map_err(|_| HalError::AlreadyBound(self.id.clone()))
    }

    /// Whether this job was bound to an executor.
    pub fn is_bound(&self) -> bool {
        self.executor.get().is_some()
    }

    /// Set the per-job status callback, replacing any previous one.
    pub fn set_status_callback<F>(&self, callback: F)
    where
        F: Fn(&Job, &JobStatus) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.callback.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Apply a new status.
    ///
    /// Statuses that do not advance the job (same state, lower state or a
    /// different final state) are ignored. Missing intermediate states are
    /// committed first with default statuses, in ascending order.
    pub fn set_status(&self, status: JobStatus) {
        loop {
            let current = self.state();
            if current == status.state || current.is_greater_than(status.state) != Some(false) {
                return;
            }

            // Lowest state above `current` on the way to the target.
            let mut next = status.state;
            while let Some(prev) = next.predecessor() {
                if prev == current || current.is_greater_than(prev) == Some(true) {
                    break;
                }
                next = prev;
            }

            let is_target = next == status.state;
            let to_commit = if is_target {
                status.clone()
            } else {
                JobStatus::new(next)
            };

            let committed = self.status.send_if_modified(|cur| {
                let follows = match to_commit.state.predecessor() {
                    Some(prev) => prev == cur.state,
                    None => to_commit.state.is_greater_than(cur.state) == Some(true),
                };
                if follows {
                    *cur = to_commit.clone();
                    true
                } else {
                    false
                }
            });

            if committed {
                debug!("Job {} -> {}", self.id, to_commit.state);
                self.notify(&to_commit);
                if is_target {
                    return;
                }
            }
        }
    }

    fn notify(&self, status: &JobStatus) {
        let job_callback = self.callback.lock().ok().and_then(|slot| slot.clone());
        if let Some(callback) = job_callback {
            self.invoke(&callback, status, "job");
        }
        if let Some(callback) = self.executor().and_then(|e| e.status_callback()) {
            self.invoke(&callback, status, "executor");
        }
    }

    fn invoke(&self, callback: &StatusCallback, status: &JobStatus, kind: &str) {
        if catch_unwind(AssertUnwindSafe(|| callback(self, status))).is_err() {
            warn!(
                "Panic in {} status callback for job {} ({})",
                kind, self.id, status.state
            );
        }
    }

    /// Wait for the job to reach a final state.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait(&self, timeout: Option<Duration>) -> Option<JobStatus> {
        self.wait_for(timeout, &[]).await
    }

    /// Wait for the job to reach one of `targets`.
    ///
    /// Also resolves once the state is greater than every target, or final.
    /// An empty `targets` means "any final state". Returns `None` if
    /// `timeout` elapses first.
    pub async fn wait_for(&self, timeout: Option<Duration>, targets: &[JobState]) -> Option<JobStatus> {
        let mut rx = self.status.subscribe();
        let reached = |s: &JobStatus| {
            s.state.is_final()
                || targets.contains(&s.state)
                || (!targets.is_empty()
                    && targets.iter().all(|t| s.state.is_greater_than(*t) == Some(true)))
        };

        let fut = async {
            match rx.wait_for(reached).await {
                Ok(status) => Some((*status).clone()),
                Err(_) => None,
            }
        };

        match timeout {
            Some(d) => tokio::time::timeout(d, fut).await.ok().flatten(),
            None => fut.await,
        }
    }

    /// Cancel this job.
    ///
    /// No-op when the job is already final. Fails with
    /// [`HalError::NotBound`] if the job was never submitted.
    pub async fn cancel(&self) -> HalResult<()> {
        if self.state().is_final() {
            return Ok(());
        }
        let executor = self
            .executor()
            .ok_or_else(|| HalError::NotBound(self.id.clone()))?;
        executor.cancel(self).await
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("native_id", &self.native_id.get())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Job[id={}", self.id)?;
        if let Some(native_id) = self.native_id() {
            write!(f, ", native_id={native_id}")?;
        }
        write!(f, ", status={}]", self.state())
    }
}
