//! Queue-poll loop state.
//!
//! The poller keeps the `native id -> jobs` registry of one executor and the
//! consecutive-error counter used for failure escalation. The loop itself
//! runs as a tokio task holding only a weak reference to its executor, so
//! it stops once the executor is dropped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use psij_hal::Job;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::executor::BatchExecutor;
use crate::scheduler::BatchScheduler;

/// Jobs tracked by native id.
pub type JobRegistry = FxHashMap<String, Vec<Arc<Job>>>;

/// Registry and error counter of a queue-poll loop.
#[derive(Debug, Default)]
pub struct QueuePoller {
    jobs: Mutex<JobRegistry>,
    error_count: AtomicU32,
}

impl QueuePoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `job` under `native_id`. Returns `false` if this job object is
    /// already tracked.
    pub fn register(&self, native_id: &str, job: Arc<Job>) -> bool {
        let Ok(mut jobs) = self.jobs.lock() else {
            return false;
        };
        let list = jobs.entry(native_id.to_string()).or_default();
        if list.iter().any(|j| Arc::ptr_eq(j, &job)) {
            return false;
        }
        list.push(job);
        true
    }

    /// Copy of the registry.
    pub fn snapshot(&self) -> JobRegistry {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    /// Stop tracking `done` under `native_id`, keeping jobs registered since.
    /// Returns `true` if no job is left under the id.
    pub fn remove_jobs(&self, native_id: &str, done: &[Arc<Job>]) -> bool {
        let Ok(mut jobs) = self.jobs.lock() else {
            return true;
        };
        let Some(list) = jobs.get_mut(native_id) else {
            return true;
        };
        list.retain(|j| !done.iter().any(|d| Arc::ptr_eq(j, d)));
        if list.is_empty() {
            jobs.remove(native_id);
            true
        } else {
            false
        }
    }

    /// Whether a job other than `job` is tracked under `native_id` and not
    /// yet final.
    pub fn has_pending(&self, native_id: &str, job: &Job) -> bool {
        self.jobs
            .lock()
            .map(|jobs| {
                jobs.get(native_id).is_some_and(|list| {
                    list.iter()
                        .any(|j| !std::ptr::eq(j.as_ref(), job) && !j.state().is_final())
                })
            })
            .unwrap_or(false)
    }

    /// Remove and return every tracked job.
    pub fn drain(&self) -> JobRegistry {
        self.jobs
            .lock()
            .map(|mut jobs| std::mem::take(&mut *jobs))
            .unwrap_or_default()
    }

    /// Number of tracked native ids.
    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `native_id` is tracked.
    pub fn contains(&self, native_id: &str) -> bool {
        self.jobs
            .lock()
            .map(|jobs| jobs.contains_key(native_id))
            .unwrap_or(false)
    }

    /// Count a failed poll and return the new consecutive-error count.
    pub fn record_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset the consecutive-error count.
    pub fn reset_errors(&self) {
        self.error_count.store(0, Ordering::SeqCst);
    }

    /// Current consecutive-error count.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }
}

/// Fixed-delay polling loop for `executor`.
pub(crate) async fn poll_loop<S: BatchScheduler>(
    executor: Weak<BatchExecutor<S>>,
    initial_delay: Duration,
    interval: Duration,
) {
    tokio::time::sleep(initial_delay).await;
    loop {
        let Some(exec) = executor.upgrade() else {
            break;
        };
        exec.poll().await;
        drop(exec);
        tokio::time::sleep(interval).await;
    }
    debug!("Queue poll loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use psij_hal::JobSpec;

    #[test]
    fn test_register_no_double_listing() {
        let poller = QueuePoller::new();
        let job = Job::new(JobSpec::default());
        let other = Job::new(JobSpec::default());

        assert!(poller.register("42", job.clone()));
        assert!(!poller.register("42", job.clone()));
        assert!(poller.register("42", other));
        assert_eq!(poller.len(), 1);
        assert_eq!(poller.snapshot()["42"].len(), 2);
    }

    #[test]
    fn test_remove_and_drain() {
        let poller = QueuePoller::new();
        let first = Job::new(JobSpec::default());
        poller.register("1", first.clone());
        poller.register("2", Job::new(JobSpec::default()));
        assert!(poller.remove_jobs("1", &[first]));
        assert!(!poller.contains("1"));
        let drained = poller.drain();
        assert_eq!(drained.len(), 1);
        assert!(poller.is_empty());
    }

    #[test]
    fn test_remove_keeps_jobs_registered_later() {
        let poller = QueuePoller::new();
        let polled = Job::new(JobSpec::default());
        poller.register("7", polled.clone());
        let snapshot = poller.snapshot();

        let late = Job::new(JobSpec::default());
        poller.register("7", late.clone());

        assert!(!poller.remove_jobs("7", &snapshot["7"]));
        let remaining = poller.snapshot();
        assert_eq!(remaining["7"].len(), 1);
        assert!(Arc::ptr_eq(&remaining["7"][0], &late));
    }

    #[test]
    fn test_has_pending() {
        let poller = QueuePoller::new();
        let a = Job::new(JobSpec::default());
        let b = Job::new(JobSpec::default());
        poller.register("9", a.clone());
        assert!(!poller.has_pending("9", &a));

        poller.register("9", b.clone());
        assert!(poller.has_pending("9", &a));
        b.set_status(psij_hal::JobStatus::new(psij_hal::JobState::Failed));
        assert!(!poller.has_pending("9", &a));
    }

    #[test]
    fn test_error_counter() {
        let poller = QueuePoller::new();
        assert_eq!(poller.record_error(), 1);
        assert_eq!(poller.record_error(), 2);
        poller.reset_errors();
        assert_eq!(poller.error_count(), 0);
    }
}
