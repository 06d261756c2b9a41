//! Owned registry of in-flight jobs.
//!
//! An entry exists exactly while its job is pending. Every terminal
//! transition removes the entry inside one critical section, aborts the
//! job's timers and sends the single result through the entry's completion
//! channel. Because the sender is moved out on removal, a second resolution
//! attempt for the same id has nothing to send.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::models::job::{Job, JobId, JobKind};
use crate::models::result::{JobOutcome, JobResult};

/// Registry entry: a job plus its live scheduling state.
#[derive(Debug)]
pub struct PendingJob {
    job: Job,
    deadline: Instant,
    attempts: u32,
    poll_handle: Option<AbortHandle>,
    timeout_handle: Option<AbortHandle>,
    completion: oneshot::Sender<JobResult>,
}

impl PendingJob {
    pub fn new(job: Job, deadline: Instant, completion: oneshot::Sender<JobResult>) -> Self {
        Self {
            job,
            deadline,
            attempts: 0,
            poll_handle: None,
            timeout_handle: None,
            completion,
        }
    }

    fn release(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.timeout_handle.take() {
            handle.abort();
        }
    }
}

/// Read-only view of a pending job.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub job_id: JobId,
    pub label: String,
    pub kind: JobKind,
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub remaining_secs: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("job {0} is already registered")]
    Duplicate(JobId),
}

/// Receives every terminal result as the job leaves the registry.
/// Called with the registry lock held; implementations must not call back
/// into the registry.
pub trait ResultSink: Send + Sync + 'static {
    fn record(&self, result: &JobResult);
}

#[derive(Default)]
pub struct PendingJobRegistry {
    jobs: Mutex<HashMap<JobId, PendingJob>>,
    sink: Option<Arc<dyn ResultSink>>,
}

impl PendingJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            jobs: Mutex::default(),
            sink: Some(sink),
        }
    }

    pub fn register(&self, entry: PendingJob) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.lock();
        let id = entry.job.id.clone();
        if jobs.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        jobs.insert(id, entry);
        metrics::gauge!("relay_jobs_pending").set(jobs.len() as f64);
        Ok(())
    }

    /// Start the deadline timer for a registered job. The timer resolves the
    /// job as timed out unless something else resolves it first.
    pub fn arm_deadline(self: &Arc<Self>, id: &JobId) -> bool {
        let Some(deadline) = self.deadline(id) else {
            return false;
        };

        let registry = Arc::clone(self);
        let timer_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if registry.resolve(&timer_id, JobOutcome::TimedOut) {
                info!(job_id = %timer_id, "Job deadline reached");
            }
        });

        let handle = task.abort_handle();
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(id) {
            Some(entry) => {
                entry.timeout_handle = Some(handle);
                true
            }
            None => {
                handle.abort();
                false
            }
        }
    }

    /// Hand the poll task's handle to the entry. If the job already left the
    /// registry the task is aborted on the spot.
    pub fn attach_poll_handle(&self, id: &JobId, handle: AbortHandle) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get_mut(id) {
            Some(entry) => {
                if let Some(previous) = entry.poll_handle.replace(handle) {
                    previous.abort();
                }
                true
            }
            None => {
                handle.abort();
                false
            }
        }
    }

    /// Count one poll cycle. `None` means the job is no longer pending and
    /// whatever the poll returned must be dropped.
    pub fn record_attempt(&self, id: &JobId) -> Option<u32> {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(id)?;
        entry.attempts += 1;
        Some(entry.attempts)
    }

    pub fn deadline(&self, id: &JobId) -> Option<Instant> {
        self.jobs.lock().get(id).map(|entry| entry.deadline)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.lock().contains_key(id)
    }

    pub fn snapshot(&self, id: &JobId) -> Option<PendingSnapshot> {
        let jobs = self.jobs.lock();
        let entry = jobs.get(id)?;
        Some(PendingSnapshot {
            job_id: entry.job.id.clone(),
            label: entry.job.label.clone(),
            kind: entry.job.kind,
            attempts: entry.attempts,
            submitted_at: entry.job.submitted_at,
            remaining_secs: entry
                .deadline
                .saturating_duration_since(Instant::now())
                .as_secs(),
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Move a job to its terminal state. Returns `false` if the job was not
    /// pending (already resolved, timed out, cancelled, or never registered).
    ///
    /// The result reaches the sink before the entry lock is released, so a
    /// lookup never finds the job missing from both.
    pub fn resolve(&self, id: &JobId, outcome: JobOutcome) -> bool {
        let resolved = {
            let mut jobs = self.jobs.lock();
            let resolved = jobs.remove(id).map(|entry| {
                let result = JobResult::from_outcome(id.clone(), outcome, entry.attempts);
                if let Some(sink) = &self.sink {
                    sink.record(&result);
                }
                (entry, result)
            });
            metrics::gauge!("relay_jobs_pending").set(jobs.len() as f64);
            resolved
        };
        let Some((mut entry, result)) = resolved else {
            debug!(job_id = %id, "Ignoring resolution of job that is no longer pending");
            return false;
        };

        entry.release();

        let kind = entry.job.kind;
        let elapsed = (result.resolved_at - entry.job.submitted_at)
            .to_std()
            .unwrap_or_default();

        metrics::counter!(
            "relay_jobs_resolved_total",
            "kind" => kind.to_string(),
            "status" => result.status.as_str()
        )
        .increment(1);
        metrics::histogram!("relay_job_duration_seconds", "kind" => kind.to_string())
            .record(elapsed.as_secs_f64());

        info!(
            job_id = %id,
            kind = %kind,
            label = %entry.job.label,
            status = result.status.as_str(),
            attempts = entry.attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job resolved"
        );

        if entry.completion.send(result).is_err() {
            debug!(job_id = %id, "Result receiver already dropped");
        }
        true
    }

    pub fn cancel(&self, id: &JobId) -> bool {
        self.resolve(id, JobOutcome::Cancelled)
    }

    /// Drop every pending job and stop all of their timers. No results are
    /// emitted; receivers observe a closed channel.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<PendingJob> = {
            let mut jobs = self.jobs.lock();
            let drained = jobs.drain().map(|(_, entry)| entry).collect();
            metrics::gauge!("relay_jobs_pending").set(0.0);
            drained
        };
        let count = drained.len();
        for mut entry in drained {
            entry.release();
        }
        if count > 0 {
            info!(count, "Stopped checking all pending jobs");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::CostParameters;
    use crate::models::result::JobStatus;
    use std::time::Duration;

    fn sample_job(id: &str) -> Job {
        Job {
            id: JobId::from(id),
            label: "portrait.png".to_string(),
            kind: JobKind::PromptAnalysis,
            cost: CostParameters::default(),
            submitted_at: Utc::now(),
        }
    }

    fn register(
        registry: &PendingJobRegistry,
        id: &str,
        timeout: Duration,
    ) -> oneshot::Receiver<JobResult> {
        let (tx, rx) = oneshot::channel();
        registry
            .register(PendingJob::new(sample_job(id), Instant::now() + timeout, tx))
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_resolve_emits_once() {
        let registry = PendingJobRegistry::new();
        let rx = register(&registry, "j1", Duration::from_secs(60));

        assert!(registry.resolve(&JobId::from("j1"), JobOutcome::TimedOut));
        assert!(!registry.resolve(&JobId::from("j1"), JobOutcome::Cancelled));
        assert!(registry.is_empty());

        let result = rx.await.unwrap();
        assert_eq!(result.status, JobStatus::Timeout);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = PendingJobRegistry::new();
        let _rx = register(&registry, "dup", Duration::from_secs(60));
        let (tx, _rx2) = oneshot::channel();
        let err = registry
            .register(PendingJob::new(
                sample_job("dup"),
                Instant::now() + Duration::from_secs(60),
                tx,
            ))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(id) if id.as_str() == "dup"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_attempts_stop_counting_after_resolution() {
        let registry = PendingJobRegistry::new();
        let _rx = register(&registry, "a", Duration::from_secs(60));
        let id = JobId::from("a");

        assert_eq!(registry.record_attempt(&id), Some(1));
        assert_eq!(registry.record_attempt(&id), Some(2));
        assert_eq!(registry.snapshot(&id).unwrap().attempts, 2);

        registry.cancel(&id);
        assert_eq!(registry.record_attempt(&id), None);
        assert!(registry.snapshot(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_timer_times_out_job() {
        let registry = Arc::new(PendingJobRegistry::new());
        let rx = register(&registry, "slow", Duration::from_secs(120));
        assert!(registry.arm_deadline(&JobId::from("slow")));

        let result = rx.await.unwrap();
        assert_eq!(result.status, JobStatus::Timeout);
        assert!(!registry.contains(&JobId::from("slow")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handles_aborted_on_resolution() {
        let registry = Arc::new(PendingJobRegistry::new());
        let _rx = register(&registry, "h", Duration::from_secs(600));
        let id = JobId::from("h");

        let poll_task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(registry.attach_poll_handle(&id, poll_task.abort_handle()));
        registry.arm_deadline(&id);

        assert!(registry.cancel(&id));
        let joined = poll_task.await;
        assert!(joined.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_late_handle_is_aborted() {
        let registry = PendingJobRegistry::new();
        let task = tokio::spawn(std::future::pending::<()>());
        assert!(!registry.attach_poll_handle(&JobId::from("gone"), task.abort_handle()));
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_drains_without_emitting() {
        let registry = PendingJobRegistry::new();
        let rx1 = register(&registry, "s1", Duration::from_secs(60));
        let rx2 = register(&registry, "s2", Duration::from_secs(60));

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
        assert_eq!(registry.shutdown(), 0);
    }

    #[derive(Default)]
    struct RecordingSink {
        results: Mutex<Vec<JobResult>>,
    }

    impl ResultSink for RecordingSink {
        fn record(&self, result: &JobResult) {
            self.results.lock().push(result.clone());
        }
    }

    #[tokio::test]
    async fn test_sink_sees_result_before_entry_is_gone() {
        let sink = Arc::new(RecordingSink::default());
        let registry = PendingJobRegistry::with_sink(sink.clone());
        let rx = register(&registry, "k1", Duration::from_secs(60));
        let id = JobId::from("k1");

        assert!(registry.cancel(&id));
        assert!(!registry.contains(&id));
        {
            let recorded = sink.results.lock();
            assert_eq!(recorded.len(), 1);
            assert_eq!(recorded[0].status, JobStatus::Cancelled);
        }
        assert_eq!(rx.await.unwrap().status, JobStatus::Cancelled);

        // neither a second resolution nor shutdown records anything
        assert!(!registry.resolve(&id, JobOutcome::TimedOut));
        let _rx = register(&registry, "k2", Duration::from_secs(60));
        assert_eq!(registry.shutdown(), 1);
        assert_eq!(sink.results.lock().len(), 1);
    }
}
