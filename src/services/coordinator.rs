//! Entry point of the engine: validate, submit, register, poll.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::models::job::{Job, JobId, JobKind};
use crate::models::result::{JobError, JobOutcome, JobResult};
use crate::models::submission::SubmitRequest;
use crate::services::backend::{BackendError, BackendSet, SubmitEnvelope};
use crate::services::correlation::{CorrelationIdGenerator, UuidGenerator};
use crate::services::registry::{
    PendingJob, PendingJobRegistry, PendingSnapshot, RegistryError, ResultSink,
};
use crate::services::scheduler::PollingScheduler;
use crate::services::timeout::{TimeoutPolicy, ValidationError};

/// Tunables injected by the calling layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub timeouts: TimeoutPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            timeouts: TimeoutPolicy::default(),
        }
    }
}

/// Returned synchronously from a successful submission. The job's single
/// result arrives on `completion`.
#[derive(Debug)]
pub struct JobHandle {
    pub id: JobId,
    pub kind: JobKind,
    pub timeout: Duration,
    pub completion: oneshot::Receiver<JobResult>,
}

impl JobHandle {
    /// Wait for the job's result. `None` if the engine shut down first.
    pub async fn wait(self) -> Option<JobResult> {
        self.completion.await.ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("no backend configured for {0} jobs")]
    NoBackend(JobKind),

    #[error("submission of job {job_id} failed: {source}")]
    Submission {
        job_id: JobId,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SubmitError {
    /// The synchronous `error` result for a rejected submission, when the
    /// failure happened after an id was assigned.
    pub fn rejection(&self) -> Option<JobResult> {
        match self {
            SubmitError::Submission { job_id, source } => Some(JobResult::from_outcome(
                job_id.clone(),
                JobOutcome::Failed(JobError::Submission {
                    message: source.to_string(),
                }),
                0,
            )),
            _ => None,
        }
    }
}

pub struct JobCoordinator {
    ids: Arc<dyn CorrelationIdGenerator>,
    backends: BackendSet,
    registry: Arc<PendingJobRegistry>,
    scheduler: PollingScheduler,
    timeouts: TimeoutPolicy,
    submitting: Mutex<HashSet<JobId>>,
}

/// Holds an id between the duplicate check and registration.
struct IdReservation<'a> {
    set: &'a Mutex<HashSet<JobId>>,
    id: JobId,
}

impl Drop for IdReservation<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl JobCoordinator {
    pub fn new(backends: BackendSet, config: EngineConfig) -> Self {
        let registry = Arc::new(PendingJobRegistry::new());
        let scheduler = PollingScheduler::new(Arc::clone(&registry), config.poll_interval);
        Self {
            ids: Arc::new(UuidGenerator),
            backends,
            registry,
            scheduler,
            timeouts: config.timeouts,
            submitting: Mutex::new(HashSet::new()),
        }
    }

    /// Record every terminal result in `sink` as the job leaves the registry.
    pub fn with_result_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        let interval = self.scheduler.interval();
        self.registry = Arc::new(PendingJobRegistry::with_sink(sink));
        self.scheduler = PollingScheduler::new(Arc::clone(&self.registry), interval);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn CorrelationIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    fn reserve(&self, id: &JobId) -> Result<IdReservation<'_>, RegistryError> {
        let mut submitting = self.submitting.lock();
        if self.registry.contains(id) || !submitting.insert(id.clone()) {
            return Err(RegistryError::Duplicate(id.clone()));
        }
        Ok(IdReservation {
            set: &self.submitting,
            id: id.clone(),
        })
    }

    /// Submit a job and start tracking it. Returns as soon as the backend has
    /// accepted the job.
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobHandle, SubmitError> {
        let SubmitRequest {
            kind,
            label,
            payload,
            cost,
        } = request;

        // fail fast: nothing goes over the wire for a job without a deadline
        let timeout = self.timeouts.compute(kind, &cost)?;
        let backend = self.backends.get(kind).ok_or(SubmitError::NoBackend(kind))?;

        let id = self.ids.new_id();
        let _reservation = self.reserve(&id)?;
        // the deadline counts from submission start
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(ValidationError::DeadlineTooLong {
                kind,
                max_secs: TimeoutPolicy::MAX_TIMEOUT.as_secs(),
            })?;

        let job = Job {
            id: id.clone(),
            label,
            kind,
            cost,
            submitted_at: Utc::now(),
        };
        let envelope = SubmitEnvelope {
            id: id.clone(),
            label: job.label.clone(),
            payload,
            submitted_at: job.submitted_at,
        };

        if let Err(source) = backend.submit(&envelope).await {
            metrics::counter!("relay_submission_failures_total", "kind" => kind.to_string())
                .increment(1);
            warn!(job_id = %id, kind = %kind, backend = backend.name(), error = %source, "Job submission failed");
            return Err(SubmitError::Submission { job_id: id, source });
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        self.registry
            .register(PendingJob::new(job, deadline, completion_tx))?;
        self.registry.arm_deadline(&id);
        self.scheduler.start(id.clone(), kind, backend);

        metrics::counter!("relay_jobs_submitted_total", "kind" => kind.to_string()).increment(1);
        info!(
            job_id = %id,
            kind = %kind,
            label = %envelope.label,
            timeout_secs = timeout.as_secs(),
            "Job submitted"
        );

        Ok(JobHandle {
            id,
            kind,
            timeout,
            completion: completion_rx,
        })
    }

    /// Cancel a pending job. Emits a `cancelled` result; a no-op for jobs that
    /// are not pending.
    pub fn cancel(&self, id: &JobId) -> bool {
        let cancelled = self.scheduler.stop(id);
        if cancelled {
            info!(job_id = %id, "Job cancelled");
        }
        cancelled
    }

    pub fn pending(&self, id: &JobId) -> Option<PendingSnapshot> {
        self.registry.snapshot(id)
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Stop all polling and deadline timers.
    pub fn shutdown(&self) -> usize {
        self.registry.shutdown()
    }
}

impl Drop for JobCoordinator {
    fn drop(&mut self) {
        self.registry.shutdown();
    }
}
