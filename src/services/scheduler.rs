use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::models::job::{JobId, JobKind};
use crate::models::result::{JobError, JobOutcome};
use crate::services::backend::{BackendError, JobBackend, PollResponse};
use crate::services::normalizer;
use crate::services::registry::PendingJobRegistry;

/// Runs one periodic result check per pending job.
pub struct PollingScheduler {
    registry: Arc<PendingJobRegistry>,
    interval: Duration,
}

impl PollingScheduler {
    pub fn new(registry: Arc<PendingJobRegistry>, interval: Duration) -> Self {
        Self {
            registry,
            // tokio intervals reject a zero period
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the poll loop for a registered job.
    pub fn start(&self, id: JobId, kind: JobKind, backend: Arc<dyn JobBackend>) {
        let registry = Arc::clone(&self.registry);
        let period = self.interval;
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            poll_loop(registry, task_id, kind, backend, period).await;
        });
        self.registry.attach_poll_handle(&id, task.abort_handle());
    }

    /// Stop polling a job and release its timers. Safe to call repeatedly or
    /// after the job has already resolved.
    pub fn stop(&self, id: &JobId) -> bool {
        self.registry.cancel(id)
    }
}

async fn poll_loop(
    registry: Arc<PendingJobRegistry>,
    id: JobId,
    kind: JobKind,
    backend: Arc<dyn JobBackend>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(deadline) = registry.deadline(&id) else {
            return;
        };

        let response = backend.fetch_result(&id).await;
        if handle_tick(&registry, &id, kind, backend.as_ref(), deadline, response).is_break() {
            return;
        }
    }
}

fn handle_tick(
    registry: &PendingJobRegistry,
    id: &JobId,
    kind: JobKind,
    backend: &dyn JobBackend,
    deadline: Instant,
    response: Result<PollResponse, BackendError>,
) -> ControlFlow<()> {
    // The job may have been cancelled or timed out while the fetch was in
    // flight; in that case the response is dropped.
    let Some(attempts) = registry.record_attempt(id) else {
        debug!(job_id = %id, "Dropping poll response for job that is no longer pending");
        return ControlFlow::Break(());
    };

    let outcome = match response {
        Ok(PollResponse::Ready(raw)) => {
            match normalizer::normalize(kind, &raw, backend.view_endpoint()) {
                Ok(payload) => JobOutcome::Succeeded(payload),
                Err(err) => {
                    warn!(job_id = %id, kind = %kind, error = %err, "Result could not be normalized");
                    JobOutcome::Failed(err.into())
                }
            }
        }
        Ok(PollResponse::Failed(message)) => {
            warn!(job_id = %id, backend = backend.name(), message = %message, "Backend reported job failure");
            JobOutcome::Failed(JobError::Backend { message })
        }
        Ok(PollResponse::NotReady) => {
            if Instant::now() < deadline {
                return ControlFlow::Continue(());
            }
            JobOutcome::TimedOut
        }
        Err(err) => {
            // a failed poll never ends the job; only the deadline does
            warn!(job_id = %id, attempts, error = %err, "Poll request failed");
            if Instant::now() < deadline {
                return ControlFlow::Continue(());
            }
            JobOutcome::TimedOut
        }
    };

    registry.resolve(id, outcome);
    ControlFlow::Break(())
}
