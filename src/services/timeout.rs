use std::time::Duration;

use crate::models::job::{CostParameters, JobKind};

/// Cost parameters that cannot produce a bounded deadline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind} jobs require `{field}` in cost parameters")]
    MissingCost { kind: JobKind, field: &'static str },

    #[error("`{field}` must be at least 1, got {value}")]
    NonPositive { field: &'static str, value: i64 },

    #[error("{kind} deadline exceeds the {max_secs}s ceiling")]
    DeadlineTooLong { kind: JobKind, max_secs: u64 },
}

/// Per-kind deadline table.
///
/// Each kind keeps its own rule: analysis and video use a fixed ceiling,
/// image generation scales with batch size.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub analysis: Duration,
    pub image_base: Duration,
    pub image_per_unit: Duration,
    pub video: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            analysis: Duration::from_secs(120),
            image_base: Duration::from_secs(5 * 60),
            image_per_unit: Duration::from_secs(2 * 60),
            video: Duration::from_secs(60 * 60),
        }
    }
}

impl TimeoutPolicy {
    /// Longest deadline any job may be given.
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// Deadline length for a job, or a validation error if the declared cost
    /// is missing or malformed.
    pub fn compute(&self, kind: JobKind, cost: &CostParameters) -> Result<Duration, ValidationError> {
        match kind {
            JobKind::PromptAnalysis => bounded(kind, Some(self.analysis)),
            JobKind::ImageGeneration => {
                let batch_size = require_positive(kind, "batch_size", cost.batch_size)?;
                // batch_size >= 1, so the multiplier never underflows
                let extra_units = u32::try_from(batch_size - 1).unwrap_or(u32::MAX);
                let timeout = self
                    .image_per_unit
                    .checked_mul(extra_units)
                    .and_then(|extra| self.image_base.checked_add(extra));
                bounded(kind, timeout)
            }
            JobKind::VideoGeneration => {
                // frame count bounds polling granularity, not the deadline
                require_positive(kind, "frame_count", cost.frame_count)?;
                bounded(kind, Some(self.video))
            }
        }
    }
}

fn bounded(kind: JobKind, timeout: Option<Duration>) -> Result<Duration, ValidationError> {
    match timeout {
        Some(timeout) if timeout <= TimeoutPolicy::MAX_TIMEOUT => Ok(timeout),
        _ => Err(ValidationError::DeadlineTooLong {
            kind,
            max_secs: TimeoutPolicy::MAX_TIMEOUT.as_secs(),
        }),
    }
}

fn require_positive(
    kind: JobKind,
    field: &'static str,
    value: Option<i64>,
) -> Result<i64, ValidationError> {
    match value {
        None => Err(ValidationError::MissingCost { kind, field }),
        Some(v) if v <= 0 => Err(ValidationError::NonPositive { field, value: v }),
        Some(v) => Ok(v),
    }
}
