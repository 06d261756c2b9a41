use std::fmt;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Correlation key shared between a submission and its eventual result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of external work. Selects the backend, the timeout rule and the
/// normalizer variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    ImageGeneration,
    VideoGeneration,
    PromptAnalysis,
}

impl JobKind {
    /// Generation jobs produce files on the ComfyUI side; analysis jobs
    /// produce a flat record.
    pub fn is_generation(self) -> bool {
        matches!(self, JobKind::ImageGeneration | JobKind::VideoGeneration)
    }
}

/// Declared cost of a job, used only to derive its deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct CostParameters {
    #[garde(range(min = 1, max = 256))]
    #[serde(default, alias = "batchSize", skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<i64>,

    #[garde(range(min = 1, max = 100_000))]
    #[serde(default, alias = "frameCount", skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<i64>,

    #[garde(range(min = 0.1, max = 240.0))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Unrecognised keys are kept so they can be logged with the job.
    #[garde(skip)]
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CostParameters {
    pub fn batch(batch_size: i64) -> Self {
        Self {
            batch_size: Some(batch_size),
            ..Self::default()
        }
    }

    pub fn frames(frame_count: i64, fps: Option<f64>) -> Self {
        Self {
            frame_count: Some(frame_count),
            fps,
            ..Self::default()
        }
    }
}

/// A unit of submitted asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub label: String,
    pub kind: JobKind,
    pub cost: CostParameters,
    pub submitted_at: DateTime<Utc>,
}
