use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::job::JobId;

/// A file produced by a generation job, addressable through the backend's
/// `view` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
    pub subfolder: String,
    #[serde(rename = "type")]
    pub file_type: String,
    /// Output node that produced the file.
    pub node: String,
    /// Field under which the node exposed it (`images`, `gifs`, ...).
    pub field: String,
    pub url: String,
}

/// Canonical payload of an image or video generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub media_urls: Vec<String>,
    pub files: Vec<FileDescriptor>,
}

/// Canonical payload of an image-to-prompt analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub text: String,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub style: String,
    pub mood: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobPayload {
    Generation(GenerationOutput),
    Analysis(AnalysisOutput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Timeout,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Timeout => "timeout",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

/// Classified failure attached to an `error` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum JobError {
    /// A result arrived but held nothing usable. `shape` summarises the raw
    /// payload for operators.
    #[error("result could not be normalized: {detail}")]
    Normalization {
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<serde_json::Value>,
    },

    /// The backend itself reported that execution failed.
    #[error("backend reported failure: {message}")]
    Backend { message: String },

    /// The submit call was rejected; the job was never registered.
    #[error("submission failed: {message}")]
    Submission { message: String },
}

/// Terminal transition of a pending job. Exactly one of these is produced
/// per job id.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(JobPayload),
    Failed(JobError),
    TimedOut,
    Cancelled,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Succeeded(_) => JobStatus::Success,
            JobOutcome::Failed(_) => JobStatus::Error,
            JobOutcome::TimedOut => JobStatus::Timeout,
            JobOutcome::Cancelled => JobStatus::Cancelled,
        }
    }
}

/// The single result delivered for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JobPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub attempts: u32,
    pub resolved_at: DateTime<Utc>,
}

impl JobResult {
    pub fn from_outcome(job_id: JobId, outcome: JobOutcome, attempts: u32) -> Self {
        let status = outcome.status();
        let (payload, error) = match outcome {
            JobOutcome::Succeeded(payload) => (Some(payload), None),
            JobOutcome::Failed(error) => (None, Some(error)),
            JobOutcome::TimedOut | JobOutcome::Cancelled => (None, None),
        };

        Self {
            job_id,
            status,
            payload,
            error,
            attempts,
            resolved_at: Utc::now(),
        }
    }

    pub fn generation(&self) -> Option<&GenerationOutput> {
        match &self.payload {
            Some(JobPayload::Generation(output)) => Some(output),
            _ => None,
        }
    }

    pub fn analysis(&self) -> Option<&AnalysisOutput> {
        match &self.payload {
            Some(JobPayload::Analysis(output)) => Some(output),
            _ => None,
        }
    }
}
