use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::job::{CostParameters, JobId, JobKind};
use crate::models::result::JobResult;
use crate::services::registry::PendingSnapshot;
use crate::services::retry::FailureClass;

/// Request to submit a job.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(skip)]
    pub kind: JobKind,

    #[garde(length(min = 1, max = 512))]
    pub label: String,

    /// Backend-specific body (ComfyUI workflow graph, analysis input, ...).
    #[garde(skip)]
    #[serde(default)]
    pub payload: Value,

    #[garde(dive)]
    #[serde(default, alias = "costParameters")]
    pub cost: CostParameters,
}

/// Response after a job was accepted by its backend.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String,
    pub timeout_secs: u64,
}

/// Response for querying a job: either still pending or its final result.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl JobStatusResponse {
    pub fn pending(snapshot: PendingSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id,
            status: "pending".to_string(),
            attempts: Some(snapshot.attempts),
            remaining_secs: Some(snapshot.remaining_secs),
            result: None,
        }
    }

    pub fn finished(result: JobResult) -> Self {
        Self {
            job_id: result.job_id.clone(),
            status: result.status.as_str().to_string(),
            attempts: Some(result.attempts),
            remaining_secs: None,
            result: Some(result),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub job_id: JobId,
    pub cancelled: bool,
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub url: String,
}

/// Body returned when a media file cannot be retrieved. `retryable: false`
/// tells the UI to offer opening the file directly instead of retrying.
#[derive(Debug, Serialize)]
pub struct MediaErrorResponse {
    pub class: Option<FailureClass>,
    pub retryable: bool,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
