//! Capabilities the engine calls into: submit a job, fetch its result.
//!
//! Endpoint URLs and the HTTP client are passed in explicitly; nothing here
//! reaches for process-wide state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::job::{JobId, JobKind};

/// Body sent to a backend when a job is submitted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEnvelope {
    pub id: JobId,
    pub label: String,
    pub payload: Value,
    pub submitted_at: DateTime<Utc>,
}

/// What a single poll of the result store returned.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    NotReady,
    Ready(Value),
    /// The backend finished the job but reports that execution failed.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend acknowledged job as {returned} instead of {expected}")]
    CorrelationMismatch { expected: JobId, returned: String },

    #[error("invalid backend URL: {0}")]
    Url(String),
}

#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Hand the job to the backend. Any non-2xx status is an error.
    async fn submit(&self, envelope: &SubmitEnvelope) -> Result<(), BackendError>;

    /// Look up the result for a job id.
    async fn fetch_result(&self, id: &JobId) -> Result<PollResponse, BackendError>;

    /// Base URL used to build retrieval links for produced files.
    fn view_endpoint(&self) -> Option<&Url> {
        None
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Routes each job kind to the backend that runs it.
#[derive(Clone, Default)]
pub struct BackendSet {
    backends: HashMap<JobKind, Arc<dyn JobBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: JobKind, backend: Arc<dyn JobBackend>) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobBackend>> {
        self.backends.get(&kind).cloned()
    }

    /// Distinct backends, for health reporting.
    pub fn unique(&self) -> Vec<Arc<dyn JobBackend>> {
        let mut seen: Vec<Arc<dyn JobBackend>> = Vec::new();
        for backend in self.backends.values() {
            if !seen.iter().any(|b| Arc::ptr_eq(b, backend)) {
                seen.push(backend.clone());
            }
        }
        seen
    }
}

/// ComfyUI prompt queue. Our correlation id is passed as `prompt_id`, so the
/// history entry is keyed by it.
pub struct ComfyUiBackend {
    http: Client,
    base_url: Url,
    view_url: Url,
    client_id: String,
}

#[derive(Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

#[derive(Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: Value,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    messages: Vec<Value>,
}

impl ComfyUiBackend {
    pub fn new(http: Client, base_url: Url) -> Result<Self, BackendError> {
        let view_url = join(&base_url, "view")?;
        Ok(Self {
            http,
            base_url,
            view_url,
            client_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        join(&self.base_url, path)
    }
}

#[async_trait]
impl JobBackend for ComfyUiBackend {
    fn name(&self) -> &str {
        "comfyui"
    }

    async fn submit(&self, envelope: &SubmitEnvelope) -> Result<(), BackendError> {
        let body = serde_json::json!({
            "prompt": envelope.payload,
            "prompt_id": envelope.id,
            "client_id": self.client_id,
            "extra_data": {
                "label": envelope.label,
                "submitted_at": envelope.submitted_at,
            },
        });

        let response = self
            .http
            .post(self.endpoint("prompt")?)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let ack: PromptResponse = response.json().await?;
        if ack.prompt_id != envelope.id.as_str() {
            return Err(BackendError::CorrelationMismatch {
                expected: envelope.id.clone(),
                returned: ack.prompt_id,
            });
        }
        Ok(())
    }

    async fn fetch_result(&self, id: &JobId) -> Result<PollResponse, BackendError> {
        let url = self.endpoint(&format!("history/{}", id))?;
        let response = ensure_success(self.http.get(url).send().await?).await?;

        let mut history: HashMap<String, HistoryEntry> = response.json().await?;
        let Some(entry) = history.remove(id.as_str()) else {
            return Ok(PollResponse::NotReady);
        };

        if let Some(status) = &entry.status {
            if status.status_str.as_deref() == Some("error") {
                return Ok(PollResponse::Failed(execution_error(&status.messages)));
            }
        }
        Ok(PollResponse::Ready(entry.outputs))
    }

    fn view_endpoint(&self) -> Option<&Url> {
        Some(&self.view_url)
    }

    async fn is_available(&self) -> bool {
        let Ok(url) = self.endpoint("system_stats") else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Webhook pair (e.g. n8n): one URL accepts submissions, another is polled
/// with `?id=`.
pub struct WebhookBackend {
    http: Client,
    submit_url: Url,
    poll_url: Url,
}

impl WebhookBackend {
    pub fn new(http: Client, submit_url: Url, poll_url: Url) -> Self {
        Self {
            http,
            submit_url,
            poll_url,
        }
    }
}

#[async_trait]
impl JobBackend for WebhookBackend {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn submit(&self, envelope: &SubmitEnvelope) -> Result<(), BackendError> {
        let response = self
            .http
            .post(self.submit_url.clone())
            .json(envelope)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_result(&self, id: &JobId) -> Result<PollResponse, BackendError> {
        let mut url = self.poll_url.clone();
        url.query_pairs_mut().append_pair("id", id.as_str());

        let response = self.http.get(url).send().await?;
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT
        ) {
            return Ok(PollResponse::NotReady);
        }
        let response = ensure_success(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(PollResponse::NotReady);
        }
        let body: Value = serde_json::from_str(&text).map_err(|e| BackendError::Status {
            status: 200,
            body: format!("unparseable result body: {}", e),
        })?;
        Ok(classify_webhook_body(body))
    }
}

/// Map a webhook poll body onto a poll response.
pub fn classify_webhook_body(body: Value) -> PollResponse {
    match &body {
        Value::Null => return PollResponse::NotReady,
        Value::Array(items) if items.is_empty() => return PollResponse::NotReady,
        Value::Object(map) => {
            if map.is_empty() {
                return PollResponse::NotReady;
            }
            match map.get("status").and_then(Value::as_str) {
                Some("pending") | Some("processing") | Some("queued") => {
                    return PollResponse::NotReady;
                }
                Some("error") | Some("failed") => {
                    let message = map
                        .get("error")
                        .or_else(|| map.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("analysis failed");
                    return PollResponse::Failed(message.to_string());
                }
                _ => {}
            }
        }
        _ => {}
    }
    PollResponse::Ready(body)
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}

fn join(base: &Url, path: &str) -> Result<Url, BackendError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).map_err(|e| BackendError::Url(e.to_string()))
}

fn execution_error(messages: &[Value]) -> String {
    // messages are `[event_name, details]` pairs
    messages
        .iter()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|pair| pair.get(1))
        .and_then(|details| {
            let node = details.get("node_type").and_then(Value::as_str).unwrap_or("node");
            let message = details.get("exception_message").and_then(Value::as_str)?;
            Some(format!("{}: {}", node, message.trim()))
        })
        .unwrap_or_else(|| "execution failed".to_string())
}
