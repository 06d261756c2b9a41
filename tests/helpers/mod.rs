//! Test doubles for the engine's external capabilities, plus HTTP helpers
//! for end-to-end runs against a live relay.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use job_relay::models::job::{CostParameters, JobId, JobKind};
use job_relay::models::submission::{JobStatusResponse, SubmitRequest, SubmitResponse};
use job_relay::services::backend::{
    BackendError, BackendSet, JobBackend, PollResponse, SubmitEnvelope,
};
use job_relay::services::coordinator::{EngineConfig, JobCoordinator};
use job_relay::services::correlation::CorrelationIdGenerator;
use job_relay::services::media::{MediaBody, MediaFailure, MediaSource};
use job_relay::services::timeout::TimeoutPolicy;
use parking_lot::Mutex;
use reqwest::{multipart, Url};
use serde_json::Value;
use tokio::time::{sleep, Instant};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Backend whose result store is scripted per job.
pub struct FakeBackend {
    view: Url,
    reject_submissions: AtomicBool,
    failing_polls: AtomicU32,
    submit_latency: Mutex<Duration>,
    fetch_latency: Mutex<Duration>,
    respond_after: Mutex<Option<(Duration, PollResponse)>>,
    scripted: Mutex<HashMap<JobId, (Instant, PollResponse)>>,
    submitted: Mutex<Vec<SubmitEnvelope>>,
    polls: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            view: Url::parse("http://comfy.test:8188/view").unwrap(),
            reject_submissions: AtomicBool::new(false),
            failing_polls: AtomicU32::new(0),
            submit_latency: Mutex::new(Duration::ZERO),
            fetch_latency: Mutex::new(Duration::ZERO),
            respond_after: Mutex::new(None),
            scripted: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicU32::new(0),
        })
    }

    /// Every job submitted from now on becomes ready `delay` after submission.
    pub fn respond_after(&self, delay: Duration, response: PollResponse) {
        *self.respond_after.lock() = Some((delay, response));
    }

    pub fn reject_submissions(&self) {
        self.reject_submissions.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_polls(&self, count: u32) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    pub fn set_submit_latency(&self, latency: Duration) {
        *self.submit_latency.lock() = latency;
    }

    pub fn set_fetch_latency(&self, latency: Duration) {
        *self.fetch_latency.lock() = latency;
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<SubmitEnvelope> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn submit(&self, envelope: &SubmitEnvelope) -> Result<(), BackendError> {
        let latency = *self.submit_latency.lock();
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 503,
                body: "queue full".to_string(),
            });
        }
        self.submitted.lock().push(envelope.clone());

        let script = self.respond_after.lock().clone();
        if let Some((delay, response)) = script {
            self.scripted
                .lock()
                .insert(envelope.id.clone(), (Instant::now() + delay, response));
        }
        Ok(())
    }

    async fn fetch_result(&self, id: &JobId) -> Result<PollResponse, BackendError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.fetch_latency.lock();
        if !latency.is_zero() {
            sleep(latency).await;
        }

        let failing = self.failing_polls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_polls.store(failing - 1, Ordering::SeqCst);
            return Err(BackendError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }

        let scripted = self.scripted.lock().get(id).cloned();
        match scripted {
            Some((ready_at, response)) if Instant::now() >= ready_at => Ok(response),
            _ => Ok(PollResponse::NotReady),
        }
    }

    fn view_endpoint(&self) -> Option<&Url> {
        Some(&self.view)
    }
}

/// Hands out predetermined ids, then `job-N`.
pub struct SequentialIds {
    ids: Mutex<VecDeque<String>>,
    counter: AtomicU32,
}

impl SequentialIds {
    pub fn new(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            ids: Mutex::new(ids.iter().map(|id| id.to_string()).collect()),
            counter: AtomicU32::new(0),
        })
    }
}

impl CorrelationIdGenerator for SequentialIds {
    fn new_id(&self) -> JobId {
        match self.ids.lock().pop_front() {
            Some(id) => JobId::new(id),
            None => JobId::new(format!(
                "job-{}",
                self.counter.fetch_add(1, Ordering::SeqCst)
            )),
        }
    }
}

pub fn backends_for(backend: Arc<FakeBackend>) -> BackendSet {
    let shared: Arc<dyn JobBackend> = backend;
    BackendSet::new()
        .with(JobKind::ImageGeneration, shared.clone())
        .with(JobKind::VideoGeneration, shared.clone())
        .with(JobKind::PromptAnalysis, shared)
}

pub fn engine_with(backend: Arc<FakeBackend>, ids: &[&str]) -> JobCoordinator {
    JobCoordinator::new(
        backends_for(backend),
        EngineConfig {
            poll_interval: POLL_INTERVAL,
            timeouts: TimeoutPolicy::default(),
        },
    )
    .with_id_generator(SequentialIds::new(ids))
}

pub fn analysis_request(label: &str) -> SubmitRequest {
    SubmitRequest {
        kind: JobKind::PromptAnalysis,
        label: label.to_string(),
        payload: serde_json::json!({ "image": "aGVsbG8=", "mime_type": "image/png" }),
        cost: CostParameters::default(),
    }
}

pub fn image_request(label: &str, batch_size: i64) -> SubmitRequest {
    SubmitRequest {
        kind: JobKind::ImageGeneration,
        label: label.to_string(),
        payload: serde_json::json!({ "3": { "class_type": "KSampler", "inputs": {} } }),
        cost: CostParameters::batch(batch_size),
    }
}

pub fn video_request(label: &str, frame_count: i64) -> SubmitRequest {
    SubmitRequest {
        kind: JobKind::VideoGeneration,
        label: label.to_string(),
        payload: serde_json::json!({ "12": { "class_type": "WanImageToVideo", "inputs": {} } }),
        cost: CostParameters::frames(frame_count, Some(16.0)),
    }
}

/// Media source that replays a script of attempt outcomes, then repeats
/// the fallback.
pub struct ScriptedMediaSource {
    script: Mutex<VecDeque<Result<MediaBody, MediaFailure>>>,
    fallback: Result<MediaBody, MediaFailure>,
    latency: Duration,
    calls: AtomicU32,
}

impl ScriptedMediaSource {
    pub fn new(
        script: Vec<Result<MediaBody, MediaFailure>>,
        fallback: Result<MediaBody, MediaFailure>,
    ) -> Arc<Self> {
        Self::with_latency(script, fallback, Duration::ZERO)
    }

    pub fn with_latency(
        script: Vec<Result<MediaBody, MediaFailure>>,
        fallback: Result<MediaBody, MediaFailure>,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            latency,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for ScriptedMediaSource {
    async fn get(&self, _url: &str) -> Result<MediaBody, MediaFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Submit a job as JSON to a running relay.
pub async fn submit_job(
    client: &reqwest::Client,
    base_url: &str,
    body: &Value,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Upload an image to the analysis endpoint of a running relay.
pub async fn upload_for_analysis(
    client: &reqwest::Client,
    base_url: &str,
    filename: &str,
    image_bytes: Vec<u8>,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "image",
        multipart::Part::bytes(image_bytes)
            .file_name(filename.to_string())
            .mime_str("image/png")?,
    );

    let response = client
        .post(format!("{}/api/v1/analyze", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until it reaches a terminal state (with timeout).
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: &str,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "success" | "timeout" | "error" | "cancelled" => return Ok(status_response),
            "pending" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            other => {
                return Err(format!("Unknown job status: {}", other).into());
            }
        }
    }

    Err(format!("Job did not complete within {} seconds", timeout_secs).into())
}
