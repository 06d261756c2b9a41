//! Retrieval of files produced by already-resolved jobs.
//!
//! Failures here never touch the job's result. They are classified and
//! retried per [`RetryPolicy`], then surfaced to the caller with the class
//! attached.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use tracing::{info, warn};

use crate::services::retry::{FailureClass, RetryDecision, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct MediaBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{class} failure: {message}")]
pub struct MediaFailure {
    pub class: FailureClass,
    pub message: String,
}

impl MediaFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MediaError {
    #[error("fetch of {url} failed after {attempts} attempt(s): {failure}")]
    Permanent {
        url: String,
        attempts: u32,
        failure: MediaFailure,
    },

    #[error("a fetch of {0} is already in progress")]
    InFlight(String),
}

impl MediaError {
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            MediaError::Permanent { failure, .. } => Some(failure.class),
            MediaError::InFlight(_) => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            MediaError::Permanent { attempts, .. } => *attempts,
            MediaError::InFlight(_) => 0,
        }
    }
}

/// One attempt at retrieving a file.
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    async fn get(&self, url: &str) -> Result<MediaBody, MediaFailure>;
}

pub struct HttpMediaSource {
    http: Client,
}

impl HttpMediaSource {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MediaSource for HttpMediaSource {
    async fn get(&self, url: &str) -> Result<MediaBody, MediaFailure> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| MediaFailure::new(classify_transport(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaFailure::new(
                classify_status(status),
                format!("server returned {}", status),
            ));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MediaFailure::new(classify_transport(&e), e.to_string()))?
            .to_vec();

        if let Some(class) = classify_content(content_type.as_deref(), &bytes) {
            return Err(MediaFailure::new(
                class,
                format!(
                    "unusable body ({} bytes, {})",
                    bytes.len(),
                    content_type.as_deref().unwrap_or("no content type")
                ),
            ));
        }

        Ok(MediaBody {
            bytes,
            content_type,
        })
    }
}

pub fn classify_transport(err: &reqwest::Error) -> FailureClass {
    if err.is_timeout() {
        FailureClass::Aborted
    } else if err.is_decode() {
        FailureClass::Decode
    } else if err.is_connect() || err.is_request() || err.is_body() {
        FailureClass::Network
    } else {
        FailureClass::Unknown
    }
}

pub fn classify_status(status: StatusCode) -> FailureClass {
    match status.as_u16() {
        408 | 429 | 500..=599 => FailureClass::Network,
        406 | 415 => FailureClass::Unsupported,
        _ => FailureClass::Unknown,
    }
}

/// Inspect a successfully transferred body. `None` means it looks usable.
pub fn classify_content(content_type: Option<&str>, bytes: &[u8]) -> Option<FailureClass> {
    if bytes.is_empty() {
        return Some(FailureClass::Decode);
    }
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match mime.as_deref() {
        Some("image/svg+xml") => None,
        Some(m) if m.starts_with("image/") => image::guess_format(bytes)
            .err()
            .map(|_| FailureClass::Decode),
        Some(m) if m.starts_with("text/") || m == "application/json" => {
            Some(FailureClass::Unsupported)
        }
        _ => None,
    }
}

/// Fetches media with classified retries. At most one fetch per URL runs
/// at a time.
pub struct MediaFetcher {
    source: Arc<dyn MediaSource>,
    policy: RetryPolicy,
    in_flight: Mutex<HashSet<String>>,
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    url: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.url);
    }
}

impl MediaFetcher {
    pub fn new(source: Arc<dyn MediaSource>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, url: &str) -> Result<InFlightGuard<'_>, MediaError> {
        let mut set = self.in_flight.lock();
        if !set.insert(url.to_string()) {
            return Err(MediaError::InFlight(url.to_string()));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            url: url.to_string(),
        })
    }

    pub async fn fetch(&self, url: &str) -> Result<MediaBody, MediaError> {
        let _guard = self.claim(url)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            // every attempt starts clean: nothing from the previous failure is reused
            let failure = match self.source.get(url).await {
                Ok(body) => {
                    if attempt > 1 {
                        info!(url, attempt, "Media fetch recovered after retry");
                    }
                    return Ok(body);
                }
                Err(failure) => failure,
            };

            match self.policy.decide(failure.class, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    metrics::counter!("relay_media_retries_total", "class" => failure.class.to_string())
                        .increment(1);
                    warn!(
                        url,
                        attempt,
                        class = %failure.class,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.message,
                        "Media fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    warn!(url, attempt, class = %failure.class, error = %failure.message, "Media fetch failed permanently");
                    return Err(MediaError::Permanent {
                        url: url.to_string(),
                        attempts: attempt,
                        failure,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    #[test]
    fn test_status_classes() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureClass::Network);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureClass::Network);
        assert_eq!(
            classify_status(StatusCode::UNSUPPORTED_MEDIA_TYPE),
            FailureClass::Unsupported
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureClass::Unknown);
    }

    #[test]
    fn test_content_classes() {
        assert_eq!(classify_content(Some("image/png"), PNG_HEADER), None);
        assert_eq!(
            classify_content(Some("image/png"), b"<html>oops</html>"),
            Some(FailureClass::Decode)
        );
        assert_eq!(
            classify_content(Some("text/html; charset=utf-8"), b"<html></html>"),
            Some(FailureClass::Unsupported)
        );
        assert_eq!(classify_content(Some("video/mp4"), b"\0\0\0\x18ftypmp42"), None);
        assert_eq!(classify_content(None, b""), Some(FailureClass::Decode));
    }

    #[test]
    fn test_error_exposes_class() {
        let err = MediaError::Permanent {
            url: "http://comfy/view?filename=a.mp4".to_string(),
            attempts: 1,
            failure: MediaFailure::new(FailureClass::Decode, "bad moov atom"),
        };
        assert_eq!(err.class(), Some(FailureClass::Decode));
        assert_eq!(err.attempts(), 1);
        assert_eq!(MediaError::InFlight("u".to_string()).class(), None);
    }
}
