use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::services::coordinator::EngineConfig;
use crate::services::retry::RetryPolicy;
use crate::services::timeout::TimeoutPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// ComfyUI base URL, used for image and video generation
    pub comfyui_url: String,

    /// Webhook that accepts prompt-analysis jobs (n8n)
    pub analysis_submit_url: String,

    /// Endpoint polled with `?id=` for prompt-analysis results
    pub analysis_poll_url: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,

    #[serde(default = "default_image_base_timeout_secs")]
    pub image_base_timeout_secs: u64,

    #[serde(default = "default_image_per_unit_timeout_secs")]
    pub image_per_unit_timeout_secs: u64,

    #[serde(default = "default_video_timeout_secs")]
    pub video_timeout_secs: u64,

    /// Retries after the first failed media fetch
    #[serde(default = "default_media_max_retries")]
    pub media_max_retries: u32,

    #[serde(default = "default_media_retry_base_ms")]
    pub media_retry_base_ms: u64,

    /// Per-request timeout of the outbound HTTP client
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of finished job results kept for status queries
    #[serde(default = "default_result_retention")]
    pub result_retention: usize,
}

/// Parsed backend endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub comfyui: Url,
    pub analysis_submit: Url,
    pub analysis_poll: Url,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid URL: {reason}")]
    InvalidUrl { name: &'static str, reason: String },

    #[error("POLL_INTERVAL_MS must be greater than zero")]
    ZeroPollInterval,

    #[error("{name} must be between 1 and {max} seconds, got {value}")]
    TimeoutOutOfRange {
        name: &'static str,
        value: u64,
        max: u64,
    },
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1500
}

fn default_analysis_timeout_secs() -> u64 {
    120
}

fn default_image_base_timeout_secs() -> u64 {
    5 * 60
}

fn default_image_per_unit_timeout_secs() -> u64 {
    2 * 60
}

fn default_video_timeout_secs() -> u64 {
    60 * 60
}

fn default_media_max_retries() -> u32 {
    2
}

fn default_media_retry_base_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_result_retention() -> usize {
    500
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        Ok(Endpoints {
            comfyui: parse_url("COMFYUI_URL", &self.comfyui_url)?,
            analysis_submit: parse_url("ANALYSIS_SUBMIT_URL", &self.analysis_submit_url)?,
            analysis_poll: parse_url("ANALYSIS_POLL_URL", &self.analysis_poll_url)?,
        })
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(EngineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeouts: TimeoutPolicy {
                analysis: timeout_secs("ANALYSIS_TIMEOUT_SECS", self.analysis_timeout_secs)?,
                image_base: timeout_secs("IMAGE_BASE_TIMEOUT_SECS", self.image_base_timeout_secs)?,
                image_per_unit: timeout_secs(
                    "IMAGE_PER_UNIT_TIMEOUT_SECS",
                    self.image_per_unit_timeout_secs,
                )?,
                video: timeout_secs("VIDEO_TIMEOUT_SECS", self.video_timeout_secs)?,
            },
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.media_max_retries,
            Duration::from_millis(self.media_retry_base_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn timeout_secs(name: &'static str, value: u64) -> Result<Duration, ConfigError> {
    let max = TimeoutPolicy::MAX_TIMEOUT.as_secs();
    if value == 0 || value > max {
        return Err(ConfigError::TimeoutOutOfRange { name, value, max });
    }
    Ok(Duration::from_secs(value))
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })
}
