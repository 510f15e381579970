//! AIClient - Vision-language analysis backend adapters
//!
//! ## Responsibilities
//!
//! - Common contract for batch image analysis and text-only prompts
//! - Remote server-hosted model (Ollama) adapter
//! - Locally hosted model (OpenAI-compatible endpoint) adapter
//! - Backend capability profile (batch size, resolution, parallelism)
//! - Transport error classification for the retry policy

mod local;
mod ollama;

pub use local::LocalModelBackend;
pub use ollama::OllamaBackend;

use crate::models::Frame;
use crate::retry::Retryable;
use async_trait::async_trait;
use std::time::Duration;

/// Backend error
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Request exceeded its deadline
    #[error("backend request timed out")]
    Timeout,

    /// Connection refused, reset, DNS failure ...
    #[error("backend transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend answered with no text
    #[error("backend returned an empty response")]
    EmptyResponse,

    /// Response body could not be decoded
    #[error("backend response decode error: {0}")]
    Decode(String),
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Timeout)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Transport(e.to_string())
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Which backend family is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiMode {
    /// Server-hosted vision model
    Ollama,
    /// Locally hosted model with tighter memory limits
    Local,
}

impl AiMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiMode::Ollama => "ollama",
            AiMode::Local => "local",
        }
    }
}

impl std::str::FromStr for AiMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "remote" => Ok(AiMode::Ollama),
            "local" | "transformer" => Ok(AiMode::Local),
            other => Err(crate::Error::Config(format!("Unknown AI mode: {}", other))),
        }
    }
}

/// Capabilities the analysis pipeline adapts to
#[derive(Debug, Clone, PartialEq)]
pub struct BackendProfile {
    pub mode: AiMode,
    /// Model name reported in logs and analysis records
    pub model: String,
    /// Frames per batch request
    pub batch_size: usize,
    /// Batches allowed in flight at once
    pub batch_concurrency: usize,
    /// Square edge frames are resized to
    pub resolution: u32,
    /// Confidence base before bonuses
    pub base_confidence: f64,
    pub batch_timeout: Duration,
    pub consolidation_timeout: Duration,
}

impl BackendProfile {
    pub fn remote(model: impl Into<String>) -> Self {
        Self {
            mode: AiMode::Ollama,
            model: model.into(),
            batch_size: 4,
            batch_concurrency: 2,
            resolution: 1024,
            base_confidence: 0.7,
            batch_timeout: Duration::from_secs(180),
            consolidation_timeout: Duration::from_secs(420),
        }
    }

    pub fn local(model: impl Into<String>, resolution: u32) -> Self {
        Self {
            mode: AiMode::Local,
            model: model.into(),
            batch_size: 1,
            batch_concurrency: 1,
            resolution,
            base_confidence: 0.5,
            batch_timeout: Duration::from_secs(180),
            consolidation_timeout: Duration::from_secs(420),
        }
    }
}

/// Vision-language analysis backend
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn profile(&self) -> BackendProfile;

    /// Describe a batch of frames
    async fn analyze_batch(&self, frames: &[Frame], prompt: &str) -> BackendResult<String>;

    /// Text-only completion (consolidation, classification, keywords)
    async fn classify(&self, prompt: &str) -> BackendResult<String>;

    async fn health_check(&self) -> bool;
}

/// Deadline for startup health checks
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an HTTP client with a connect timeout only; request deadlines are
/// applied per call.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Reject empty or whitespace-only completions
pub(crate) fn non_empty(text: Option<String>) -> BackendResult<String> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
        _ => Err(BackendError::EmptyResponse),
    }
}
