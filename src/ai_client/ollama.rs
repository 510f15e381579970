//! Ollama adapter (server-hosted vision model)

use super::{
    http_client, non_empty, AnalysisBackend, BackendError, BackendProfile, BackendResult, HEALTH_TIMEOUT,
};
use crate::models::Frame;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// /api/generate request body
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Ollama backend
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    /// Vision model used for frame batches
    vision_model: String,
    /// Text model used for consolidation and classification
    text_model: String,
    health_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(base_url: String, vision_model: String, text_model: String) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            vision_model,
            text_model,
            health_timeout: HEALTH_TIMEOUT,
        }
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    async fn generate(&self, model: &str, prompt: &str, images: Vec<String>) -> BackendResult<String> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            images,
            stream: false,
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let parsed: GenerateResponse = resp.json().await?;
        non_empty(parsed.response)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AnalysisBackend for OllamaBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile::remote(self.vision_model.clone())
    }

    async fn analyze_batch(&self, frames: &[Frame], prompt: &str) -> BackendResult<String> {
        let images = frames.iter().map(|f| STANDARD.encode(&f.jpeg)).collect();
        tracing::debug!(
            model = %self.vision_model,
            frames = frames.len(),
            "Sending batch to Ollama"
        );
        self.generate(&self.vision_model, prompt, images).await
    }

    async fn classify(&self, prompt: &str) -> BackendResult<String> {
        self.generate(&self.text_model, prompt, Vec::new()).await
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        let resp = match self.client.get(&url).timeout(self.health_timeout).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), "Ollama health check failed");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "Ollama unreachable");
                return false;
            }
        };

        match resp.json::<TagsResponse>().await {
            Ok(tags) => {
                let found = tags.models.iter().any(|m| m.name.starts_with(&self.vision_model));
                if !found {
                    tracing::warn!(model = %self.vision_model, "Model not pulled on Ollama server");
                }
                found
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ollama tags response unreadable");
                false
            }
        }
    }
}
