//! Locally hosted model adapter
//!
//! Talks to an OpenAI-compatible chat completions endpoint served on the same
//! host (llama.cpp server, vLLM ...). Frames are sent one at a time at reduced
//! resolution.

use super::{
    http_client, non_empty, AnalysisBackend, BackendError, BackendProfile, BackendResult, HEALTH_TIMEOUT,
};
use crate::models::Frame;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const MAX_TOKENS: u32 = 512;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Local model backend
pub struct LocalModelBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    resolution: u32,
    health_timeout: Duration,
}

impl LocalModelBackend {
    pub fn new(base_url: String, model: String, resolution: u32) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            resolution,
            health_timeout: HEALTH_TIMEOUT,
        }
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    async fn chat(&self, content: Value) -> BackendResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": content }],
        });

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let parsed: ChatResponse = resp.json().await?;
        non_empty(parsed.choices.into_iter().next().and_then(|c| c.message.content))
    }
}

/// Multimodal message content: the prompt followed by inline JPEG data URLs
fn image_content(frames: &[Frame], prompt: &str) -> Value {
    let mut parts = vec![json!({ "type": "text", "text": prompt })];
    parts.extend(frames.iter().map(|f| {
        json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/jpeg;base64,{}", STANDARD.encode(&f.jpeg)) }
        })
    }));
    Value::Array(parts)
}

#[async_trait]
impl AnalysisBackend for LocalModelBackend {
    fn profile(&self) -> BackendProfile {
        BackendProfile::local(self.model.clone(), self.resolution)
    }

    async fn analyze_batch(&self, frames: &[Frame], prompt: &str) -> BackendResult<String> {
        self.chat(image_content(frames, prompt)).await
    }

    async fn classify(&self, prompt: &str) -> BackendResult<String> {
        self.chat(Value::String(prompt.to_string())).await
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(self.health_timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "Local model server unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::{get, post}, Json, Router};

    #[test]
    fn test_image_content_layout() {
        let frames = vec![Frame::new(0, 1, 1, vec![1, 2, 3])];
        let content = image_content(&frames, "look");
        let parts = content.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], "look");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,AQID"));
    }

    #[tokio::test]
    async fn test_chat_completion_roundtrip() {
        let router = Router::new()
            .route(
                "/v1/chat/completions",
                post(|Json(body): Json<Value>| async move {
                    let is_text = body["messages"][0]["content"].is_string();
                    let reply = if is_text { "HIGH" } else { "one person walking" };
                    Json(json!({ "choices": [{ "message": { "content": reply } }] }))
                }),
            )
            .route("/health", get(|| async { "ok" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let backend = LocalModelBackend::new(format!("http://{}", addr), "smolvlm".into(), 512);
        assert!(backend.health_check().await);
        assert_eq!(backend.classify("level?").await.unwrap(), "HIGH");

        let frames = vec![Frame::new(0, 1, 1, vec![0xFF])];
        assert_eq!(
            backend.analyze_batch(&frames, "describe").await.unwrap(),
            "one person walking"
        );
        assert_eq!(backend.profile().resolution, 512);
    }

    #[tokio::test]
    async fn test_health_check_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let backend = LocalModelBackend::new(format!("http://{}", addr), "smolvlm".into(), 512)
            .with_health_timeout(Duration::from_millis(200));
        let healthy = tokio::time::timeout(Duration::from_secs(5), backend.health_check())
            .await
            .expect("health check must respect its deadline");
        assert!(!healthy);
    }
}
