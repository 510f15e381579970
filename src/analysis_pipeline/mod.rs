//! AnalysisPipeline - Clip to threat assessment
//!
//! ## Responsibilities
//!
//! - Frame sampling from recorded clips
//! - Batched vision analysis with bounded concurrency
//! - Consolidation of batch summaries into one assessment
//! - Threat classification and keyword extraction with retry + fallback
//! - Confidence scoring
//! - Optional per-analysis JSON log
//!
//! `analyze` never fails: every backend error is absorbed and degrades the
//! result instead.

pub mod classifier;
pub mod prompts;
pub mod sampling;
pub mod session_log;

pub use sampling::SamplingConfig;

use crate::ai_client::{AnalysisBackend, BackendError, BackendProfile};
use crate::media::ClipFrameSource;
use crate::models::{AnalysisResult, BatchResult, Clip, Frame, ThreatLevel};
use crate::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use session_log::AnalysisSessionRecord;
use std::path::PathBuf;
use std::sync::Arc;

/// Turns a recorded clip into an assessment
#[async_trait]
pub trait ClipAnalyzer: Send + Sync {
    async fn analyze(&self, clip: &Clip) -> AnalysisResult;
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sampling: SamplingConfig,
    /// Policy for classification and keyword calls
    pub text_policy: RetryPolicy,
    /// Write a JSON record per analysis when set
    pub log_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            text_policy: RetryPolicy::backend_call(),
            log_dir: None,
        }
    }
}

/// Sampled frames with their clip indices
struct SampledFrames {
    indices: Vec<u64>,
    frames: Vec<Frame>,
}

pub struct AnalysisPipeline {
    backend: Arc<dyn AnalysisBackend>,
    frames: Arc<dyn ClipFrameSource>,
    config: PipelineConfig,
}

impl AnalysisPipeline {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        frames: Arc<dyn ClipFrameSource>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            backend,
            frames,
            config,
        }
    }

    async fn sample_frames(&self, clip: &Clip, resolution: u32) -> crate::Result<SampledFrames> {
        let info = self.frames.probe(clip).await?;
        let indices = sampling::sample_indices(info.fps, info.total_frames, &self.config.sampling);

        let mut frames = Vec::with_capacity(indices.len());
        let mut kept = Vec::with_capacity(indices.len());
        for &index in &indices {
            match self.frames.read_frame(clip, &info, index, resolution).await {
                Ok(Some(frame)) => {
                    frames.push(frame);
                    kept.push(index);
                }
                Ok(None) => {
                    tracing::debug!(frame_index = index, "No frame at index");
                }
                Err(e) => {
                    tracing::warn!(frame_index = index, error = %e, "Frame extraction failed");
                }
            }
        }

        tracing::debug!(
            clip = %clip.path().display(),
            fps = info.fps,
            total_frames = info.total_frames,
            extracted = frames.len(),
            "Frames sampled"
        );

        Ok(SampledFrames {
            indices: kept,
            frames,
        })
    }

    async fn run_batch(
        &self,
        batch_index: usize,
        start: usize,
        chunk: &[Frame],
        profile: &BackendProfile,
    ) -> BatchResult {
        let batch_number = batch_index + 1;
        let outcome = tokio::time::timeout(
            profile.batch_timeout,
            self.backend.analyze_batch(chunk, prompts::BATCH_PROMPT),
        )
        .await;

        let (summary, succeeded) = match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => (text.trim().to_string(), true),
            Ok(Ok(_)) | Ok(Err(BackendError::EmptyResponse)) => {
                tracing::warn!(batch = batch_number, "Batch returned no analysis");
                ("No analysis received".to_string(), false)
            }
            Ok(Err(e)) => {
                tracing::warn!(batch = batch_number, error = %e, "Batch analysis failed");
                (format!("Error: {}", e), false)
            }
            Err(_) => {
                tracing::warn!(
                    batch = batch_number,
                    timeout_sec = profile.batch_timeout.as_secs(),
                    "Batch analysis timed out"
                );
                (
                    format!("Error: batch timed out after {}s", profile.batch_timeout.as_secs()),
                    false,
                )
            }
        };

        BatchResult::new(batch_number, start, chunk.len(), summary, succeeded)
    }

    /// Analyze all batches, results ordered by batch number
    async fn analyze_batches(&self, frames: &[Frame], profile: &BackendProfile) -> Vec<BatchResult> {
        let size = profile.batch_size.max(1);
        let concurrency = profile.batch_concurrency.max(1);

        let batches: Vec<_> = frames
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| self.run_batch(i, i * size, chunk, profile))
            .collect();

        let mut results: Vec<BatchResult> = stream::iter(batches)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|b| b.batch_number);
        results
    }

    async fn consolidate(&self, summaries: &[&str], profile: &BackendProfile) -> String {
        let combined = prompts::combine_summaries(summaries.iter().copied());
        let prompt = prompts::consolidation_prompt(&combined);

        match tokio::time::timeout(profile.consolidation_timeout, self.backend.classify(&prompt)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => return text.trim().to_string(),
            Ok(Ok(_)) => tracing::warn!("Consolidation returned empty text"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Consolidation failed"),
            Err(_) => tracing::warn!(
                timeout_sec = profile.consolidation_timeout.as_secs(),
                "Consolidation timed out"
            ),
        }

        match summaries.first() {
            Some(first) if !first.trim().is_empty() => first.to_string(),
            _ => format!("Multiple batch summaries:\n{}", combined),
        }
    }

    async fn classify_threat(&self, text: &str) -> ThreatLevel {
        let prompt = prompts::threat_prompt(text);
        let prompt = prompt.as_str();
        let backend = &self.backend;

        with_retry(
            &self.config.text_policy,
            "threat_classification",
            |_| async move { backend.classify(prompt).await.map(|r| classifier::parse_threat_reply(&r)) },
            || classifier::fallback_threat_level(text),
        )
        .await
    }

    async fn extract_keywords(&self, text: &str) -> Vec<String> {
        let prompt = prompts::keyword_prompt(text);
        let prompt = prompt.as_str();
        let backend = &self.backend;

        let keywords = with_retry(
            &self.config.text_policy,
            "keyword_extraction",
            |_| async move { backend.classify(prompt).await.map(|r| classifier::parse_keywords(&r)) },
            Vec::new,
        )
        .await;

        if keywords.is_empty() {
            classifier::fallback_keywords(text)
        } else {
            keywords
        }
    }

    async fn write_log(
        &self,
        clip: &Clip,
        profile: &BackendProfile,
        sampled: &SampledFrames,
        batches: &[BatchResult],
        text: &str,
    ) {
        let Some(dir) = &self.config.log_dir else {
            return;
        };

        let record = AnalysisSessionRecord {
            timestamp: Utc::now(),
            video_path: clip.path().display().to_string(),
            model_used: &profile.model,
            processing_method: "batch_analysis",
            batch_size: profile.batch_size,
            frames_analyzed: sampled.frames.len(),
            frame_indices: &sampled.indices,
            batch_analyses: batches,
            consolidated_analysis: text,
            analysis_prompt: prompts::BATCH_PROMPT,
        };

        if let Err(e) = session_log::write_session_log(dir, &record).await {
            tracing::warn!(error = %e, "Failed to write analysis session log");
        }
    }

    pub async fn analyze(&self, clip: &Clip) -> AnalysisResult {
        let profile = self.backend.profile();
        tracing::info!(
            clip = %clip.path().display(),
            mode = profile.mode.as_str(),
            model = %profile.model,
            "Analysis started"
        );

        let sampled = match self.sample_frames(clip, profile.resolution).await {
            Ok(s) if !s.frames.is_empty() => s,
            Ok(_) => {
                tracing::error!(clip = %clip.path().display(), "No frames extracted");
                return AnalysisResult::failed(clip.clone(), "no frames extracted");
            }
            Err(e) => {
                tracing::error!(clip = %clip.path().display(), error = %e, "Clip probe failed");
                return AnalysisResult::failed(clip.clone(), &format!("frame extraction failed: {}", e));
            }
        };

        let batches = self.analyze_batches(&sampled.frames, &profile).await;
        let summaries: Vec<&str> = batches
            .iter()
            .filter(|b| b.succeeded)
            .map(|b| b.summary.as_str())
            .collect();

        if summaries.is_empty() {
            tracing::error!(batches = batches.len(), "All batch analyses failed");
            self.write_log(clip, &profile, &sampled, &batches, "").await;
            return AnalysisResult::failed(clip.clone(), "no batch produced an analysis");
        }

        let text = self.consolidate(&summaries, &profile).await;
        let (threat_level, keywords) =
            tokio::join!(self.classify_threat(&text), self.extract_keywords(&text));
        let confidence = classifier::confidence_score(profile.base_confidence, &text, &keywords);

        self.write_log(clip, &profile, &sampled, &batches, &text).await;

        tracing::info!(
            clip = %clip.path().display(),
            threat_level = %threat_level,
            confidence = confidence,
            batches = batches.len(),
            "Analysis completed"
        );

        AnalysisResult {
            clip: clip.clone(),
            text,
            threat_level,
            confidence,
            keywords,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl ClipAnalyzer for AnalysisPipeline {
    async fn analyze(&self, clip: &Clip) -> AnalysisResult {
        AnalysisPipeline::analyze(self, clip).await
    }
}
