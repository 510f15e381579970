//! Per-analysis JSON record for later review of model output

use crate::error::Result;
use crate::models::BatchResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct AnalysisSessionRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub video_path: String,
    pub model_used: &'a str,
    pub processing_method: &'static str,
    pub batch_size: usize,
    pub frames_analyzed: usize,
    pub frame_indices: &'a [u64],
    pub batch_analyses: &'a [BatchResult],
    pub consolidated_analysis: &'a str,
    pub analysis_prompt: &'a str,
}

/// Write `analysis_session_<timestamp>.json` into `dir`
pub async fn write_session_log(dir: &Path, record: &AnalysisSessionRecord<'_>) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "analysis_session_{}.json",
        record.timestamp.format("%Y%m%d_%H%M%S_%3f")
    ));
    let body = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(&path, body).await?;
    tracing::info!(path = %path.display(), "Analysis session logged");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_session_log() {
        let dir = tempfile::tempdir().unwrap();
        let batches = vec![BatchResult::new(1, 0, 4, "Routine surveillance".into(), true)];
        let record = AnalysisSessionRecord {
            timestamp: Utc::now(),
            video_path: "clip.mp4".into(),
            model_used: "gemma3:4b",
            processing_method: "batch_analysis",
            batch_size: 4,
            frames_analyzed: 4,
            frame_indices: &[0, 60, 120, 180],
            batch_analyses: &batches,
            consolidated_analysis: "No security incidents detected.",
            analysis_prompt: "prompt",
        };

        let path = write_session_log(&dir.path().join("logs"), &record).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(json["model_used"], "gemma3:4b");
        assert_eq!(json["batch_analyses"][0]["frame_range"][1], 4);
        assert_eq!(json["frame_indices"].as_array().unwrap().len(), 4);
    }
}
