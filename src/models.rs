//! Shared models and types
//!
//! This module contains types shared across the pipeline stages
//! to avoid circular dependencies.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Seconds of footage represented by one sampled frame
pub const SECONDS_PER_SAMPLE: u64 = 2;

/// A decoded frame from the live stream or a recorded clip
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// JPEG-encoded image data
    pub jpeg: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(index: u64, width: u32, height: u32, jpeg: Vec<u8>) -> Self {
        Self {
            index,
            width,
            height,
            jpeg,
            captured_at: Utc::now(),
        }
    }
}

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Height over width; zero for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        if self.width <= 0 {
            return 0.0;
        }
        self.height as f32 / self.width as f32
    }
}

/// A person detection. Fields are private so a constructed value always
/// carries a confidence in [0,1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    timestamp: DateTime<Utc>,
    bbox: BoundingBox,
    frame_index: u64,
    confidence: f32,
}

impl Detection {
    pub fn new(
        timestamp: DateTime<Utc>,
        bbox: BoundingBox,
        frame_index: u64,
        confidence: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::Validation(format!(
                "Detection confidence must be within [0,1], got {}",
                confidence
            )));
        }
        Ok(Self {
            timestamp,
            bbox,
            frame_index,
            confidence,
        })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// A recorded video clip
#[derive(Debug, Clone, Serialize)]
pub struct Clip {
    pub file_path: PathBuf,
    pub start_time: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub frame_count: u64,
    pub resolution: (u32, u32),
    pub trigger: Detection,
}

impl Clip {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time
            + chrono::Duration::from_std(self.duration).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// File stem used as a stable identifier in alerts
    pub fn clip_id(&self) -> String {
        self.file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn file_name(&self) -> String {
        self.file_path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

/// Threat level assigned to an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl ThreatLevel {
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(ThreatLevel::Low),
            "MEDIUM" => Ok(ThreatLevel::Medium),
            "HIGH" => Ok(ThreatLevel::High),
            "CRITICAL" => Ok(ThreatLevel::Critical),
            other => Err(Error::Config(format!("Unknown threat level: {}", other))),
        }
    }
}

/// Per-batch analysis output
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// 1-based batch ordinal
    pub batch_number: usize,
    /// 1-based inclusive frame range
    pub frame_range: (usize, usize),
    /// Covered footage in seconds
    pub time_range: (u64, u64),
    pub summary: String,
    /// False when the summary is a placeholder
    pub succeeded: bool,
}

impl BatchResult {
    /// Build from the 0-based index of the first frame and the batch length
    pub fn new(batch_number: usize, start_index: usize, len: usize, summary: String, succeeded: bool) -> Self {
        let last = start_index + len.saturating_sub(1);
        Self {
            batch_number,
            frame_range: (start_index + 1, last + 1),
            time_range: (
                start_index as u64 * SECONDS_PER_SAMPLE,
                last as u64 * SECONDS_PER_SAMPLE,
            ),
            summary,
            succeeded,
        }
    }
}

/// Final assessment of one clip
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub clip: Clip,
    pub text: String,
    pub threat_level: ThreatLevel,
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    pub const FAILED_KEYWORD: &'static str = "analysis_failed";

    /// Degraded result used when no usable analysis was produced
    pub fn failed(clip: Clip, reason: &str) -> Self {
        Self {
            clip,
            text: format!("Analysis failed: {}", reason),
            threat_level: ThreatLevel::Low,
            confidence: 0.0,
            keywords: vec![Self::FAILED_KEYWORD.to_string()],
            timestamp: Utc::now(),
        }
    }

    pub fn is_threat_detected(&self) -> bool {
        self.threat_level > ThreatLevel::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

/// Aggregate of everything observed during one monitoring run
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub detections: Vec<Detection>,
    pub clips: Vec<Clip>,
    pub analyses: Vec<AnalysisResult>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: format!(
                "session_{}_{}",
                started_at.format("%Y%m%d_%H%M%S"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            started_at,
            ended_at: None,
            detections: Vec::new(),
            clips: Vec::new(),
            analyses: Vec::new(),
            status: SessionStatus::InProgress,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.ended_at = Some(at);
        self.status = SessionStatus::Completed;
    }

    pub fn threat_count(&self) -> usize {
        self.analyses.iter().filter(|a| a.is_threat_detected()).count()
    }

    /// Elapsed time until `ended_at`, or until `now` while open
    pub fn duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// Pipeline phase reported on the status surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    Monitoring,
    Recording,
    Queued,
    Analyzing,
}

/// Read-only status snapshot exposed to the status server
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub stream_connected: bool,
    pub capture_in_progress: bool,
    pub analysis_in_progress: bool,
    pub analysis_paused: bool,
    pub phase: CapturePhase,
    pub session_id: Option<String>,
    pub session_duration_sec: i64,
    pub detection_count: usize,
    pub clip_count: usize,
    pub analysis_count: usize,
    pub threat_count: usize,
    pub pending_clips: usize,
    pub latest_analysis: Option<String>,
    pub latest_threat_level: Option<ThreatLevel>,
}

/// API response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// API error
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub stream_connected: bool,
    pub backend_mode: String,
    pub backend_model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_detection(confidence: f32) -> Detection {
        Detection::new(
            Utc::now(),
            BoundingBox::new(10, 10, 50, 120, confidence),
            1,
            confidence,
        )
        .unwrap()
    }

    fn sample_clip() -> Clip {
        Clip {
            file_path: PathBuf::from("./recordings/security_clip_20250101_120000_000.mp4"),
            start_time: Utc::now(),
            duration: Duration::from_secs(60),
            frame_count: 1800,
            resolution: (1920, 1080),
            trigger: sample_detection(0.9),
        }
    }

    #[test]
    fn test_detection_rejects_out_of_range_confidence() {
        let bbox = BoundingBox::new(0, 0, 40, 80, 1.5);
        assert!(Detection::new(Utc::now(), bbox, 0, 1.5).is_err());
        assert!(Detection::new(Utc::now(), bbox, 0, -0.1).is_err());
        assert!(Detection::new(Utc::now(), bbox, 0, 1.0).is_ok());
        assert!(Detection::new(Utc::now(), bbox, 0, 0.0).is_ok());
    }

    #[test]
    fn test_bbox_geometry() {
        let bbox = BoundingBox::new(10, 20, 40, 100, 0.8);
        assert_eq!(bbox.center(), (30, 70));
        assert_eq!(bbox.area(), 4000);
        assert!((bbox.aspect_ratio() - 2.5).abs() < f32::EPSILON);
        assert_eq!(BoundingBox::new(0, 0, 0, 10, 0.8).aspect_ratio(), 0.0);
    }

    #[test]
    fn test_threat_level_order_and_parse() {
        assert!(ThreatLevel::Critical > ThreatLevel::High);
        assert!(ThreatLevel::Medium > ThreatLevel::Low);
        assert_eq!(ThreatLevel::High.ordinal(), 3);
        assert_eq!("medium".parse::<ThreatLevel>().unwrap(), ThreatLevel::Medium);
        assert!("SEVERE".parse::<ThreatLevel>().is_err());
        assert_eq!(serde_json::to_string(&ThreatLevel::Critical).unwrap(), "\"CRITICAL\"");
    }

    #[test]
    fn test_is_threat_detected() {
        let mut result = AnalysisResult::failed(sample_clip(), "x");
        assert!(!result.is_threat_detected());
        for level in [ThreatLevel::Medium, ThreatLevel::High, ThreatLevel::Critical] {
            result.threat_level = level;
            assert!(result.is_threat_detected());
        }
    }

    #[test]
    fn test_failed_result_shape() {
        let result = AnalysisResult::failed(sample_clip(), "No frames extracted");
        assert_eq!(result.threat_level, ThreatLevel::Low);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.keywords, vec!["analysis_failed".to_string()]);
        assert_eq!(result.text, "Analysis failed: No frames extracted");
    }

    #[test]
    fn test_clip_helpers() {
        let clip = sample_clip();
        assert_eq!(clip.clip_id(), "security_clip_20250101_120000_000");
        assert_eq!(clip.end_time() - clip.start_time, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_batch_result_ranges() {
        let batch = BatchResult::new(2, 4, 4, "ok".to_string(), true);
        assert_eq!(batch.frame_range, (5, 8));
        assert_eq!(batch.time_range, (8, 14));
    }

    #[test]
    fn test_session_counts() {
        let start = Utc::now();
        let mut session = Session::new(start);
        assert!(session.id.starts_with("session_"));
        assert!(session.is_open());

        let mut threat = AnalysisResult::failed(sample_clip(), "x");
        threat.threat_level = ThreatLevel::High;
        session.analyses.push(threat);
        session.analyses.push(AnalysisResult::failed(sample_clip(), "y"));
        assert_eq!(session.threat_count(), 1);

        session.complete(start + chrono::Duration::seconds(30));
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.duration(Utc::now()), chrono::Duration::seconds(30));
    }
}
