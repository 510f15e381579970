//! Alert payloads
//!
//! The broadcast payload travels in a single UDP datagram and is shrunk
//! until its compact JSON fits [`BROADCAST_CAP`]. Webhook and HTTP
//! receivers get the detailed payload with the full analysis.

use crate::error::Result;
use crate::models::AnalysisResult;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

/// Upper bound of a broadcast datagram in bytes
pub const BROADCAST_CAP: usize = 1400;

const SUMMARY_LIMIT: usize = 100;
const COMPACT_KEYWORDS: usize = 2;
const MAX_ID_CHARS: usize = 32;
const ROUTINE_SUMMARY: &str = "Routine activity - no security concerns";
const DEFAULT_CAMERA: &str = "Security Camera";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Lightweight payload for UDP broadcast
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "threatLevel")]
    pub threat_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_threat_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

impl BroadcastPayload {
    pub fn from_analysis(
        analysis: &AnalysisResult,
        clip_path: Option<&Path>,
        camera: &str,
        server: &ServerInfo,
    ) -> Self {
        let video_id = clip_path.and_then(|p| p.file_stem()).map(|s| s.to_string_lossy().into_owned());
        let video_filename = clip_path.and_then(|p| p.file_name()).map(|s| s.to_string_lossy().into_owned());

        Self {
            kind: "security_alert".to_string(),
            id: alert_id(video_id.as_deref()),
            timestamp: now_iso(),
            threat_level: analysis.threat_level.as_str().to_string(),
            confidence: Some(analysis.confidence),
            summary: extract_summary(&analysis.text),
            camera: Some(camera.to_string()),
            keywords: analysis.keywords.iter().take(3).cloned().collect(),
            api_endpoint: video_id
                .as_ref()
                .map(|id| format!("http://{}:{}/api/security/videos/{}", server.ip, server.port, id)),
            video_id,
            video_filename,
            is_threat_detected: Some(analysis.is_threat_detected()),
            server_info: Some(server.clone()),
        }
    }

    /// Connectivity probe sent by `--test-notification`
    pub fn test(server: &ServerInfo) -> Self {
        Self {
            kind: "test_notification".to_string(),
            id: format!("test_{}", Utc::now().format("%H%M%S")),
            timestamp: now_iso(),
            threat_level: "TEST".to_string(),
            confidence: None,
            summary: "Security monitoring system test notification".to_string(),
            camera: None,
            keywords: Vec::new(),
            video_id: None,
            video_filename: None,
            is_threat_detected: None,
            api_endpoint: None,
            server_info: Some(ServerInfo {
                status: Some("active".to_string()),
                ..server.clone()
            }),
        }
    }

    /// Same alert without the video fields, summary and keywords trimmed
    pub fn compact(&self) -> Self {
        Self {
            summary: truncate_chars(&self.summary, SUMMARY_LIMIT),
            keywords: self.keywords.iter().take(COMPACT_KEYWORDS).cloned().collect(),
            video_id: None,
            video_filename: None,
            is_threat_detected: None,
            api_endpoint: None,
            ..self.clone()
        }
    }

    /// Drop one more piece of optional content. False once only the
    /// mandatory fields are left.
    fn shrink(&mut self) -> bool {
        let summary_len = self.summary.chars().count();
        if summary_len > 0 {
            self.summary = truncate_chars(&self.summary, summary_len / 2);
        } else if !self.keywords.is_empty() {
            self.keywords.pop();
        } else if self.camera.is_some() {
            self.camera = None;
        } else if self.server_info.is_some() {
            self.server_info = None;
        } else if self.id.chars().count() > MAX_ID_CHARS {
            self.id = truncate_chars(&self.id, MAX_ID_CHARS);
        } else {
            return false;
        }
        true
    }

    /// Compact JSON bytes no larger than `cap` where possible
    pub fn encode(&self, cap: usize) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() <= cap {
            return Ok(bytes);
        }

        tracing::warn!(size = bytes.len(), cap = cap, "Broadcast payload too large, compacting");
        let mut compact = self.compact();
        loop {
            let bytes = serde_json::to_vec(&compact)?;
            if bytes.len() <= cap || !compact.shrink() {
                tracing::debug!(size = bytes.len(), "Compact payload size");
                return Ok(bytes);
            }
        }
    }
}

/// Full payload for webhook and HTTP receivers
pub fn detailed_payload(
    analysis: &AnalysisResult,
    clip_path: Option<&Path>,
    camera: &str,
    server: &ServerInfo,
) -> serde_json::Value {
    let video_id = clip_path.and_then(|p| p.file_stem()).map(|s| s.to_string_lossy().into_owned());
    let video_filename = clip_path.and_then(|p| p.file_name()).map(|s| s.to_string_lossy().into_owned());
    let base = format!("http://{}:{}", server.ip, server.port);
    let summary = extract_summary(&analysis.text);
    let analysis_ts = analysis.timestamp.to_rfc3339();

    let video_clip = clip_path.map(|path| {
        serde_json::json!({
            "id": video_id,
            "file_path": path.display().to_string(),
            "url": video_filename.as_ref().map(|f| format!("{}/recordings/{}", base, f)),
            "fileName": video_filename,
            "timestamp": analysis_ts,
            "duration": iso_duration(analysis.clip.duration.as_secs()),
            "thumbnailUrl": video_id.as_ref().map(|id| format!("{}/thumbnails/{}.jpg", base, id)),
        })
    });

    serde_json::json!({
        "type": "security_alert",
        "id": alert_id(video_id.as_deref()),
        "timestamp": now_iso(),
        "threatLevel": analysis.threat_level.as_str(),
        "confidence": analysis.confidence,
        "description": summary,
        "camera": camera,
        "alert": {
            "threat_level": analysis.threat_level.as_str().to_lowercase(),
            "confidence": analysis.confidence,
            "is_threat_detected": analysis.is_threat_detected(),
            "summary": summary,
            "full_analysis": analysis.text,
            "keywords": analysis.keywords,
            "timestamp": analysis_ts,
            "camera_location": camera,
        },
        "videoClip": video_clip,
        "system": {
            "server_ip": server.ip,
            "notification_port": server.port,
            "api_base_url": format!("{}/api", base),
            "recordings_url": format!("{}/recordings", base),
        },
    })
}

/// One-line summary for the notification body
pub fn extract_summary(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "Security event detected".to_string();
    }
    if text.contains("No security incidents detected") || text.contains("Routine surveillance") {
        return ROUTINE_SUMMARY.to_string();
    }

    let sentence = text
        .split('.')
        .map(str::trim)
        .find(|s| s.chars().count() > 20)
        .unwrap_or(text);

    let cleaned = strip_markdown(sentence);
    if cleaned.chars().count() > SUMMARY_LIMIT {
        format!("{}...", truncate_chars(&cleaned, SUMMARY_LIMIT))
    } else {
        cleaned
    }
}

/// Camera name inferred from the clip path
pub fn camera_label(clip_path: Option<&Path>) -> String {
    let Some(path) = clip_path else {
        return DEFAULT_CAMERA.to_string();
    };
    let lower = path.to_string_lossy().to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    let label = if has(&["front", "door"]) {
        "Front Door Camera"
    } else if has(&["back", "yard"]) {
        "Backyard Camera"
    } else if has(&["side", "gate"]) {
        "Side Gate Camera"
    } else if has(&["garage"]) {
        "Garage Camera"
    } else {
        DEFAULT_CAMERA
    };
    label.to_string()
}

fn strip_markdown(s: &str) -> String {
    s.replace("**", "").replace(['*', '#'], "")
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn alert_id(video_id: Option<&str>) -> String {
    match video_id {
        Some(id) => id.to_string(),
        None => format!("alert_{}", Utc::now().format("%Y%m%d_%H%M%S")),
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn iso_duration(secs: u64) -> String {
    format!("PT{}M{}S", secs / 60, secs % 60)
}
