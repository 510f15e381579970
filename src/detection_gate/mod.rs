//! DetectionGate - Person detection admission
//!
//! ## Responsibilities
//!
//! - Per-detection validity (confidence, minimum box size, upright aspect ratio)
//! - Cooldown between admitted detections so a lingering person does not
//!   re-trigger capture
//! - Person detector contract and remote detector client

mod detector_client;

pub use detector_client::RemoteDetector;

use crate::error::Result;
use crate::models::{Detection, Frame};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Default cooldown between admissions
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Person detector
#[async_trait]
pub trait PersonDetectionService: Send + Sync {
    async fn detect_persons(&self, frame: &Frame) -> Result<Vec<Detection>>;

    fn is_detection_valid(&self, detection: &Detection) -> bool;
}

/// Validity thresholds for a single detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCriteria {
    pub confidence_threshold: f32,
    pub min_width: i32,
    pub min_height: i32,
    /// Minimum height / width; people are taller than wide
    pub min_aspect_ratio: f32,
}

impl Default for DetectionCriteria {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            min_width: 30,
            min_height: 60,
            min_aspect_ratio: 1.2,
        }
    }
}

impl DetectionCriteria {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            confidence_threshold: threshold,
            ..Self::default()
        }
    }

    pub fn is_valid(&self, detection: &Detection) -> bool {
        let bbox = detection.bbox();
        detection.confidence() >= self.confidence_threshold
            && bbox.width >= self.min_width
            && bbox.height >= self.min_height
            && bbox.aspect_ratio() >= self.min_aspect_ratio
    }
}

/// DetectionGate instance
#[derive(Debug)]
pub struct DetectionGate {
    criteria: DetectionCriteria,
    cooldown: Duration,
    last_admitted: Option<Instant>,
}

impl DetectionGate {
    pub fn new(criteria: DetectionCriteria) -> Self {
        Self::with_cooldown(criteria, DEFAULT_COOLDOWN)
    }

    pub fn with_cooldown(criteria: DetectionCriteria, cooldown: Duration) -> Self {
        Self {
            criteria,
            cooldown,
            last_admitted: None,
        }
    }

    /// Admit valid detections unless still inside the cooldown window
    pub fn admit(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        self.admit_at(detections, Instant::now())
    }

    pub fn admit_at(&mut self, detections: Vec<Detection>, now: Instant) -> Vec<Detection> {
        let valid: Vec<Detection> = detections
            .into_iter()
            .filter(|d| self.criteria.is_valid(d))
            .collect();

        if valid.is_empty() {
            return valid;
        }

        if let Some(last) = self.last_admitted {
            if now.saturating_duration_since(last) < self.cooldown {
                tracing::trace!(count = valid.len(), "Detections suppressed by cooldown");
                return Vec::new();
            }
        }

        self.last_admitted = Some(now);
        tracing::info!(
            count = valid.len(),
            best_confidence = valid.iter().map(|d| d.confidence()).fold(0.0f32, f32::max),
            "Person detection admitted"
        );
        valid
    }

    pub fn criteria(&self) -> &DetectionCriteria {
        &self.criteria
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use chrono::Utc;

    fn detection(confidence: f32, width: i32, height: i32) -> Detection {
        Detection::new(
            Utc::now(),
            BoundingBox::new(0, 0, width, height, confidence),
            0,
            confidence,
        )
        .unwrap()
    }

    #[test]
    fn test_low_confidence_is_invalid() {
        let criteria = DetectionCriteria::default();
        for c in [0.0, 0.1, 0.3, 0.49] {
            assert!(!criteria.is_valid(&detection(c, 50, 120)));
        }
        assert!(criteria.is_valid(&detection(0.5, 50, 120)));
    }

    #[test]
    fn test_size_and_aspect_ratio() {
        let criteria = DetectionCriteria::default();
        assert!(!criteria.is_valid(&detection(0.9, 20, 120)));
        assert!(!criteria.is_valid(&detection(0.9, 50, 50)));
        // wider than tall
        assert!(!criteria.is_valid(&detection(0.9, 100, 80)));
        assert!(criteria.is_valid(&detection(0.9, 50, 60)));
    }

    #[test]
    fn test_cooldown_blocks_readmission() {
        let mut gate = DetectionGate::new(DetectionCriteria::default());
        let t0 = Instant::now();

        assert_eq!(gate.admit_at(vec![detection(0.9, 50, 120)], t0).len(), 1);
        assert!(gate.admit_at(vec![detection(0.9, 50, 120)], t0 + Duration::from_secs(1)).is_empty());
        assert!(gate.admit_at(vec![detection(0.9, 50, 120)], t0 + Duration::from_millis(4999)).is_empty());
        assert_eq!(gate.admit_at(vec![detection(0.9, 50, 120)], t0 + Duration::from_secs(5)).len(), 1);
    }

    #[test]
    fn test_invalid_detections_do_not_start_cooldown() {
        let mut gate = DetectionGate::new(DetectionCriteria::default());
        let t0 = Instant::now();

        assert!(gate.admit_at(vec![detection(0.2, 50, 120)], t0).is_empty());
        assert_eq!(
            gate.admit_at(vec![detection(0.8, 50, 120)], t0 + Duration::from_millis(10)).len(),
            1
        );
    }

    #[test]
    fn test_no_two_admissions_within_cooldown() {
        let mut gate = DetectionGate::new(DetectionCriteria::default());
        let t0 = Instant::now();
        let mut admitted = Vec::new();

        for step in 0..200u64 {
            let now = t0 + Duration::from_millis(step * 137);
            if !gate.admit_at(vec![detection(0.9, 50, 120)], now).is_empty() {
                admitted.push(now);
            }
        }

        assert!(admitted.len() > 1);
        for pair in admitted.windows(2) {
            assert!(pair[1] - pair[0] >= DEFAULT_COOLDOWN);
        }
    }
}
