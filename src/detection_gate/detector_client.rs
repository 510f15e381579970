//! RemoteDetector - person detection via an inference server
//!
//! Posts the JPEG frame as multipart and keeps boxes labelled `person`.
//! Box coordinates may be normalized (0..1) or in pixels.

use super::{DetectionCriteria, PersonDetectionService};
use crate::error::{Error, Result};
use crate::models::{BoundingBox, Detection, Frame};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Bounding box as returned by the server
#[derive(Debug, Clone, Deserialize)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub label: String,
    pub conf: f32,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    bboxes: Vec<RawBox>,
}

/// Remote person detector
pub struct RemoteDetector {
    client: reqwest::Client,
    base_url: String,
    criteria: DetectionCriteria,
}

impl RemoteDetector {
    pub fn new(base_url: String, criteria: DetectionCriteria) -> Self {
        Self::with_timeout(base_url, criteria, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: String, criteria: DetectionCriteria, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            criteria,
        }
    }
}

/// Convert server boxes to person detections in pixel space
pub(crate) fn to_detections(boxes: &[RawBox], frame: &Frame) -> Vec<Detection> {
    let normalized = boxes
        .iter()
        .all(|b| b.x1 <= 1.0 && b.y1 <= 1.0 && b.x2 <= 1.0 && b.y2 <= 1.0);
    let (sx, sy) = if normalized {
        (frame.width as f32, frame.height as f32)
    } else {
        (1.0, 1.0)
    };

    boxes
        .iter()
        .filter(|b| b.label.eq_ignore_ascii_case("person"))
        .filter_map(|b| {
            let x = (b.x1 * sx).round() as i32;
            let y = (b.y1 * sy).round() as i32;
            let width = ((b.x2 - b.x1) * sx).round() as i32;
            let height = ((b.y2 - b.y1) * sy).round() as i32;
            let bbox = BoundingBox::new(x, y, width, height, b.conf);
            match Detection::new(frame.captured_at, bbox, frame.index, b.conf) {
                Ok(d) => Some(d),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed detection");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl PersonDetectionService for RemoteDetector {
    async fn detect_persons(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let url = format!("{}/v1/analyze", self.base_url);
        let form = Form::new()
            .part(
                "infer_image",
                Part::bytes(frame.jpeg.clone())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("captured_at", frame.captured_at.to_rfc3339())
            .text("return_bboxes", "true");

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Detection(format!("detector returned {}", resp.status())));
        }

        let parsed: DetectResponse = resp.json().await?;
        Ok(to_detections(&parsed.bboxes, frame))
    }

    fn is_detection_valid(&self, detection: &Detection) -> bool {
        self.criteria.is_valid(detection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use chrono::Utc;

    fn raw(label: &str, coords: [f32; 4], conf: f32) -> RawBox {
        RawBox {
            x1: coords[0],
            y1: coords[1],
            x2: coords[2],
            y2: coords[3],
            label: label.to_string(),
            conf,
        }
    }

    #[test]
    fn test_normalized_boxes_scaled_to_frame() {
        let frame = Frame::new(7, 1000, 500, vec![]);
        let boxes = vec![
            raw("person", [0.1, 0.2, 0.15, 0.5], 0.9),
            raw("car", [0.5, 0.5, 0.9, 0.9], 0.95),
        ];
        let dets = to_detections(&boxes, &frame);
        assert_eq!(dets.len(), 1);
        assert_eq!(*dets[0].bbox(), BoundingBox::new(100, 100, 50, 150, 0.9));
        assert_eq!(dets[0].frame_index(), 7);
    }

    #[test]
    fn test_pixel_boxes_and_bad_confidence() {
        let frame = Frame::new(1, 640, 480, vec![]);
        let boxes = vec![
            raw("Person", [10.0, 10.0, 50.0, 110.0], 0.7),
            raw("person", [10.0, 10.0, 50.0, 110.0], 1.7),
        ];
        let dets = to_detections(&boxes, &frame);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox().height, 100);
    }

    #[test]
    fn test_validity_uses_threshold() {
        let detector = RemoteDetector::new("http://localhost:9000".into(), DetectionCriteria::with_threshold(0.6));
        let bbox = BoundingBox::new(0, 0, 50, 120, 0.55);
        let det = Detection::new(Utc::now(), bbox, 0, 0.55).unwrap();
        assert!(!detector.is_detection_valid(&det));
    }
}
