//! ffprobe output parsing

use crate::error::{Error, Result};
use serde::Deserialize;

/// Stream properties of a recorded clip
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    nb_read_packets: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// "30000/1001" or "25"
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num.trim().parse::<f64>().ok()? / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_count(value: &Option<String>) -> Option<u64> {
    value.as_deref().and_then(|v| v.trim().parse().ok()).filter(|n| *n > 0)
}

/// Parse `ffprobe -of json` output for the first video stream.
///
/// A missing or zero frame rate is reported as 0 so callers can apply
/// their own default.
pub fn parse_probe_output(json: &[u8]) -> Result<ClipInfo> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;
    let stream = probe
        .streams
        .first()
        .ok_or_else(|| Error::NotFound("no video stream in clip".to_string()))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(0.0);

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.trim().parse::<f64>().ok());

    let total_frames = parse_count(&stream.nb_frames)
        .or_else(|| parse_count(&stream.nb_read_packets))
        .or_else(|| duration.map(|d| (d * fps).round() as u64))
        .unwrap_or(0);

    Ok(ClipInfo {
        fps,
        total_frames,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}
