//! Frame sampling plan

use crate::models::SECONDS_PER_SAMPLE;

/// Frame rate assumed when the clip does not report one
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    /// Footage considered, from the clip start
    pub max_duration_secs: u64,
    pub max_frames: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 60,
            max_frames: 30,
        }
    }
}

/// Frame indices to extract: one every two seconds of footage, inside the
/// duration window, capped at `max_frames`.
pub fn sample_indices(fps: f64, total_frames: u64, config: &SamplingConfig) -> Vec<u64> {
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { DEFAULT_FPS };
    let interval = ((fps * SECONDS_PER_SAMPLE as f64) as u64).max(1);
    let window = ((fps * config.max_duration_secs as f64) as u64).min(total_frames);

    (0..window)
        .step_by(interval as usize)
        .take(config.max_frames)
        .collect()
}
