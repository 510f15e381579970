//! FfmpegRecorder - clip recording via ffmpeg stream copy

use super::{parse_probe_output, run_tool, ToolStage, VideoRecordingService};
use crate::error::{Error, Result};
use crate::models::{Clip, Detection};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Grace period on top of the clip duration before ffmpeg is killed
const RECORD_TIMEOUT_GRACE: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Records clips straight from the RTSP source
pub struct FfmpegRecorder {
    rtsp_url: String,
    active: AtomicBool,
}

/// Clears the active flag on drop
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
        tracing::debug!("Recording slot released");
    }
}

impl FfmpegRecorder {
    pub fn new(rtsp_url: String) -> Self {
        Self {
            rtsp_url,
            active: AtomicBool::new(false),
        }
    }

    fn try_acquire(&self) -> Option<ActiveGuard<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ActiveGuard(&self.active))
    }

    fn record_args(&self, duration: Duration, output_path: &Path) -> Vec<String> {
        let secs = duration.as_secs().to_string();
        let output = output_path.to_string_lossy().into_owned();
        [
            "-rtsp_transport", "tcp",
            "-i", self.rtsp_url.as_str(),
            "-t", secs.as_str(),
            "-c:v", "copy",
            "-c:a", "aac",
            "-b:a", "128k",
            "-avoid_negative_ts", "make_zero",
            "-f", "mp4",
            "-loglevel", "error",
            "-y",
            output.as_str(),
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

pub(crate) fn probe_args(path: &Path) -> Vec<String> {
    let path = path.to_string_lossy().into_owned();
    [
        "-v", "error",
        "-select_streams", "v:0",
        "-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,duration:format=duration",
        "-of", "json",
        path.as_str(),
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[async_trait]
impl VideoRecordingService for FfmpegRecorder {
    async fn record_clip(
        &self,
        duration: Duration,
        output_path: &Path,
        trigger: &Detection,
    ) -> Result<Option<Clip>> {
        let Some(_guard) = self.try_acquire() else {
            tracing::warn!("Recording already in progress, request ignored");
            return Ok(None);
        };

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let start_time = Utc::now();
        tracing::info!(
            output = %output_path.display(),
            duration_sec = duration.as_secs(),
            "Recording clip"
        );

        run_tool(
            "ffmpeg",
            &self.record_args(duration, output_path),
            duration + RECORD_TIMEOUT_GRACE,
            ToolStage::Recording,
        )
        .await?;

        let size = tokio::fs::metadata(output_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(Error::Recording(format!(
                "clip file missing or empty: {}",
                output_path.display()
            )));
        }

        // Recording succeeded; probe failures only lose metadata
        let info = match run_tool("ffprobe", &probe_args(output_path), PROBE_TIMEOUT, ToolStage::Recording)
            .await
            .and_then(|out| parse_probe_output(&out))
        {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "Clip probe failed");
                None
            }
        };

        let clip = Clip {
            file_path: output_path.to_path_buf(),
            start_time,
            duration,
            frame_count: info.map(|i| i.total_frames).unwrap_or(0),
            resolution: info.map(|i| (i.width, i.height)).unwrap_or((0, 0)),
            trigger: trigger.clone(),
        };

        tracing::info!(
            clip = %clip.file_name(),
            size_bytes = size,
            frames = clip.frame_count,
            "Clip recorded"
        );
        Ok(Some(clip))
    }

    fn is_recording_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_record_args() {
        let recorder = FfmpegRecorder::new("rtsp://cam/stream".into());
        let args = recorder.record_args(Duration::from_secs(60), &PathBuf::from("/tmp/a.mp4"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-rtsp_transport tcp -i rtsp://cam/stream -t 60"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-avoid_negative_ts make_zero"));
        assert_eq!(args.last().unwrap(), "/tmp/a.mp4");
    }

    #[test]
    fn test_single_recording_slot() {
        let recorder = FfmpegRecorder::new("rtsp://cam/stream".into());
        let guard = recorder.try_acquire();
        assert!(guard.is_some());
        assert!(recorder.is_recording_active());
        assert!(recorder.try_acquire().is_none());

        drop(guard);
        assert!(!recorder.is_recording_active());
        assert!(recorder.try_acquire().is_some());
    }
}
