//! Media - ffmpeg-backed recording and clip frame extraction
//!
//! ## Responsibilities
//!
//! - Record clips from the live stream (`VideoRecordingService`)
//! - Probe clips and pull individual frames (`ClipFrameSource`)
//! - Process supervision: every child runs with `kill_on_drop` under a timeout

mod extractor;
mod probe;
mod recorder;

pub use extractor::FfmpegFrameExtractor;
pub use probe::{parse_probe_output, ClipInfo};
pub use recorder::FfmpegRecorder;

use crate::error::{Error, Result};
use crate::models::{Clip, Detection, Frame};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Records clips from the monitored source
#[async_trait]
pub trait VideoRecordingService: Send + Sync {
    /// Record `duration` of footage to `output_path`.
    ///
    /// `Ok(None)` means nothing was produced (e.g. a recording is already running).
    async fn record_clip(
        &self,
        duration: Duration,
        output_path: &Path,
        trigger: &Detection,
    ) -> Result<Option<Clip>>;

    fn is_recording_active(&self) -> bool;
}

/// Reads frames back out of a recorded clip
#[async_trait]
pub trait ClipFrameSource: Send + Sync {
    async fn probe(&self, clip: &Clip) -> Result<ClipInfo>;

    /// Frame at `index`, scaled to `resolution`x`resolution`
    async fn read_frame(
        &self,
        clip: &Clip,
        info: &ClipInfo,
        index: u64,
        resolution: u32,
    ) -> Result<Option<Frame>>;
}

/// `<dir>/security_clip_YYYYmmdd_HHMMSS_mmm.mp4`
pub fn clip_output_path(dir: &Path, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("security_clip_{}.mp4", at.format("%Y%m%d_%H%M%S_%3f")))
}

/// Which pipeline stage a tool failure belongs to
#[derive(Debug, Clone, Copy)]
pub(crate) enum ToolStage {
    Recording,
    Extraction,
}

impl ToolStage {
    fn error(self, msg: String) -> Error {
        match self {
            ToolStage::Recording => Error::Recording(msg),
            ToolStage::Extraction => Error::Internal(msg),
        }
    }
}

/// Run ffmpeg/ffprobe to completion and return stdout.
///
/// The child is killed if the timeout fires.
pub(crate) async fn run_tool(
    program: &str,
    args: &[String],
    timeout: Duration,
    stage: ToolStage,
) -> Result<Vec<u8>> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| stage.error(format!("{} spawn failed: {}", program, e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(stage.error(format!("{} failed: {}", program, stderr.trim())));
            }
            Ok(output.stdout)
        }
        Ok(Err(e)) => Err(stage.error(format!("{} execution failed: {}", program, e))),
        Err(_) => {
            tracing::warn!(
                program = program,
                timeout_sec = timeout.as_secs(),
                "Process timeout, killed via kill_on_drop"
            );
            Err(stage.error(format!("{} timeout ({}s)", program, timeout.as_secs())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clip_output_path_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
            + chrono::Duration::milliseconds(589);
        let path = clip_output_path(Path::new("./recordings"), at);
        assert_eq!(
            path,
            PathBuf::from("./recordings/security_clip_20250314_092653_589.mp4")
        );
    }

    #[tokio::test]
    async fn test_run_tool_missing_binary() {
        let err = run_tool(
            "definitely-not-a-real-binary",
            &[],
            Duration::from_secs(1),
            ToolStage::Recording,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Recording(_)));
    }
}
