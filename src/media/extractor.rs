//! FfmpegFrameExtractor - seek + scale + single MJPEG frame

use super::recorder::probe_args;
use super::{parse_probe_output, run_tool, ClipFrameSource, ClipInfo, ToolStage};
use crate::error::Result;
use crate::models::{Clip, Frame};
use async_trait::async_trait;
use std::time::Duration;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(15);

/// Pulls frames from recorded clips with ffmpeg
#[derive(Debug, Default)]
pub struct FfmpegFrameExtractor;

impl FfmpegFrameExtractor {
    pub fn new() -> Self {
        Self
    }
}

/// Seek position of a frame index, in seconds
pub(crate) fn seek_seconds(index: u64, fps: f64) -> f64 {
    if fps <= 0.0 {
        return 0.0;
    }
    index as f64 / fps
}

fn extract_args(clip: &Clip, seek: f64, resolution: u32) -> Vec<String> {
    vec![
        "-ss".to_string(),
        format!("{:.3}", seek),
        "-i".to_string(),
        clip.file_path.to_string_lossy().into_owned(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-vf".to_string(),
        format!("scale={}:{}", resolution, resolution),
        "-f".to_string(),
        "image2pipe".to_string(),
        "-vcodec".to_string(),
        "mjpeg".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-".to_string(),
    ]
}

#[async_trait]
impl ClipFrameSource for FfmpegFrameExtractor {
    async fn probe(&self, clip: &Clip) -> Result<ClipInfo> {
        let out = run_tool("ffprobe", &probe_args(&clip.file_path), EXTRACT_TIMEOUT, ToolStage::Extraction).await?;
        parse_probe_output(&out)
    }

    async fn read_frame(
        &self,
        clip: &Clip,
        info: &ClipInfo,
        index: u64,
        resolution: u32,
    ) -> Result<Option<Frame>> {
        let seek = seek_seconds(index, info.fps);
        let jpeg = run_tool(
            "ffmpeg",
            &extract_args(clip, seek, resolution),
            EXTRACT_TIMEOUT,
            ToolStage::Extraction,
        )
        .await?;

        if jpeg.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::new(index, resolution, resolution, jpeg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, Detection};
    use chrono::Utc;
    use std::path::PathBuf;

    #[test]
    fn test_seek_seconds() {
        assert_eq!(seek_seconds(60, 30.0), 2.0);
        assert_eq!(seek_seconds(10, 0.0), 0.0);
    }

    #[test]
    fn test_extract_args_scale() {
        let clip = Clip {
            file_path: PathBuf::from("clip.mp4"),
            start_time: Utc::now(),
            duration: Duration::from_secs(10),
            frame_count: 300,
            resolution: (1920, 1080),
            trigger: Detection::new(Utc::now(), BoundingBox::new(0, 0, 40, 90, 0.9), 0, 0.9).unwrap(),
        };
        let args = extract_args(&clip, 2.0, 512);
        assert_eq!(args[1], "2.000");
        assert!(args.contains(&"scale=512:512".to_string()));
        assert_eq!(args.last().unwrap(), "-");
    }
}
