//! FfmpegStreamSource - RTSP to MJPEG over a pipe

use super::StreamSource;
use crate::error::{Error, Result};
use crate::models::Frame;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

/// Drop buffered bytes past this size; a frame never gets this large
const MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Splits a concatenated MJPEG byte stream into JPEG images on SOI/EOI markers
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buffer: Vec<u8>,
}

fn find_marker(data: &[u8], from: usize, marker: u8) -> Option<usize> {
    if data.len() < 2 || from >= data.len() - 1 {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == marker)
        .map(|p| p + from)
}

impl JpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.buffer.len() + bytes.len() > MAX_BUFFER_BYTES {
            tracing::warn!(buffered = self.buffer.len(), "MJPEG buffer overflow, discarding");
            self.buffer.clear();
        }
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete JPEG, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find_marker(&self.buffer, 0, 0xD8) else {
            // keep a trailing 0xFF that may begin the next SOI
            let keep = usize::from(self.buffer.last() == Some(&0xFF));
            let drain_to = self.buffer.len() - keep;
            self.buffer.drain(..drain_to);
            return None;
        };
        let end = find_marker(&self.buffer, start + 2, 0xD9)?;
        let frame = self.buffer[start..end + 2].to_vec();
        self.buffer.drain(..end + 2);
        Some(frame)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Width and height from the first SOFn segment of a JPEG
pub fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 4 <= data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        match marker {
            0xFF => {
                i += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let seg_len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if i + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[i + 5], data[i + 6]]) as u32;
            let width = u16::from_be_bytes([data[i + 7], data[i + 8]]) as u32;
            return Some((width, height));
        }
        i += 2 + seg_len;
    }
    None
}

/// Live RTSP source decoded by an ffmpeg child process
pub struct FfmpegStreamSource {
    rtsp_url: String,
    /// Output frame rate requested from ffmpeg
    fps: u32,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    splitter: JpegSplitter,
    next_index: u64,
}

impl FfmpegStreamSource {
    pub fn new(rtsp_url: String, fps: u32) -> Self {
        Self {
            rtsp_url,
            fps: fps.max(1),
            child: None,
            stdout: None,
            splitter: JpegSplitter::new(),
            next_index: 0,
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-i".to_string(),
            self.rtsp_url.clone(),
            "-an".to_string(),
            "-vf".to_string(),
            format!("fps={}", self.fps),
            "-f".to_string(),
            "image2pipe".to_string(),
            "-vcodec".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            "5".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-".to_string(),
        ]
    }
}

#[async_trait]
impl StreamSource for FfmpegStreamSource {
    async fn open(&mut self) -> Result<()> {
        self.close().await;

        let mut child = Command::new("ffmpeg")
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Stream(format!("ffmpeg spawn failed: {}", e)))?;

        self.stdout = child.stdout.take();
        self.child = Some(child);
        tracing::debug!(fps = self.fps, "ffmpeg stream process started");
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::Stream("stream not open".to_string()))?;
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];

        loop {
            if let Some(jpeg) = self.splitter.next_frame() {
                let (width, height) = jpeg_dimensions(&jpeg).unwrap_or((0, 0));
                self.next_index += 1;
                return Ok(Frame::new(self.next_index, width, height, jpeg));
            }

            let n = stdout.read(&mut chunk).await?;
            if n == 0 {
                return Err(Error::Stream("ffmpeg stream ended".to_string()));
            }
            self.splitter.push(&chunk[..n]);
        }
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.splitter.clear();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "ffmpeg stream process already exited");
            }
        }
    }
}
