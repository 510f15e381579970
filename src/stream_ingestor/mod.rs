//! StreamIngestor - Live stream connection and frame supply
//!
//! ## Responsibilities
//!
//! - Open the live source with bounded open/read timeouts
//! - Verify a connection by reading one frame
//! - Retry connect with exponential backoff
//! - Reconnect on hard failure (too many failed reads) or stall (no frame for too long)
//!
//! Failure counters reset on every successful read and on disconnect.

mod ffmpeg_source;

pub use ffmpeg_source::{jpeg_dimensions, FfmpegStreamSource, JpegSplitter};

use crate::error::{Error, Result};
use crate::models::Frame;
use crate::retry::{with_retry_until, RetryPolicy};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// A live frame source
#[async_trait]
pub trait StreamSource: Send {
    async fn open(&mut self) -> Result<()>;

    /// Next decoded frame; waits as long as the source needs
    async fn read_frame(&mut self) -> Result<Frame>;

    async fn close(&mut self);
}

/// Ingestor tuning
#[derive(Debug, Clone, Copy)]
pub struct IngestorConfig {
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    /// Consecutive failed reads that force a reconnect
    pub max_failed_reads: u32,
    /// Time without a frame that forces a reconnect
    pub stale_threshold: Duration,
    pub connect_policy: RetryPolicy,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            max_failed_reads: 30,
            stale_threshold: Duration::from_secs(10),
            connect_policy: RetryPolicy::stream_connect(),
        }
    }
}

struct IngestorInner {
    source: Box<dyn StreamSource>,
    failed_reads: u32,
    last_success: Instant,
}

impl IngestorInner {
    fn reset_counters(&mut self) {
        self.failed_reads = 0;
        self.last_success = Instant::now();
    }
}

/// StreamIngestor instance
pub struct StreamIngestor {
    inner: Mutex<IngestorInner>,
    connected: Arc<AtomicBool>,
    config: IngestorConfig,
}

impl StreamIngestor {
    pub fn new(source: Box<dyn StreamSource>) -> Self {
        Self::with_config(source, IngestorConfig::default())
    }

    pub fn with_config(source: Box<dyn StreamSource>, config: IngestorConfig) -> Self {
        Self {
            inner: Mutex::new(IngestorInner {
                source,
                failed_reads: 0,
                last_success: Instant::now(),
            }),
            connected: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Connect with retry. Returns false once all attempts failed.
    pub async fn connect(&self) -> bool {
        self.connect_until(&CancellationToken::new()).await
    }

    /// Connect with retry, abandoning backoff and attempts once `cancel` fires
    pub async fn connect_until(&self, cancel: &CancellationToken) -> bool {
        let connected = with_retry_until(
            &self.config.connect_policy,
            "stream_connect",
            cancel,
            |_| self.try_connect(),
            || false,
        )
        .await;

        if cancel.is_cancelled() {
            tracing::info!("Stream connect cancelled");
        } else if !connected {
            tracing::error!("Stream connect failed after all attempts");
        }
        connected
    }

    async fn try_connect(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.source.close().await;

        match timeout(self.config.open_timeout, inner.source.open()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                inner.source.close().await;
                return Err(Error::Stream(format!(
                    "open timed out after {}s",
                    self.config.open_timeout.as_secs()
                )));
            }
        }

        match timeout(self.config.read_timeout, inner.source.read_frame()).await {
            Ok(Ok(frame)) => {
                inner.reset_counters();
                self.connected.store(true, Ordering::SeqCst);
                tracing::info!(width = frame.width, height = frame.height, "Stream connected");
                Ok(true)
            }
            Ok(Err(e)) => {
                inner.source.close().await;
                Err(Error::Stream(format!("verification read failed: {}", e)))
            }
            Err(_) => {
                inner.source.close().await;
                Err(Error::Stream("verification read timed out".to_string()))
            }
        }
    }

    /// Next frame, or None. A failure that trips the reconnect predicate
    /// reconnects and retries one read.
    pub async fn get_frame(&self) -> Option<Frame> {
        self.get_frame_until(&CancellationToken::new()).await
    }

    /// `get_frame` whose reconnect gives up once `cancel` fires
    pub async fn get_frame_until(&self, cancel: &CancellationToken) -> Option<Frame> {
        if !self.is_connected() {
            return None;
        }

        if let Some(frame) = self.read_once().await {
            return Some(frame);
        }

        if !self.should_reconnect().await {
            return None;
        }

        tracing::warn!("Stream stalled, reconnecting");
        self.disconnect().await;
        if self.connect_until(cancel).await {
            return self.read_once().await;
        }
        None
    }

    async fn read_once(&self) -> Option<Frame> {
        let mut inner = self.inner.lock().await;
        match timeout(self.config.read_timeout, inner.source.read_frame()).await {
            Ok(Ok(frame)) => {
                inner.reset_counters();
                Some(frame)
            }
            Ok(Err(e)) => {
                inner.failed_reads += 1;
                tracing::debug!(error = %e, failed_reads = inner.failed_reads, "Frame read failed");
                None
            }
            Err(_) => {
                inner.failed_reads += 1;
                tracing::debug!(failed_reads = inner.failed_reads, "Frame read timed out");
                None
            }
        }
    }

    async fn should_reconnect(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.failed_reads >= self.config.max_failed_reads
            || inner.last_success.elapsed() > self.config.stale_threshold
    }

    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.source.close().await;
        inner.reset_counters();
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!("Stream disconnected");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shared flag for status reporting
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        self.connected.clone()
    }

    pub async fn failed_reads(&self) -> u32 {
        self.inner.lock().await.failed_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    /// Scripted source: each read pops the next outcome; empty script fails
    struct ScriptedSource {
        opens: Arc<AtomicU32>,
        open_ok: bool,
        reads: Arc<std::sync::Mutex<VecDeque<bool>>>,
        index: u64,
    }

    impl ScriptedSource {
        fn new(open_ok: bool, reads: Vec<bool>) -> (Self, Arc<AtomicU32>, Arc<std::sync::Mutex<VecDeque<bool>>>) {
            let opens = Arc::new(AtomicU32::new(0));
            let script = Arc::new(std::sync::Mutex::new(reads.into_iter().collect()));
            (
                Self {
                    opens: opens.clone(),
                    open_ok,
                    reads: script.clone(),
                    index: 0,
                },
                opens,
                script,
            )
        }
    }

    #[async_trait]
    impl StreamSource for ScriptedSource {
        async fn open(&mut self) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.open_ok {
                Ok(())
            } else {
                Err(Error::Stream("refused".into()))
            }
        }

        async fn read_frame(&mut self) -> Result<Frame> {
            let ok = self.reads.lock().unwrap().pop_front().unwrap_or(false);
            if ok {
                self.index += 1;
                Ok(Frame::new(self.index, 640, 480, vec![0xFF, 0xD8, 0xFF, 0xD9]))
            } else {
                Err(Error::Stream("no frame".into()))
            }
        }

        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_verifies_with_one_frame() {
        let (source, opens, _) = ScriptedSource::new(true, vec![true, true]);
        let ingestor = StreamIngestor::with_config(Box::new(source), IngestorConfig::default());

        assert!(ingestor.connect().await);
        assert!(ingestor.is_connected());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(ingestor.get_frame().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_three_attempts() {
        let (source, opens, _) = ScriptedSource::new(false, vec![]);
        let ingestor = StreamIngestor::with_config(Box::new(source), IngestorConfig::default());

        assert!(!ingestor.connect().await);
        assert!(!ingestor.is_connected());
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert!(ingestor.get_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_reset_on_success() {
        let (source, _, script) = ScriptedSource::new(true, vec![true]);
        let ingestor = StreamIngestor::with_config(Box::new(source), IngestorConfig::default());
        assert!(ingestor.connect().await);

        script.lock().unwrap().extend([false, false, true]);
        assert!(ingestor.get_frame().await.is_none());
        assert!(ingestor.get_frame().await.is_none());
        assert_eq!(ingestor.failed_reads().await, 2);

        assert!(ingestor.get_frame().await.is_some());
        assert_eq!(ingestor.failed_reads().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_max_failed_reads() {
        let (source, opens, script) = ScriptedSource::new(true, vec![true]);
        let config = IngestorConfig {
            max_failed_reads: 3,
            stale_threshold: Duration::from_secs(3600),
            ..IngestorConfig::default()
        };
        let ingestor = StreamIngestor::with_config(Box::new(source), config);
        assert!(ingestor.connect().await);

        // two plain failures, third trips the predicate; then verify + retry read succeed
        script.lock().unwrap().extend([false, false, false, true, true]);
        assert!(ingestor.get_frame().await.is_none());
        assert!(ingestor.get_frame().await.is_none());
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        assert!(ingestor.get_frame().await.is_some());
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(ingestor.failed_reads().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_when_stale() {
        let (source, opens, script) = ScriptedSource::new(true, vec![true]);
        let ingestor = StreamIngestor::with_config(Box::new(source), IngestorConfig::default());
        assert!(ingestor.connect().await);

        tokio::time::advance(Duration::from_secs(11)).await;
        script.lock().unwrap().extend([false, true, true]);
        assert!(ingestor.get_frame().await.is_some());
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resets_state() {
        let (source, _, script) = ScriptedSource::new(true, vec![true]);
        let ingestor = StreamIngestor::with_config(Box::new(source), IngestorConfig::default());
        assert!(ingestor.connect().await);
        let flag = ingestor.connected_flag();

        script.lock().unwrap().push_back(false);
        ingestor.get_frame().await;
        ingestor.disconnect().await;

        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(ingestor.failed_reads().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_stops_on_cancel() {
        let (source, opens, script) = ScriptedSource::new(true, vec![true]);
        let config = IngestorConfig {
            stale_threshold: Duration::from_millis(1),
            ..IngestorConfig::default()
        };
        let ingestor = StreamIngestor::with_config(Box::new(source), config);
        assert!(ingestor.connect().await);

        // every verification read fails from here on, so connect sits in backoff
        script.lock().unwrap().clear();
        tokio::time::advance(Duration::from_millis(5)).await;

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cancel.cancel();
            })
        };

        let started = Instant::now();
        assert!(ingestor.get_frame_until(&cancel).await.is_none());
        canceller.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(!ingestor.is_connected());
    }
}
