//! CaptureOrchestrator - Detect → record → analyze state machine
//!
//! ## Responsibilities
//!
//! - Ingestion loop: frames → person detection → gate → clip recording
//! - Analysis loop: FIFO clip queue → analysis pipeline → alerts
//! - Single capture / single analysis in flight
//! - Session aggregation and repository writes
//! - Status snapshot, pause/resume of analysis consumption
//!
//! ## Design
//!
//! Both loops share one `PipelineState` behind a mutex. Every flag change
//! and queue operation happens under that lock; the lock is never held
//! across a blocking call. Shutdown is signalled with a cancellation token.

mod session;
mod state;

pub use session::{SessionManager, SessionSummary};
pub use state::PipelineState;

use crate::alert_dispatcher::AlertDispatcher;
use crate::analysis_pipeline::ClipAnalyzer;
use crate::detection_gate::{DetectionCriteria, DetectionGate, PersonDetectionService, DEFAULT_COOLDOWN};
use crate::error::{Error, Result};
use crate::media::{clip_output_path, VideoRecordingService};
use crate::models::{AnalysisResult, Clip, Detection, Frame, StatusSnapshot};
use crate::repository::{AnalysisRepository, ClipRepository, DetectionRepository, MemoryStore, SessionRepository};
use crate::stream_ingestor::StreamIngestor;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub clip_duration: Duration,
    pub clip_dir: PathBuf,
    pub criteria: DetectionCriteria,
    pub cooldown: Duration,
    /// Analysis loop sleep when the queue is empty
    pub idle_poll: Duration,
    /// Ingestion loop sleep when no frame was available
    pub frame_wait: Duration,
    /// Delay between reconnect attempts after the stream dropped
    pub reconnect_delay: Duration,
    pub liveness_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            clip_duration: Duration::from_secs(60),
            clip_dir: PathBuf::from("./recordings"),
            criteria: DetectionCriteria::default(),
            cooldown: DEFAULT_COOLDOWN,
            idle_poll: Duration::from_secs(1),
            frame_wait: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(60),
        }
    }
}

/// Storage collaborators
#[derive(Clone)]
pub struct Repositories {
    pub detections: Arc<dyn DetectionRepository>,
    pub clips: Arc<dyn ClipRepository>,
    pub analyses: Arc<dyn AnalysisRepository>,
    pub sessions: Arc<dyn SessionRepository>,
}

impl Repositories {
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            detections: store.clone(),
            clips: store.clone(),
            analyses: store.clone(),
            sessions: store,
        }
    }
}

/// CaptureOrchestrator instance
pub struct CaptureOrchestrator {
    config: OrchestratorConfig,
    ingestor: Arc<StreamIngestor>,
    detector: Arc<dyn PersonDetectionService>,
    gate: Mutex<DetectionGate>,
    recorder: Arc<dyn VideoRecordingService>,
    analyzer: Arc<dyn ClipAnalyzer>,
    dispatcher: Arc<AlertDispatcher>,
    repos: Repositories,
    sessions: SessionManager,
    state: Mutex<PipelineState>,
    latest: RwLock<Option<AnalysisResult>>,
    clip_ready: Notify,
    running: AtomicBool,
    /// Replaced on every start so a stopped orchestrator can be restarted
    cancel: std::sync::Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CaptureOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        ingestor: Arc<StreamIngestor>,
        detector: Arc<dyn PersonDetectionService>,
        recorder: Arc<dyn VideoRecordingService>,
        analyzer: Arc<dyn ClipAnalyzer>,
        dispatcher: Arc<AlertDispatcher>,
        repos: Repositories,
    ) -> Self {
        let gate = DetectionGate::with_cooldown(config.criteria, config.cooldown);
        let sessions = SessionManager::new(repos.sessions.clone());

        Self {
            config,
            ingestor,
            detector,
            gate: Mutex::new(gate),
            recorder,
            analyzer,
            dispatcher,
            repos,
            sessions,
            state: Mutex::new(PipelineState::default()),
            latest: RwLock::new(None),
            clip_ready: Notify::new(),
            running: AtomicBool::new(false),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Open a session, connect the stream and spawn both loops.
    ///
    /// Fails if the session cannot be started or the stream cannot be opened.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Orchestrator already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        if let Err(e) = self.sessions.start().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if !self.ingestor.connect_until(&cancel).await {
            self.running.store(false, Ordering::SeqCst);
            self.sessions.end().await;
            return Err(Error::Stream("failed to connect to stream".to_string()));
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.config.clip_dir).await {
            tracing::warn!(dir = %self.config.clip_dir.display(), error = %e, "Failed to create clip directory");
        }

        let ingestion = tokio::spawn(self.clone().ingestion_loop(cancel.clone()));
        let analysis = tokio::spawn(self.clone().analysis_loop(cancel));
        self.tasks.lock().await.extend([ingestion, analysis]);

        tracing::info!(
            clip_duration_sec = self.config.clip_duration.as_secs(),
            clip_dir = %self.config.clip_dir.display(),
            "Capture orchestrator started"
        );
        Ok(())
    }

    /// Cancel both loops, wait for in-flight work, close the session
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Stopping capture orchestrator");
        self.cancel_token().cancel();

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Orchestrator task panicked");
            }
        }

        self.ingestor.disconnect().await;
        self.sessions.end().await;
        tracing::info!("Capture orchestrator stopped");
    }

    /// Sleep unless cancelled first; true when cancelled
    async fn idle(cancel: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    async fn ingestion_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut frames_processed: u64 = 0;
        let mut last_liveness = Instant::now();

        while !cancel.is_cancelled() {
            if !self.ingestor.is_connected() {
                tracing::warn!("Stream disconnected, reconnecting");
                if !self.ingestor.connect_until(&cancel).await {
                    if Self::idle(&cancel, self.config.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            }

            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = self.ingestor.get_frame_until(&cancel) => frame,
            };
            let Some(frame) = next else {
                if Self::idle(&cancel, self.config.frame_wait).await {
                    break;
                }
                continue;
            };

            frames_processed += 1;
            self.process_frame(&frame).await;

            if last_liveness.elapsed() >= self.config.liveness_interval {
                let pending = self.state.lock().await.pending();
                tracing::info!(frames_processed = frames_processed, pending_clips = pending, "Monitoring active");
                last_liveness = Instant::now();
            }
        }

        tracing::info!(frames_processed = frames_processed, "Ingestion loop stopped");
    }

    async fn analysis_loop(self: Arc<Self>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if self.process_next().await.is_some() {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clip_ready.notified() => {}
                _ = tokio::time::sleep(self.config.idle_poll) => {}
            }
        }
        tracing::info!("Analysis loop stopped");
    }

    /// Detection and gating for one frame; starts a capture on admission
    pub async fn process_frame(&self, frame: &Frame) -> Option<Clip> {
        let detections = match self.detector.detect_persons(frame).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(frame_index = frame.index, error = %e, "Person detection failed");
                return None;
            }
        };
        if detections.is_empty() {
            return None;
        }

        let admitted = self.gate.lock().await.admit(detections);
        if admitted.is_empty() {
            return None;
        }
        self.capture(admitted).await
    }

    /// Record a clip for admitted detections.
    ///
    /// Returns `None` without side effects while another capture or an
    /// analysis is in flight, and `None` when recording produced nothing.
    pub async fn capture(&self, detections: Vec<Detection>) -> Option<Clip> {
        let trigger = detections
            .iter()
            .max_by(|a, b| a.confidence().total_cmp(&b.confidence()))?
            .clone();

        if !self.state.lock().await.try_begin_capture() {
            tracing::debug!("Capture skipped, pipeline busy");
            return None;
        }

        let session_id = self.sessions.current_id().await.unwrap_or_default();
        self.sessions.record_detections(&detections).await;
        for detection in &detections {
            if let Err(e) = self.repos.detections.save_detection(&session_id, detection).await {
                tracing::warn!(error = %e, "Failed to store detection");
            }
        }

        let output = clip_output_path(&self.config.clip_dir, Utc::now());
        tracing::info!(
            confidence = trigger.confidence(),
            clip = %output.display(),
            duration_sec = self.config.clip_duration.as_secs(),
            "Person detected, recording clip"
        );

        let clip = if self.cancel_token().is_cancelled() {
            None
        } else {
            match self.recorder.record_clip(self.config.clip_duration, &output, &trigger).await {
                Ok(Some(clip)) => Some(clip),
                Ok(None) => {
                    tracing::warn!(clip = %output.display(), "Recording produced no clip");
                    None
                }
                Err(e) => {
                    tracing::error!(clip = %output.display(), error = %e, "Recording failed");
                    None
                }
            }
        };

        // queue first so the analysis loop can pick the clip up
        self.state.lock().await.finish_capture(clip.clone());

        if let Some(clip) = &clip {
            self.sessions.record_clip(clip).await;
            if let Err(e) = self.repos.clips.save_clip(&session_id, clip).await {
                tracing::warn!(error = %e, "Failed to store clip");
            }
            self.clip_ready.notify_one();
            tracing::info!(clip = %clip.path().display(), frames = clip.frame_count, "Clip queued for analysis");
        }
        clip
    }

    /// Analyze the oldest queued clip. `None` if nothing was started
    /// (queue empty, paused, or an analysis already running).
    pub async fn process_next(&self) -> Option<AnalysisResult> {
        let clip = self.state.lock().await.begin_analysis()?;
        tracing::info!(clip = %clip.path().display(), "Analyzing clip");

        let result = self.analyzer.analyze(&clip).await;

        let session_id = self.sessions.current_id().await.unwrap_or_default();
        self.sessions.record_analysis(&result).await;
        if let Err(e) = self.repos.analyses.save_analysis(&session_id, &result).await {
            tracing::warn!(error = %e, "Failed to store analysis");
        }
        *self.latest.write().await = Some(result.clone());

        if result.is_threat_detected() {
            tracing::warn!(
                level = %result.threat_level,
                confidence = result.confidence,
                clip = %clip.path().display(),
                "Threat detected"
            );
            self.dispatcher.dispatch(&result, Some(clip.path())).await;
        } else {
            tracing::info!(level = %result.threat_level, "No threat detected");
        }

        self.state.lock().await.finish_analysis();
        Some(result)
    }

    pub async fn pause_analysis(&self) {
        self.state.lock().await.set_paused(true);
        tracing::info!("Analysis consumption paused");
    }

    pub async fn resume_analysis(&self) {
        self.state.lock().await.set_paused(false);
        self.clip_ready.notify_one();
        tracing::info!("Analysis consumption resumed");
    }

    pub async fn latest_analysis(&self) -> Option<AnalysisResult> {
        self.latest.read().await.clone()
    }

    pub async fn status(&self) -> StatusSnapshot {
        let (capture, analysis, paused, phase, pending) = {
            let state = self.state.lock().await;
            (
                state.capture_in_progress(),
                state.analysis_in_progress(),
                state.is_paused(),
                state.phase(),
                state.pending(),
            )
        };
        let summary = self.sessions.summary().await;
        let latest = self.latest.read().await;

        StatusSnapshot {
            running: self.is_running(),
            stream_connected: self.ingestor.is_connected(),
            capture_in_progress: capture,
            analysis_in_progress: analysis,
            analysis_paused: paused,
            phase,
            session_id: summary.id,
            session_duration_sec: summary.duration_sec,
            detection_count: summary.detections,
            clip_count: summary.clips,
            analysis_count: summary.analyses,
            threat_count: summary.threats,
            pending_clips: pending,
            latest_analysis: latest.as_ref().map(|a| a.text.clone()),
            latest_threat_level: latest.as_ref().map(|a| a.threat_level),
        }
    }
}
