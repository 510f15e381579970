//! Surveillance Agent Library
//!
//! Capture-triggered surveillance pipeline
//!
//! ## Architecture
//!
//! 1. StreamIngestor - Live stream connection, reconnection, frame supply
//! 2. DetectionGate - Person detection validity + cooldown
//! 3. CaptureOrchestrator - Detect → record → analyze state machine, sessions
//! 4. AnalysisPipeline - Batched VLM analysis, consolidation, classification
//! 5. AlertDispatcher - Broadcast / webhook / HTTP alert delivery
//! 6. AIClient - Remote (Ollama) and local model backends
//! 7. Media - ffmpeg recording and frame extraction
//! 8. Repository - In-memory ring buffer storage
//! 9. WebAPI - Status endpoints
//!
//! ## Data flow
//!
//! StreamIngestor → DetectionGate → CaptureOrchestrator → recorder →
//! AnalysisPipeline → AlertDispatcher

pub mod ai_client;
pub mod alert_dispatcher;
pub mod analysis_pipeline;
pub mod capture_orchestrator;
pub mod detection_gate;
pub mod error;
pub mod media;
pub mod models;
pub mod repository;
pub mod retry;
pub mod state;
pub mod stream_ingestor;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
