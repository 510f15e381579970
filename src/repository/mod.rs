//! Repository - Storage of detections, clips, analyses and sessions
//!
//! ## Responsibilities
//!
//! - Save/query contracts for each record kind
//! - In-memory ring buffer store (oldest records dropped at capacity)

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::models::{AnalysisResult, Clip, Detection, Session};
use async_trait::async_trait;

#[async_trait]
pub trait DetectionRepository: Send + Sync {
    async fn save_detection(&self, session_id: &str, detection: &Detection) -> Result<()>;

    /// Newest first
    async fn recent_detections(&self, limit: usize) -> Result<Vec<Detection>>;
}

#[async_trait]
pub trait ClipRepository: Send + Sync {
    async fn save_clip(&self, session_id: &str, clip: &Clip) -> Result<()>;

    /// Newest first
    async fn recent_clips(&self, limit: usize) -> Result<Vec<Clip>>;
}

#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    async fn save_analysis(&self, session_id: &str, analysis: &AnalysisResult) -> Result<()>;

    /// Newest first
    async fn recent_analyses(&self, limit: usize) -> Result<Vec<AnalysisResult>>;

    async fn latest_analysis(&self) -> Result<Option<AnalysisResult>> {
        Ok(self.recent_analyses(1).await?.into_iter().next())
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert or replace by session id
    async fn save_session(&self, session: &Session) -> Result<()>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;
}
