use crate::error::{Error, Result};
use crate::models::{AnalysisResult, Clip, Detection, Session};
use crate::repository::SessionRepository;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counters reported on the status surface
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub id: Option<String>,
    pub duration_sec: i64,
    pub detections: usize,
    pub clips: usize,
    pub analyses: usize,
    pub threats: usize,
}

/// Owns the active monitoring session
pub struct SessionManager {
    current: Mutex<Option<Session>>,
    repo: Arc<dyn SessionRepository>,
}

impl SessionManager {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self {
            current: Mutex::new(None),
            repo,
        }
    }

    /// Close any open session and open a new one; returns the new id
    pub async fn start(&self) -> Result<String> {
        let mut current = self.current.lock().await;
        let now = Utc::now();

        if let Some(previous) = current.as_mut().filter(|s| s.is_open()) {
            previous.complete(now);
            tracing::info!(session_id = %previous.id, "Previous session closed");
            if let Err(e) = self.repo.save_session(previous).await {
                tracing::warn!(session_id = %previous.id, error = %e, "Failed to persist closed session");
            }
        }

        let session = Session::new(now);
        self.repo
            .save_session(&session)
            .await
            .map_err(|e| Error::Session(format!("failed to start session: {}", e)))?;

        let id = session.id.clone();
        tracing::info!(session_id = %id, "Session started");
        *current = Some(session);
        Ok(id)
    }

    /// Complete the open session, if any
    pub async fn end(&self) -> Option<Session> {
        let mut current = self.current.lock().await;
        let session = current.as_mut().filter(|s| s.is_open())?;
        session.complete(Utc::now());

        tracing::info!(
            session_id = %session.id,
            detections = session.detections.len(),
            clips = session.clips.len(),
            analyses = session.analyses.len(),
            threats = session.threat_count(),
            "Session completed"
        );
        if let Err(e) = self.repo.save_session(session).await {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to persist session");
        }
        Some(session.clone())
    }

    pub async fn record_detections(&self, detections: &[Detection]) {
        if let Some(session) = self.current.lock().await.as_mut() {
            session.detections.extend_from_slice(detections);
        }
    }

    pub async fn record_clip(&self, clip: &Clip) {
        if let Some(session) = self.current.lock().await.as_mut() {
            session.clips.push(clip.clone());
        }
    }

    pub async fn record_analysis(&self, analysis: &AnalysisResult) {
        if let Some(session) = self.current.lock().await.as_mut() {
            session.analyses.push(analysis.clone());
        }
    }

    pub async fn current_id(&self) -> Option<String> {
        self.current.lock().await.as_ref().map(|s| s.id.clone())
    }

    /// Copy of the current (or last) session
    pub async fn snapshot(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    pub async fn summary(&self) -> SessionSummary {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(s) => SessionSummary {
                id: Some(s.id.clone()),
                duration_sec: s.duration(Utc::now()).num_seconds(),
                detections: s.detections.len(),
                clips: s.clips.len(),
                analyses: s.analyses.len(),
                threats: s.threat_count(),
            },
            None => SessionSummary::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, SessionStatus};
    use crate::repository::MemoryStore;

    #[tokio::test]
    async fn test_start_closes_previous() {
        let store = Arc::new(MemoryStore::default());
        let sessions = SessionManager::new(store.clone());

        let first = sessions.start().await.unwrap();
        let det = Detection::new(Utc::now(), BoundingBox::new(0, 0, 40, 100, 0.8), 3, 0.8).unwrap();
        sessions.record_detections(&[det]).await;
        assert_eq!(sessions.summary().await.detections, 1);

        sessions.start().await.unwrap();
        let closed = store.get_session(&first).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Completed);
        assert_eq!(closed.detections.len(), 1);
        assert_eq!(sessions.summary().await.detections, 0);
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let sessions = SessionManager::new(Arc::new(MemoryStore::default()));
        assert!(sessions.end().await.is_none());

        sessions.start().await.unwrap();
        let ended = sessions.end().await.unwrap();
        assert!(ended.ended_at.is_some());
        assert!(sessions.end().await.is_none());
    }
}
