use super::{AnalysisRepository, ClipRepository, DetectionRepository, SessionRepository};
use crate::error::Result;
use crate::models::{AnalysisResult, Clip, Detection, Session};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Record tagged with the session it belongs to
#[derive(Debug, Clone)]
struct Entry<T> {
    session_id: String,
    value: T,
}

struct RingBuffer<T> {
    entries: VecDeque<Entry<T>>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, session_id: &str, value: T) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            session_id: session_id.to_string(),
            value,
        });
    }

    fn latest(&self, count: usize) -> Vec<T> {
        self.entries.iter().rev().take(count).map(|e| e.value.clone()).collect()
    }

    fn count_for(&self, session_id: &str) -> usize {
        self.entries.iter().filter(|e| e.session_id == session_id).count()
    }
}

/// In-memory store for all record kinds
pub struct MemoryStore {
    detections: RwLock<RingBuffer<Detection>>,
    clips: RwLock<RingBuffer<Clip>>,
    analyses: RwLock<RingBuffer<AnalysisResult>>,
    sessions: RwLock<VecDeque<Session>>,
    session_capacity: usize,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            detections: RwLock::new(RingBuffer::new(capacity)),
            clips: RwLock::new(RingBuffer::new(capacity)),
            analyses: RwLock::new(RingBuffer::new(capacity)),
            sessions: RwLock::new(VecDeque::new()),
            session_capacity: 100,
        }
    }

    /// Detection/clip/analysis counts stored for one session
    pub async fn counts_for(&self, session_id: &str) -> (usize, usize, usize) {
        (
            self.detections.read().await.count_for(session_id),
            self.clips.read().await.count_for(session_id),
            self.analyses.read().await.count_for(session_id),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[async_trait]
impl DetectionRepository for MemoryStore {
    async fn save_detection(&self, session_id: &str, detection: &Detection) -> Result<()> {
        self.detections.write().await.push(session_id, detection.clone());
        Ok(())
    }

    async fn recent_detections(&self, limit: usize) -> Result<Vec<Detection>> {
        Ok(self.detections.read().await.latest(limit))
    }
}

#[async_trait]
impl ClipRepository for MemoryStore {
    async fn save_clip(&self, session_id: &str, clip: &Clip) -> Result<()> {
        self.clips.write().await.push(session_id, clip.clone());
        tracing::debug!(session_id = session_id, clip = %clip.path().display(), "Clip stored");
        Ok(())
    }

    async fn recent_clips(&self, limit: usize) -> Result<Vec<Clip>> {
        Ok(self.clips.read().await.latest(limit))
    }
}

#[async_trait]
impl AnalysisRepository for MemoryStore {
    async fn save_analysis(&self, session_id: &str, analysis: &AnalysisResult) -> Result<()> {
        self.analyses.write().await.push(session_id, analysis.clone());
        Ok(())
    }

    async fn recent_analyses(&self, limit: usize) -> Result<Vec<AnalysisResult>> {
        Ok(self.analyses.read().await.latest(limit))
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn save_session(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.iter_mut().find(|s| s.id == session.id) {
            *existing = session.clone();
        } else {
            if sessions.len() >= self.session_capacity {
                sessions.pop_front();
            }
            sessions.push_back(session.clone());
        }
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().await.iter().find(|s| s.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use chrono::Utc;

    fn detection(conf: f32) -> Detection {
        Detection::new(Utc::now(), BoundingBox::new(0, 0, 40, 100, conf), 0, conf).unwrap()
    }

    #[tokio::test]
    async fn test_ring_buffer_drops_oldest() {
        let store = MemoryStore::new(2);
        for conf in [0.6, 0.7, 0.8] {
            store.save_detection("s1", &detection(conf)).await.unwrap();
        }

        let recent = store.recent_detections(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].confidence(), 0.8);
        assert_eq!(recent[1].confidence(), 0.7);
    }

    #[tokio::test]
    async fn test_counts_per_session() {
        let store = MemoryStore::default();
        store.save_detection("s1", &detection(0.9)).await.unwrap();
        store.save_detection("s2", &detection(0.9)).await.unwrap();
        assert_eq!(store.counts_for("s1").await, (1, 0, 0));
        assert!(store.latest_analysis().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_upsert() {
        let store = MemoryStore::default();
        let mut session = Session::new(Utc::now());
        store.save_session(&session).await.unwrap();

        session.complete(Utc::now());
        store.save_session(&session).await.unwrap();

        let stored = store.get_session(&session.id).await.unwrap().unwrap();
        assert!(!stored.is_open());
        assert!(store.get_session("missing").await.unwrap().is_none());
    }
}
