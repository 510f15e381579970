use crate::models::{CapturePhase, Clip};
use std::collections::VecDeque;

/// Flags and queue shared by the ingestion and analysis loops.
///
/// Always accessed under the orchestrator's single mutex.
#[derive(Debug)]
pub struct PipelineState {
    capture_in_progress: bool,
    analysis_in_progress: bool,
    paused: bool,
    phase: CapturePhase,
    queue: VecDeque<Clip>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            capture_in_progress: false,
            analysis_in_progress: false,
            paused: false,
            phase: CapturePhase::Monitoring,
            queue: VecDeque::new(),
        }
    }
}

impl PipelineState {
    /// Claim the capture slot. False while a capture or an analysis runs.
    pub fn try_begin_capture(&mut self) -> bool {
        if self.capture_in_progress || self.analysis_in_progress {
            return false;
        }
        self.capture_in_progress = true;
        self.phase = CapturePhase::Recording;
        true
    }

    /// Release the capture slot, queueing the clip if one was produced
    pub fn finish_capture(&mut self, clip: Option<Clip>) {
        self.capture_in_progress = false;
        if let Some(clip) = clip {
            self.queue.push_back(clip);
        }
        self.phase = self.idle_phase();
    }

    /// Pop the oldest clip and claim the analysis slot
    pub fn begin_analysis(&mut self) -> Option<Clip> {
        if self.paused || self.analysis_in_progress {
            return None;
        }
        let clip = self.queue.pop_front()?;
        self.analysis_in_progress = true;
        self.phase = CapturePhase::Analyzing;
        Some(clip)
    }

    pub fn finish_analysis(&mut self) {
        self.analysis_in_progress = false;
        self.phase = if self.capture_in_progress {
            CapturePhase::Recording
        } else {
            self.idle_phase()
        };
    }

    fn idle_phase(&self) -> CapturePhase {
        if self.analysis_in_progress {
            CapturePhase::Analyzing
        } else if self.queue.is_empty() {
            CapturePhase::Monitoring
        } else {
            CapturePhase::Queued
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn capture_in_progress(&self) -> bool {
        self.capture_in_progress
    }

    pub fn analysis_in_progress(&self) -> bool {
        self.analysis_in_progress
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
