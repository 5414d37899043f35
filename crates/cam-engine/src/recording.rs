//! Recording time bookkeeping.
//!
//! Querying the recording time from the camera is expensive, so the elapsed
//! time is kept locally and only re-anchored when a capture status report
//! carries the camera's own figure.

use crate::camera::VideoStatus;

pub const RECORD_TICK_MS: u64 = 333;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingTransition {
    Started,
    /// `silent` is set when nothing was recording, e.g. when leaving the
    /// boot-time undefined status.
    Stopped { silent: bool },
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingTracker {
    running: bool,
    anchor_ms: u64,
    elapsed_ms: u64,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn on_status(&mut self, old: VideoStatus, new: VideoStatus, now_ms: u64) -> RecordingTransition {
        if old == new {
            return RecordingTransition::Unchanged;
        }
        if new == VideoStatus::Running {
            self.running = true;
            self.anchor_ms = now_ms;
            self.elapsed_ms = 0;
            return RecordingTransition::Started;
        }
        let was_running = self.running;
        self.running = false;
        self.elapsed_ms = 0;
        RecordingTransition::Stopped { silent: !was_running }
    }

    /// Periodic tick; returns the elapsed time to publish.
    pub fn tick(&mut self, now_ms: u64) -> u64 {
        if self.running {
            self.elapsed_ms = self.elapsed_ms.max(now_ms.saturating_sub(self.anchor_ms));
        }
        self.elapsed_ms
    }

    /// Move the anchor so that local time agrees with the camera's report.
    /// The published value never goes backwards within a session.
    pub fn reanchor(&mut self, reported_ms: u64, now_ms: u64) -> Option<u64> {
        if !self.running {
            return None;
        }
        self.anchor_ms = now_ms.saturating_sub(reported_ms);
        self.elapsed_ms = self.elapsed_ms.max(reported_ms);
        Some(self.elapsed_ms)
    }
}

/// `hh:mm:ss`, wrapping at 24 hours.
pub fn format_record_time(ms: u64) -> String {
    let secs = (ms / 1000) % 86_400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
