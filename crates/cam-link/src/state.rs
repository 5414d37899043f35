use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use time::OffsetDateTime;

#[derive(Debug, Clone, Default)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub connected_at: Option<OffsetDateTime>,
    pub last_heartbeat: Option<Instant>,
    pub last_msg: Option<String>,
}

impl LinkStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }

    pub fn mark_connected(&mut self, port: &str, baud: u32) {
        self.connected = true;
        self.port = Some(port.to_string());
        self.baud = Some(baud);
        self.connected_at = Some(OffsetDateTime::now_utc());
    }
}

/// Tracks PARAM_VALUE indices until the camera's whole parameter set has been
/// seen once.
#[derive(Debug, Clone, Default)]
pub struct ParamTracker {
    count: Option<u16>,
    seen: BTreeSet<u16>,
    complete: bool,
}

impl ParamTracker {
    /// Record one PARAM_VALUE. Returns true exactly once, when the set first
    /// becomes complete.
    pub fn on_value(&mut self, index: u16, count: u16) -> bool {
        if self.complete {
            return false;
        }
        if self.count != Some(count) {
            // camera restarted its list or changed size
            self.count = Some(count);
            self.seen.clear();
        }
        // u16::MAX is the index of an unsolicited or single-read reply
        if index != u16::MAX && index < count {
            self.seen.insert(index);
        }
        if count > 0 && self.seen.len() == count as usize {
            self.complete = true;
            return true;
        }
        false
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn received(&self) -> usize {
        self.seen.len()
    }
}
