//! Cancellable timers for a single-threaded event loop.
//!
//! Each timer is identified by a key; arming a key that is already pending
//! replaces the pending firing rather than stacking a second one. Time is a
//! caller-supplied monotonic millisecond count, so the queue never sleeps.

#[derive(Debug, Clone)]
struct Entry<K> {
    key: K,
    deadline_ms: u64,
    period_ms: Option<u64>,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    entries: Vec<Entry<K>>,
    next_seq: u64,
}

impl<K: Copy + PartialEq> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + PartialEq> TimerQueue<K> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next_seq: 0 }
    }

    /// One-shot timer firing `delay_ms` after `now_ms`.
    pub fn arm(&mut self, key: K, now_ms: u64, delay_ms: u64) {
        self.insert(key, now_ms + delay_ms, None);
    }

    /// Periodic timer, first firing one period after `now_ms`.
    pub fn arm_periodic(&mut self, key: K, now_ms: u64, period_ms: u64) {
        let period_ms = period_ms.max(1);
        self.insert(key, now_ms + period_ms, Some(period_ms));
    }

    pub fn cancel(&mut self, key: K) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        before != self.entries.len()
    }

    pub fn deadline(&self, key: K) -> Option<u64> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.deadline_ms)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.iter().map(|e| e.deadline_ms).min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return the earliest timer due at `now_ms`. Periodic timers
    /// are re-armed; missed periods collapse into a single firing.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<K> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.deadline_ms <= now_ms)
            .min_by_key(|(_, e)| (e.deadline_ms, e.seq))
            .map(|(i, _)| i)?;

        let entry = self.entries.remove(idx);
        if let Some(period) = entry.period_ms {
            let mut next = entry.deadline_ms + period;
            while next <= now_ms {
                next += period;
            }
            self.insert(entry.key, next, Some(period));
        }
        Some(entry.key)
    }

    fn insert(&mut self, key: K, deadline_ms: u64, period_ms: Option<u64>) {
        self.cancel(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { key, deadline_ms, period_ms, seq });
    }
}
