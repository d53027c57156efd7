// Generic sliding-window event tracker.
//
// Keyed by an arbitrary subject id (a user for spam flags, a guild for join
// tracking). Each subject keeps a bounded, ordered sequence of timestamps;
// entries older than the window are purged lazily on the next access.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Per-subject bounded timestamp sequences.
///
/// Callers feed events in arrival order, so timestamps for a subject are
/// monotonically non-decreasing.
pub struct RateWindow {
    capacity: usize,
    entries: DashMap<u64, VecDeque<DateTime<Utc>>>,
}

impl RateWindow {
    /// Create a tracker that retains at most `capacity` timestamps per subject.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: DashMap::new(),
        }
    }

    /// Append a timestamp for a subject and return how many retained entries
    /// fall within `window` of the new timestamp.
    pub fn record(&self, subject_id: u64, timestamp: DateTime<Utc>, window: Duration) -> usize {
        let mut seq = self.entries.entry(subject_id).or_default();
        seq.push_back(timestamp);
        while seq.len() > self.capacity {
            seq.pop_front();
        }

        let cutoff = timestamp - window;
        // The sequence is ordered, so scanning from the back stops at the
        // first entry outside the window.
        seq.iter().rev().take_while(|t| **t >= cutoff).count()
    }

    /// Number of retained entries for a subject, regardless of age.
    pub fn count(&self, subject_id: u64) -> usize {
        self.entries.get(&subject_id).map(|seq| seq.len()).unwrap_or(0)
    }

    /// Drop all entries older than `window` relative to `now`, removing
    /// subjects whose sequences become empty.
    pub fn prune(&self, window: Duration, now: DateTime<Utc>) {
        let cutoff = now - window;
        self.entries.retain(|_, seq| {
            while seq.front().is_some_and(|t| *t < cutoff) {
                seq.pop_front();
            }
            !seq.is_empty()
        });
    }
}
