//! Per-party "stopped talking at" registry.
//!
//! An entry exists only while its party is cooling down after talking: it is
//! inserted on stop, removed on resume, and removed when it expires.  The
//! tracker holds no timer of its own; owners poll [`TalkHoldTracker::expired`]
//! and use [`TalkHoldTracker::next_expiry`] to decide whether a sweep is
//! needed at all.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TalkHoldTracker<K> {
    hold: Duration,
    entries: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> TalkHoldTracker<K> {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            entries: HashMap::new(),
        }
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    /// Applies to entries already in the window as well.
    pub fn set_hold(&mut self, hold: Duration) {
        self.hold = hold;
    }

    /// Insert or refresh the entry for `key`.
    pub fn mark_stopped(&mut self, key: K, at: Instant) {
        self.entries.insert(key, at);
    }

    /// Drop the entry for `key`.  Returns `true` if one was pending.
    pub fn mark_started(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove and return every key whose hold has elapsed at `now`, oldest
    /// first.  Each key is returned at most once per stop.
    pub fn expired(&mut self, now: Instant) -> Vec<K> {
        let hold = self.hold;
        let mut due: Vec<(K, Instant)> = self
            .entries
            .iter()
            .filter(|(_, stopped)| now.saturating_duration_since(**stopped) >= hold)
            .map(|(k, stopped)| (k.clone(), *stopped))
            .collect();
        due.sort_by_key(|(_, stopped)| *stopped);
        for (key, _) in &due {
            self.entries.remove(key);
        }
        due.into_iter().map(|(k, _)| k).collect()
    }

    /// Time left before `key` expires, `None` if it is not cooling down.
    pub fn remaining(&self, key: &K, now: Instant) -> Option<Duration> {
        self.entries
            .get(key)
            .map(|stopped| self.hold.saturating_sub(now.saturating_duration_since(*stopped)))
    }

    /// Earliest expiry across all entries.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().min().map(|stopped| *stopped + self.hold)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
