//! Eviction Timer Module
//!
//! Min-heap of key expiry timestamps with lazy invalidation.
//!
//! The heap may hold several entries for one key; only the one whose timestamp
//! matches `live` is authoritative. Superseded entries are skipped when they
//! surface at the top rather than searched for and removed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Stale heap entries tolerated before the heap is rebuilt from `live`.
const COMPACT_SLACK: usize = 64;

// == Timer Entry ==
/// A live scheduling entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub key: String,
    pub expires_at: i64,
}

// == Eviction Timer ==
/// Tracks when each key expires, ordered soonest-first.
#[derive(Debug, Default)]
pub struct EvictionTimer {
    /// Candidate entries, possibly stale
    heap: BinaryHeap<Reverse<(i64, String)>>,
    /// Authoritative key -> timestamp map
    live: HashMap<String, i64>,
}

impl EvictionTimer {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Schedule ==
    /// Schedules `key` to expire `ttl` seconds after `now`.
    pub fn schedule(&mut self, key: &str, ttl: i64, now: i64) {
        self.schedule_at(key, now.saturating_add(ttl), now);
    }

    /// Schedules `key` to expire at `timestamp`.
    ///
    /// Timestamps in the past are moved to `now + 1`. Re-scheduling with the
    /// current timestamp is a no-op; any other timestamp supersedes it.
    pub fn schedule_at(&mut self, key: &str, timestamp: i64, now: i64) {
        let timestamp = if timestamp < now { now + 1 } else { timestamp };
        if self.live.get(key) == Some(&timestamp) {
            return;
        }

        self.live.insert(key.to_string(), timestamp);
        self.heap.push(Reverse((timestamp, key.to_string())));

        if self.heap.len() > self.live.len() * 2 + COMPACT_SLACK {
            self.compact();
        }
    }

    // == Cancel ==
    /// Forgets `key`. Its heap entries become stale.
    pub fn cancel(&mut self, key: &str) -> bool {
        self.live.remove(key).is_some()
    }

    // == Peek ==
    /// Returns the live entry that expires soonest without removing it.
    pub fn peek(&mut self) -> Option<TimerEntry> {
        self.discard_stale();
        self.heap.peek().map(|Reverse((ts, key))| TimerEntry {
            key: key.clone(),
            expires_at: *ts,
        })
    }

    // == Pop ==
    /// Removes and returns the live entry that expires soonest.
    pub fn pop(&mut self) -> Option<TimerEntry> {
        self.discard_stale();
        let Reverse((expires_at, key)) = self.heap.pop()?;
        self.live.remove(&key);
        Some(TimerEntry { key, expires_at })
    }

    // == Pop Expired ==
    /// Removes and returns every live entry with a timestamp at or before `now`.
    pub fn pop_expired(&mut self, now: i64) -> Vec<TimerEntry> {
        let mut expired = Vec::new();
        while let Some(entry) = self.peek() {
            if entry.expires_at > now {
                break;
            }
            if let Some(entry) = self.pop() {
                expired.push(entry);
            }
        }
        expired
    }

    /// Current expiry of `key`, if scheduled.
    pub fn deadline(&self, key: &str) -> Option<i64> {
        self.live.get(key).copied()
    }

    // == Length ==
    /// Number of live (scheduled) keys.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Raw heap size, stale entries included.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.live.clear();
    }

    fn discard_stale(&mut self) {
        while let Some(Reverse((ts, key))) = self.heap.peek() {
            if self.live.get(key) == Some(ts) {
                break;
            }
            self.heap.pop();
        }
    }

    fn compact(&mut self) {
        self.heap = self
            .live
            .iter()
            .map(|(key, ts)| Reverse((*ts, key.clone())))
            .collect();
    }
}
