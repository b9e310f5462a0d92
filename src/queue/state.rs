//! Queue State Machine - cursors, sparse item map, replay
//!
//! The persisted state is two cursors plus a sparse map of pending items:
//!
//! ```text
//! start ──────▶ first index not yet committed away
//! end ────────▶ one past the newest enqueued index
//! items ──────▶ index → payload, for indices in [start, end)
//! ```
//!
//! Replay folds every decodable log line, in file order, into a fresh
//! state. Lines that fail to decode are counted and skipped; one damaged
//! record never aborts recovery of the rest. After replay a scrub pass
//! drops any stale entry below `start` (an already-committed item whose
//! tombstone record was itself lost to a crash) and reports the count.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::queue::codec::{Delta, STATUS, STATUS_END, STATUS_START};
use crate::queue::store::QueueError;

/// Counters produced by one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records decoded and applied.
    pub applied: usize,
    /// Undecodable lines skipped.
    pub skipped: usize,
    /// Stale entries scrubbed from below the persisted start.
    pub lost: usize,
}

/// In-memory queue state, rebuilt from the log at open.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueState {
    /// Persisted low-water mark: oldest index not committed away.
    pub start: u64,
    /// One past the newest enqueued index.
    pub end: u64,
    items: HashMap<u64, Value>,
}

impl QueueState {
    pub fn new() -> Self {
        QueueState::default()
    }

    /// Apply one delta. `Add` assigns each pair in order; the reserved
    /// keys update the cursors. `Remove` tombstones an item key, so a
    /// removed key never reappears with a stale value. Keys that are
    /// neither reserved nor numeric are ignored.
    pub fn apply(&mut self, delta: &Delta) {
        match delta {
            Delta::Add(map) => {
                for (key, value) in map {
                    match key.as_str() {
                        STATUS_START => {
                            if let Some(n) = value.as_u64() {
                                self.start = n;
                            }
                        }
                        STATUS_END => {
                            if let Some(n) = value.as_u64() {
                                self.end = n;
                            }
                        }
                        STATUS => {
                            // Nested cursor object from a snapshot line
                            if let Some(n) = value.get("start").and_then(Value::as_u64) {
                                self.start = n;
                            }
                            if let Some(n) = value.get("end").and_then(Value::as_u64) {
                                self.end = n;
                            }
                        }
                        _ => {
                            if let Ok(index) = key.parse::<u64>() {
                                self.items.insert(index, value.clone());
                            }
                        }
                    }
                }
            }
            Delta::Remove(key) => {
                if let Ok(index) = key.parse::<u64>() {
                    self.items.remove(&index);
                }
            }
        }
    }

    /// Rebuild state by folding every decodable line in file order.
    ///
    /// A `start` never set by any record defaults to 0 (happens when the
    /// process crashed after adds but before the first commit).
    pub fn replay<I>(lines: I) -> (QueueState, ReplayStats)
    where
        I: IntoIterator<Item = Result<String, QueueError>>,
    {
        let mut state = QueueState::new();
        let mut stats = ReplayStats::default();

        for line in lines {
            let line = match line {
                Ok(line) => line,
                Err(_) => {
                    stats.skipped += 1;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match Delta::decode(&line) {
                Ok(delta) => {
                    state.apply(&delta);
                    stats.applied += 1;
                }
                Err(_) => stats.skipped += 1,
            }
        }

        stats.lost = state.scrub();

        debug_assert!(
            state.start <= state.end,
            "Postcondition: start must not pass end after replay"
        );

        (state, stats)
    }

    /// Drop entries below the persisted start, returning how many were
    /// lost. These are already-committed items whose tombstone update was
    /// interrupted by a crash; clearing them causes no semantic loss.
    fn scrub(&mut self) -> usize {
        let start = self.start;
        let before = self.items.len();
        self.items.retain(|&index, _| index >= start);
        before - self.items.len()
    }

    /// Payload at `index`, if still present.
    pub fn get(&self, index: u64) -> Option<&Value> {
        self.items.get(&index)
    }

    /// Number of items not yet consumed past `cursor`.
    pub fn len_from(&self, cursor: u64) -> u64 {
        self.end.saturating_sub(cursor)
    }

    /// Full-state dump as a single `Add` record, used for compaction and
    /// for the final rewrite at close.
    pub fn to_snapshot(&self) -> Delta {
        let mut map = Map::new();
        let mut status = Map::new();
        status.insert("start".to_string(), Value::from(self.start));
        status.insert("end".to_string(), Value::from(self.end));
        map.insert(STATUS.to_string(), Value::Object(status));
        for (index, value) in &self.items {
            map.insert(index.to_string(), value.clone());
        }
        Delta::Add(map)
    }
}
