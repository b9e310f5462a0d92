//! Delta Log Codec - one state-change record per text line
//!
//! ## Line Format
//!
//! ```text
//! {"add": {"0": "payload", "status.end": 1}}
//! {"remove": "0"}
//! {"add": {"status": {"start": 3, "end": 5}, "3": "x", "4": "y"}}
//! ```
//!
//! Each line is one externally-tagged [`Delta`]. The reserved keys
//! `status.start` / `status.end` carry the queue cursors; a compaction
//! snapshot nests them under a single `status` object. Ordinary keys are
//! the decimal string of an item's queue index.
//!
//! Decoding is pure and total over well-formed lines. A malformed line
//! (partial write from a crash, on-disk corruption) yields an error that
//! replay skips individually, so one damaged record never blocks
//! recovery of the rest.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::queue::store::QueueError;

/// Reserved key updating the persisted consumption cursor.
pub const STATUS_START: &str = "status.start";
/// Reserved key updating the enqueue cursor.
pub const STATUS_END: &str = "status.end";
/// Reserved key carrying both cursors as a nested object (snapshots).
pub const STATUS: &str = "status";

/// A single recorded state change.
///
/// `Add` assigns one or more key→value pairs; mixing an item key with a
/// cursor key in the same record is how "append item + advance end"
/// stays atomic. `Remove` tombstones one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delta {
    Add(Map<String, Value>),
    Remove(String),
}

impl Delta {
    /// Build an `Add` with a single assignment.
    pub fn assign(key: impl Into<String>, value: Value) -> Delta {
        let mut map = Map::new();
        map.insert(key.into(), value);
        Delta::Add(map)
    }

    /// Build a `Remove` for one key.
    pub fn remove(key: impl Into<String>) -> Delta {
        Delta::Remove(key.into())
    }

    /// Encode as one log line (no trailing newline).
    pub fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Corrupt(format!("encode: {}", e)))
    }

    /// Decode one log line.
    pub fn decode(line: &str) -> Result<Delta, QueueError> {
        serde_json::from_str(line).map_err(|e| QueueError::Corrupt(format!("decode: {}", e)))
    }
}

/// Newline-join a batch of deltas so they land in one write call.
pub fn encode_batch(deltas: &[Delta]) -> Result<String, QueueError> {
    debug_assert!(!deltas.is_empty(), "Precondition: batch must not be empty");

    let mut lines = Vec::with_capacity(deltas.len());
    for delta in deltas {
        lines.push(delta.encode()?);
    }
    Ok(lines.join("\n"))
}
