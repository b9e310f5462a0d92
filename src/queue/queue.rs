//! Queue API & Concurrency Controller
//!
//! A single mutex guards all mutable state; a condition variable wakes
//! consumers blocked in `pop`. The stop flag lives outside the mutex so
//! blocking operations can observe shutdown without racing the lock.
//!
//! ## Lease protocol
//!
//! `pop` advances an in-memory cursor only. Items between the persisted
//! `status.start` and that runtime cursor are leased: gone from the
//! caller's view, but redelivered after `rollback` or a restart until
//! `commit` makes the consumption durable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::queue::codec::{encode_batch, Delta, STATUS_END, STATUS_START};
use crate::queue::state::QueueState;
use crate::queue::store::{FileStore, LogStore, QueueError};

/// Rewrite the log as one snapshot when fewer live items remain.
const COMPACT_THRESHOLD: u64 = 10;
/// 1-in-N chance of rewriting on any commit, bounding growth on
/// long-lived low-throughput queues.
const COMPACT_PERIOD: u64 = 1000;

/// What comes off the queue.
///
/// `Stop` is the shutdown signal, not a payload: adding it sets the stop
/// flag without enqueueing, and consumers observe it once the queue has
/// drained.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Item(Value),
    Stop,
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Item(value)
    }
}

impl Message {
    /// The payload, if this is an item.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Message::Item(value) => Some(value),
            Message::Stop => None,
        }
    }
}

struct Inner {
    state: QueueState,
    /// Runtime consumption cursor; runs ahead of `state.start` between
    /// a pop and its commit.
    start: u64,
    closed: bool,
    rng: Box<dyn RngCore + Send>,
}

/// Thread-safe, persistent FIFO queue.
///
/// Handles many producers, but the `pop()`, `commit()` idiom supports
/// only one logical consumer: concurrent `pop` callers each receive
/// distinct items, yet `commit`/`rollback` act on one shared cursor, so
/// concurrent consumers would corrupt each other's lease. Single
/// consumer is a precondition, not lock-enforced.
///
/// It is important to `commit()` or `close()`, otherwise nothing comes
/// off the queue permanently.
pub struct PersistentQueue<S: LogStore> {
    store: S,
    inner: Mutex<Inner>,
    available: Condvar,
    stop: AtomicBool,
}

impl PersistentQueue<FileStore> {
    /// Open a queue backed by the file at `path`.
    pub fn open_path(path: impl Into<std::path::PathBuf>) -> Result<Self, QueueError> {
        Self::open(FileStore::new(path))
    }
}

impl<S: LogStore> PersistentQueue<S> {
    /// Open a queue over `store`, replaying the log if it exists.
    pub fn open(store: S) -> Result<Self, QueueError> {
        Self::open_with_rng(store, Box::new(ChaCha8Rng::from_entropy()))
    }

    /// Open with an injected compaction RNG (deterministic tests).
    pub fn open_with_rng(store: S, rng: Box<dyn RngCore + Send>) -> Result<Self, QueueError> {
        let state = if store.exists() {
            let (state, stats) = QueueState::replay(store.read_lines()?);
            if stats.skipped > 0 {
                debug!(
                    skipped = stats.skipped,
                    location = %store.location(),
                    "skipped undecodable records during replay"
                );
            }
            if stats.lost > 0 {
                warn!(
                    lost = stats.lost,
                    location = %store.location(),
                    "queue file had items lost"
                );
            }
            info!(
                items = state.len_from(state.start),
                location = %store.location(),
                "persistent queue found"
            );
            state
        } else {
            info!(location = %store.location(), "new persistent queue");
            QueueState::new()
        };

        let start = state.start;
        Ok(PersistentQueue {
            store,
            inner: Mutex::new(Inner {
                state,
                start,
                closed: false,
                rng,
            }),
            available: Condvar::new(),
            stop: AtomicBool::new(false),
        })
    }

    /// Enqueue a value, or signal shutdown with [`Message::Stop`].
    ///
    /// The item record and the `status.end` advance land in one write
    /// call, so they survive or vanish together. Returns `&self` for
    /// chaining.
    pub fn add(&self, message: impl Into<Message>) -> Result<&Self, QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let value = match message.into() {
            Message::Stop => {
                debug!("stop seen in persistent queue");
                self.stop.store(true, Ordering::SeqCst);
                self.available.notify_all();
                return Ok(self);
            }
            Message::Item(value) => value,
        };

        let end = inner.state.end;
        let batch = [
            Delta::assign(end.to_string(), value),
            Delta::assign(STATUS_END, Value::from(end + 1)),
        ];
        self.persist_batch(&mut inner, &batch)?;
        self.available.notify_all();
        Ok(self)
    }

    /// Take the next item, blocking while the queue is empty.
    ///
    /// The runtime cursor advances in memory only; the item stays leased
    /// until `commit`. With a `timeout`, returns `None` once the deadline
    /// elapses with nothing available — never on an unrelated wake.
    /// Once stop is set and the queue has drained, returns
    /// `Some(Message::Stop)` thereafter.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        loop {
            if inner.state.end > inner.start {
                let value = inner
                    .state
                    .get(inner.start)
                    .cloned()
                    .unwrap_or(Value::Null);
                inner.start += 1;
                return Some(Message::Item(value));
            }

            if self.stop.load(Ordering::SeqCst) {
                debug!("persistent queue already stopped");
                return Some(Message::Stop);
            }

            match deadline {
                Some(deadline) => {
                    let timed_out = self.available.wait_until(&mut inner, deadline).timed_out();
                    if timed_out
                        && inner.state.end == inner.start
                        && !self.stop.load(Ordering::SeqCst)
                    {
                        return None;
                    }
                    // Otherwise loop: re-check the predicate before deciding
                }
                None => self.available.wait(&mut inner),
            }
        }
    }

    /// Non-blocking drain of everything currently available.
    ///
    /// Returns `[Stop]` once stop is set, the pending items otherwise
    /// (advancing the runtime cursor past all of them), or an empty
    /// vector when nothing is queued.
    pub fn pop_all(&self) -> Vec<Message> {
        let mut inner = self.inner.lock();
        if self.stop.load(Ordering::SeqCst) {
            return vec![Message::Stop];
        }

        let mut output = Vec::with_capacity(inner.state.len_from(inner.start) as usize);
        for index in inner.start..inner.state.end {
            let value = inner.state.get(index).cloned().unwrap_or(Value::Null);
            output.push(Message::Item(value));
        }
        inner.start = inner.state.end;
        output
    }

    /// Make all leased consumption durable.
    ///
    /// Persists the runtime cursor as the new `status.start` and
    /// tombstones every index consumed since the last commit. When few
    /// live items remain (or on a rare random draw) the whole file is
    /// rewritten as one snapshot instead, bounding log growth. Either
    /// path is a single write call; the compaction decision is made
    /// while the lock is held, so it cannot race a concurrent `add`.
    pub fn commit(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let batch = commit_batch(&inner);
        let live = inner.state.len_from(inner.start);
        let compact = live < COMPACT_THRESHOLD || inner.rng.gen_range(0..COMPACT_PERIOD) == 0;

        if compact {
            for delta in &batch {
                inner.state.apply(delta);
            }
            debug!(live_items = live, "rewriting persistent queue log");
            let mut text = inner.state.to_snapshot().encode()?;
            text.push('\n');
            self.store.overwrite(&text)?;
        } else {
            self.persist_batch(&mut inner, &batch)?;
        }
        Ok(())
    }

    /// Discard leased-but-uncommitted consumption; the next `pop`
    /// redelivers those items. A no-op once closed.
    pub fn rollback(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.start = inner.state.start;
    }

    /// Shut the queue down. Idempotent.
    ///
    /// Sets the stop flag and wakes all blocked consumers, then persists
    /// final state: the file is deleted if the queue drained, otherwise
    /// rewritten as one snapshot of committed state followed by the
    /// pending incremental record. `add`/`commit` fail with
    /// [`QueueError::Closed`] afterwards; `rollback` becomes a no-op.
    pub fn close(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        // Flag and wake under the mutex: a consumer that already checked
        // the flag is either waiting (and gets this notify) or has not
        // yet released the lock to wait (and will re-check the flag).
        self.stop.store(true, Ordering::SeqCst);
        self.available.notify_all();

        if inner.closed {
            return Ok(());
        }

        if inner.state.end == inner.start {
            debug!("persistent queue clear and closed");
            self.store.delete()?;
        } else {
            debug!(
                items = inner.state.len_from(inner.start),
                "persistent queue closed with items left"
            );
            let batch = commit_batch(&inner);
            let mut text = inner.state.to_snapshot().encode()?;
            text.push('\n');
            text.push_str(&encode_batch(&batch)?);
            text.push('\n');
            self.store.overwrite(&text)?;
            for delta in &batch {
                inner.state.apply(delta);
            }
        }

        inner.closed = true;
        Ok(())
    }

    /// In-flight depth: items enqueued but not yet popped (durable depth
    /// may be larger until `commit`).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.state.len_from(inner.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Peek at the value `offset` positions past the runtime cursor,
    /// without consuming it.
    pub fn peek_at(&self, offset: u64) -> Option<Value> {
        let inner = self.inner.lock();
        inner.state.get(inner.start + offset).cloned()
    }

    /// Lazy, non-restartable consumer: blocking `pop` until `Stop`.
    pub fn iter(&self) -> Iter<'_, S> {
        Iter { queue: self }
    }

    /// Append a delta batch as one write call, then apply it in memory.
    fn persist_batch(&self, inner: &mut Inner, batch: &[Delta]) -> Result<(), QueueError> {
        let mut text = encode_batch(batch)?;
        text.push('\n');
        self.store.append(&text)?;
        for delta in batch {
            inner.state.apply(delta);
        }
        Ok(())
    }
}

/// The incremental record for a commit: persist the runtime cursor,
/// tombstone everything consumed since the last one.
fn commit_batch(inner: &Inner) -> Vec<Delta> {
    let mut batch = vec![Delta::assign(STATUS_START, Value::from(inner.start))];
    for index in inner.state.start..inner.start {
        batch.push(Delta::remove(index.to_string()));
    }
    batch
}

/// Blocking iterator over queue items; ends when stop is observed.
pub struct Iter<'a, S: LogStore> {
    queue: &'a PersistentQueue<S>,
}

impl<S: LogStore> Iterator for Iter<'_, S> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.queue.pop(None) {
            Some(Message::Item(value)) => Some(value),
            Some(Message::Stop) | None => {
                debug!("queue iterator is done");
                None
            }
        }
    }
}
