//! Durable Persistent FIFO Queue
//!
//! Multiple producer threads, one consumer thread, one append-only log
//! file. Queued-but-unprocessed items survive restarts and crashes.
//!
//! ## Architecture
//!
//! ```text
//! add/pop/commit → PersistentQueue → QueueState (cursors + sparse map)
//!                        ↓
//!                   Delta batch → LogStore (one atomic write per call)
//! ```
//!
//! ## Key Features
//!
//! - **Lease/acknowledge**: popped items stay durable until `commit`;
//!   `rollback` or a restart redelivers them
//! - **Replay recovery**: the log is folded into fresh state at open,
//!   skipping torn records individually
//! - **Compaction**: the log is rewritten as one snapshot when the queue
//!   runs low or on a rare random draw, bounding file growth

pub mod codec;
pub mod queue;
pub mod state;
pub mod store;
pub mod testing;

pub use codec::{encode_batch, Delta, STATUS_END, STATUS_START};
pub use queue::{Iter, Message, PersistentQueue};
pub use state::{QueueState, ReplayStats};
pub use store::{FileStore, LogStore, MemStore, QueueError};
