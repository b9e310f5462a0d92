pub mod queue;

pub use queue::{
    Delta, FileStore, Iter, LogStore, MemStore, Message, PersistentQueue, QueueError, QueueState,
    ReplayStats,
};
