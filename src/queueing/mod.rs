//! Bounded-memory FIFO queues shared across the pipeline.

pub mod queue;
pub mod sync_queue;

pub use queue::{PopError, PushError, Queue, QueueData};
pub use sync_queue::SyncQueue;
