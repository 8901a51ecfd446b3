//! Bounded-memory FIFO queue for pipeline items.
//! The bound is not a fixed capacity: every enqueue consumes the item's
//! accounted size from the shared memory monitor and every dequeue releases
//! it, so all queues together respect one process-wide byte budget. Each
//! queue meters accepted and dropped items through a synced counter.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use log::{error, info};
use thiserror::Error;

use crate::memory::{MemoryError, MemoryMonitor};
use crate::telemetry::{QueueCounter, SyncedCounter};

/// Anything a queue can account for.
pub trait QueueData: Send {
    /// Payload size in bytes, charged against the memory budget.
    fn byte_size(&self) -> usize;
}

impl QueueData for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

#[derive(Debug, Error)]
pub enum PushError<T> {
    /// Backpressure: the budget refused the item. The item is handed back so
    /// the producer can decide whether to retry later.
    #[error("local cache limit exceeded, item rejected")]
    MemoryExceeded(T),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PopError {
    #[error("queue is empty")]
    Empty,
    /// The head exists but failed the caller's predicate; it stays queued.
    #[error("head item failed the pop condition")]
    ConditionFailed,
}

pub struct Queue<T: QueueData> {
    items: VecDeque<T>,
    emits_diagnostics: bool,
    counter: Arc<SyncedCounter<QueueCounter>>,
    monitor: Arc<MemoryMonitor>,
}

/// Accounted cost of one queued item: payload plus the queue's own
/// per-item bookkeeping (the slot and one link pointer).
fn item_overhead<T: QueueData>(item: &T) -> u64 {
    (item.byte_size() + mem::size_of::<T>() + mem::size_of::<usize>()) as u64
}

impl<T: QueueData> Queue<T> {
    pub fn new(monitor: Arc<MemoryMonitor>, emits_diagnostics: bool) -> Self {
        Self {
            items: VecDeque::new(),
            emits_diagnostics,
            counter: Arc::new(SyncedCounter::new()),
            monitor,
        }
    }

    /// Appends `item` at the tail, taking ownership on success.
    ///
    /// `collected` counts every attempt; `dropped` counts the attempts the
    /// memory budget refused, which are handed back to the caller.
    pub fn push_back(&mut self, item: T) -> Result<(), PushError<T>> {
        self.counter.increase_by(|c| &mut c.collected, 1);

        if let Err(err) = self.monitor.consume(item_overhead(&item)) {
            debug_assert_eq!(err, MemoryError::Exceeded);
            self.counter.increase_by(|c| &mut c.dropped, 1);
            if self.emits_diagnostics {
                info!("max cache size exceeded, dropping item");
            }
            return Err(PushError::MemoryExceeded(item));
        }

        self.items.push_back(item);
        Ok(())
    }

    /// Removes and returns the head. The caller owns the buffer; its bytes
    /// are released back to the budget before it is handed over.
    pub fn pop_front(&mut self) -> Result<T, PopError> {
        let item = self.items.pop_front().ok_or(PopError::Empty)?;
        self.release(&item);
        Ok(item)
    }

    /// Like [`pop_front`], but only when the current head satisfies
    /// `condition`. A failing head stays in place for a later attempt.
    ///
    /// [`pop_front`]: Queue::pop_front
    pub fn pop_front_if(
        &mut self,
        condition: impl FnOnce(&T) -> bool,
    ) -> Result<T, PopError> {
        let head = self.items.front().ok_or(PopError::Empty)?;
        if !condition(head) {
            return Err(PopError::ConditionFailed);
        }
        self.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn counter(&self) -> Arc<SyncedCounter<QueueCounter>> {
        self.counter.clone()
    }

    fn release(&self, item: &T) {
        if let Err(err) = self.monitor.release(item_overhead(item)) {
            // Accounting drift means a bug in the enqueue/dequeue pairing.
            error!("queue released more than it consumed: {err}");
        }
    }
}

impl<T: QueueData> Drop for Queue<T> {
    fn drop(&mut self) {
        // Return every accounted byte before the items go away.
        while let Some(item) = self.items.pop_front() {
            self.release(&item);
        }
    }
}
