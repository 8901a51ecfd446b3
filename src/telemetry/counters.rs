//! Synced telemetry counters.
//! Every queue and the hub adapter meter themselves with a small counter
//! behind its own mutex, so producers on any thread can bump a field without
//! touching the owning structure's lock. Readers drain with
//! snapshot-and-reset so consecutive snapshots partition the count space.

use parking_lot::Mutex;

/// Per-queue meter.
///
/// `collected` counts enqueue *attempts*, accepted or not; `dropped` counts
/// the attempts rejected by the memory budget. `collected - dropped` is
/// therefore the number of items that actually entered the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueCounter {
    pub collected: u64,
    pub dropped: u64,
}

/// Hub-adapter meter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageCounter {
    /// Messages handed to the transport.
    pub sent_messages: u64,
    /// Sent messages below the billing multiple.
    pub small_messages: u64,
    /// Messages the transport later reported as failed.
    pub failed_messages: u64,
}

/// A counter payload behind a mutex.
///
/// Field selection for `increase_by` is a plain fn pointer from payload to
/// field, so call sites read like `counter.increase_by(|c| &mut c.dropped, 1)`.
#[derive(Debug, Default)]
pub struct SyncedCounter<C> {
    inner: Mutex<C>,
}

impl<C: Default + Copy> SyncedCounter<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(C::default()),
        }
    }

    /// Copies the current payload out and zeroes the live one, atomically.
    pub fn snapshot_and_reset(&self) -> C {
        let mut guard = self.inner.lock();
        std::mem::take(&mut *guard)
    }

    /// Adds `amount` to one numeric field of the payload.
    pub fn increase_by(&self, field: fn(&mut C) -> &mut u64, amount: u64) {
        let mut guard = self.inner.lock();
        *field(&mut guard) += amount;
    }

    /// Reads the payload without resetting it.
    pub fn peek(&self) -> C {
        *self.inner.lock()
    }
}
