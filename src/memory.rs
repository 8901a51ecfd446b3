//! Accounted memory budget for queued events.
//! Every byte that enters a queue is consumed here first and released after
//! it leaves; the limit is re-read from the twin configuration on every
//! consume so a pushed policy change takes effect on the next allocation.
//! The monitor is advisory: it gates producers, it never frees anything.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::TwinConfiguration;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// The allocation would push the accounted total over the cache limit.
    #[error("local cache limit exceeded")]
    Exceeded,
    /// Releasing more than is currently accounted. Programmer error.
    #[error("release larger than current consumption")]
    InvalidReleaseSize,
}

pub struct MemoryMonitor {
    used_bytes: Mutex<u64>,
    twin: Arc<TwinConfiguration>,
}

impl MemoryMonitor {
    pub fn new(twin: Arc<TwinConfiguration>) -> Self {
        Self {
            used_bytes: Mutex::new(0),
            twin,
        }
    }

    /// Accounts `size` bytes against the budget. No side effect on refusal.
    pub fn consume(&self, size: u64) -> Result<(), MemoryError> {
        let limit = self.twin.max_local_cache_size();
        let mut used = self.used_bytes.lock();
        if *used + size > limit {
            return Err(MemoryError::Exceeded);
        }
        *used += size;
        Ok(())
    }

    /// Returns `size` bytes to the budget.
    pub fn release(&self, size: u64) -> Result<(), MemoryError> {
        let mut used = self.used_bytes.lock();
        if size > *used {
            return Err(MemoryError::InvalidReleaseSize);
        }
        *used -= size;
        Ok(())
    }

    pub fn current_consumption(&self) -> u64 {
        *self.used_bytes.lock()
    }
}
