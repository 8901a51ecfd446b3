//! Periodic task driver.
//! One OS thread per task, looping "run, then sleep the interval" until the
//! running flag is cleared. Cancellation is cooperative: an in-progress
//! execution is never pre-empted, so stop latency is bounded by the interval
//! plus the worst-case execution time.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::error;
use spin_sleep::{SpinSleeper, SpinStrategy};
use thiserror::Error;

use crate::diagnostics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Started,
    Stopped,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler was already started")]
    AlreadyStarted,
}

pub struct SchedulerThread {
    interval: Duration,
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerThread {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Arc::new(AtomicBool::new(true)),
            state: Arc::new(AtomicU8::new(SchedulerState::Created as u8)),
            handle: None,
        }
    }

    /// Spawns the driver thread. The task runs once immediately, then on
    /// every interval tick until [`stop`] is called.
    ///
    /// [`stop`]: SchedulerThread::stop
    pub fn start(&mut self, mut task: impl FnMut() + Send + 'static) -> Result<(), SchedulerError> {
        if self.state.load(Ordering::SeqCst) != SchedulerState::Created as u8 {
            return Err(SchedulerError::AlreadyStarted);
        }

        let running = self.running.clone();
        let state = self.state.clone();
        let interval = self.interval;

        self.handle = Some(thread::spawn(move || {
            let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
            while running.load(Ordering::Acquire) {
                diagnostics::refresh_correlation();
                task();
                sleeper.sleep(interval);
            }
            state.store(SchedulerState::Stopped as u8, Ordering::SeqCst);
        }));

        self.state.store(SchedulerState::Started as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Marks the scheduler to stop after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Waits for the driver thread to exit. Callers stop first.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

impl Drop for SchedulerThread {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_the_task_on_its_cadence() {
        let executions = Arc::new(AtomicU32::new(0));
        let mut scheduler = SchedulerThread::new(Duration::from_millis(20));
        assert_eq!(scheduler.state(), SchedulerState::Created);

        {
            let executions = executions.clone();
            scheduler
                .start(move || {
                    executions.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert_eq!(scheduler.state(), SchedulerState::Started);

        thread::sleep(Duration::from_millis(150));
        scheduler.stop();
        scheduler.join();

        let count = executions.load(Ordering::SeqCst);
        assert!(count >= 3, "expected several executions, got {count}");
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        // No executions after the join.
        let settled = executions.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        assert_eq!(executions.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn double_start_is_rejected() {
        let mut scheduler = SchedulerThread::new(Duration::from_millis(10));
        scheduler.start(|| {}).unwrap();
        assert!(matches!(scheduler.start(|| {}), Err(SchedulerError::AlreadyStarted)));
        scheduler.stop();
        scheduler.join();
    }

    #[test]
    fn stop_does_not_interrupt_an_iteration() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut scheduler = SchedulerThread::new(Duration::from_millis(5));
        {
            let finished = finished.clone();
            scheduler
                .start(move || {
                    thread::sleep(Duration::from_millis(50));
                    finished.store(true, Ordering::SeqCst);
                })
                .unwrap();
        }
        // Stop mid-first-iteration; the iteration still completes.
        thread::sleep(Duration::from_millis(10));
        scheduler.stop();
        scheduler.join();
        assert!(finished.load(Ordering::SeqCst));
    }
}
