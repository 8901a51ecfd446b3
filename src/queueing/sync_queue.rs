//! Mutex wrapper around [`Queue`] for cross-thread producers and consumers.
//! Every operation holds the lock for its whole duration, so `pop_front_if`
//! tests exactly the head a subsequent `pop_front` would remove.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::memory::MemoryMonitor;
use crate::telemetry::{QueueCounter, SyncedCounter};

use super::queue::{PopError, PushError, Queue, QueueData};

pub struct SyncQueue<T: QueueData> {
    inner: Mutex<Queue<T>>,
}

impl<T: QueueData> SyncQueue<T> {
    pub fn new(monitor: Arc<MemoryMonitor>, emits_diagnostics: bool) -> Self {
        Self {
            inner: Mutex::new(Queue::new(monitor, emits_diagnostics)),
        }
    }

    pub fn push_back(&self, item: T) -> Result<(), PushError<T>> {
        self.inner.lock().push_back(item)
    }

    pub fn pop_front(&self) -> Result<T, PopError> {
        self.inner.lock().pop_front()
    }

    pub fn pop_front_if(&self, condition: impl FnOnce(&T) -> bool) -> Result<T, PopError> {
        self.inner.lock().pop_front_if(condition)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn counter(&self) -> Arc<SyncedCounter<QueueCounter>> {
        self.inner.lock().counter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TwinConfiguration;
    use std::collections::BTreeMap;
    use std::thread;

    fn sync_queue() -> Arc<SyncQueue<Vec<u8>>> {
        let twin = Arc::new(TwinConfiguration::new("agentConfiguration", BTreeMap::new()));
        let monitor = Arc::new(MemoryMonitor::new(twin));
        Arc::new(SyncQueue::new(monitor, false))
    }

    #[test]
    fn concurrent_producers_lose_nothing_under_budget() {
        let queue = sync_queue();

        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        queue
                            .push_back(format!("{worker}:{i}").into_bytes())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 1000);
        let data = queue.counter().snapshot_and_reset();
        assert_eq!(data.collected, 1000);
        assert_eq!(data.dropped, 0);

        let mut popped = 0;
        while queue.pop_front().is_ok() {
            popped += 1;
        }
        assert_eq!(popped, 1000);
    }

    #[test]
    fn pop_front_if_races_cleanly_with_producers() {
        let queue = sync_queue();
        for i in 0..100u32 {
            queue.push_back(i.to_be_bytes().to_vec()).unwrap();
        }

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut drained = 0;
                while drained < 100 {
                    match queue.pop_front_if(|head| head.len() == 4) {
                        Ok(_) => drained += 1,
                        Err(_) => thread::yield_now(),
                    }
                }
                drained
            })
        };
        assert_eq!(consumer.join().unwrap(), 100);
        assert!(queue.is_empty());
    }
}
