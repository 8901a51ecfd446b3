//! Event-monitor task.
//! Runs every tick: invokes the configured collectors and routes their
//! events into the queue chosen by the twin's priority mapping. Periodic
//! collectors take their first snapshot immediately and are then gated by
//! the snapshot frequency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::collectors::EventCollector;
use crate::config::{EventPriority, TwinConfiguration};
use crate::events::EventCategory;
use crate::queueing::{PushError, SyncQueue};

struct CollectorSlot {
    collector: Box<dyn EventCollector>,
    last_snapshot: Option<Instant>,
}

pub struct EventMonitorTask {
    collectors: Vec<CollectorSlot>,
    operational_queue: Arc<SyncQueue<Vec<u8>>>,
    high_priority_queue: Arc<SyncQueue<Vec<u8>>>,
    low_priority_queue: Arc<SyncQueue<Vec<u8>>>,
    twin: Arc<TwinConfiguration>,
}

impl EventMonitorTask {
    pub fn new(
        collectors: Vec<Box<dyn EventCollector>>,
        operational_queue: Arc<SyncQueue<Vec<u8>>>,
        high_priority_queue: Arc<SyncQueue<Vec<u8>>>,
        low_priority_queue: Arc<SyncQueue<Vec<u8>>>,
        twin: Arc<TwinConfiguration>,
    ) -> Self {
        Self {
            collectors: collectors
                .into_iter()
                .map(|collector| CollectorSlot {
                    collector,
                    last_snapshot: None,
                })
                .collect(),
            operational_queue,
            high_priority_queue,
            low_priority_queue,
            twin,
        }
    }

    pub fn execute(&mut self) {
        let snapshot_frequency = Duration::from_millis(self.twin.snapshot_frequency());

        for slot in &mut self.collectors {
            if slot.collector.category() == EventCategory::Periodic {
                if let Some(last) = slot.last_snapshot {
                    if last.elapsed() < snapshot_frequency {
                        continue;
                    }
                }
            }

            let events = match slot.collector.collect() {
                Ok(events) => events,
                Err(err) => {
                    error!("collector {} failed: {err}", slot.collector.event_name());
                    continue;
                }
            };
            if slot.collector.category() == EventCategory::Periodic {
                slot.last_snapshot = Some(Instant::now());
            }

            let queue = if slot.collector.is_operational() {
                &self.operational_queue
            } else {
                let priority = self
                    .twin
                    .event_priority(slot.collector.event_name())
                    .unwrap_or_else(|| slot.collector.default_priority());
                match priority {
                    EventPriority::High => &self.high_priority_queue,
                    EventPriority::Low => &self.low_priority_queue,
                    EventPriority::Off => continue,
                }
            };

            for event in events {
                if let Err(PushError::MemoryExceeded(_)) = queue.push_back(event) {
                    // The queue counter already metered the drop.
                    debug!(
                        "event from {} rejected by the cache budget",
                        slot.collector.event_name()
                    );
                }
            }
        }
    }
}
