//! Telemetry provider: the external face of the agent's own meters.
//! Owns nothing; holds shared handles to the counters wired up by the
//! supervisor at init and handed back to whoever scrapes diagnostics.

use std::sync::Arc;

use super::counters::{MessageCounter, QueueCounter, SyncedCounter};

/// Which metered event queue a caller wants to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMeter {
    HighPriority,
    LowPriority,
}

pub struct TelemetryProvider {
    low_priority_queue: Arc<SyncedCounter<QueueCounter>>,
    high_priority_queue: Arc<SyncedCounter<QueueCounter>>,
    hub_messages: Arc<SyncedCounter<MessageCounter>>,
}

impl TelemetryProvider {
    pub fn new(
        low_priority_queue: Arc<SyncedCounter<QueueCounter>>,
        high_priority_queue: Arc<SyncedCounter<QueueCounter>>,
        hub_messages: Arc<SyncedCounter<MessageCounter>>,
    ) -> Self {
        Self {
            low_priority_queue,
            high_priority_queue,
            hub_messages,
        }
    }

    /// Drains the requested queue meter. Consecutive reads never overlap.
    pub fn queue_counter(&self, meter: QueueMeter) -> QueueCounter {
        match meter {
            QueueMeter::HighPriority => self.high_priority_queue.snapshot_and_reset(),
            QueueMeter::LowPriority => self.low_priority_queue.snapshot_and_reset(),
        }
    }

    /// Drains the hub message meter.
    pub fn message_counter(&self) -> MessageCounter {
        self.hub_messages.snapshot_and_reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reads_the_right_meter() {
        let low = Arc::new(SyncedCounter::new());
        let high = Arc::new(SyncedCounter::new());
        let hub = Arc::new(SyncedCounter::new());

        low.increase_by(|c: &mut QueueCounter| &mut c.collected, 2);
        high.increase_by(|c: &mut QueueCounter| &mut c.collected, 7);
        hub.increase_by(|c: &mut MessageCounter| &mut c.sent_messages, 1);

        let provider = TelemetryProvider::new(low.clone(), high.clone(), hub.clone());

        assert_eq!(provider.queue_counter(QueueMeter::HighPriority).collected, 7);
        assert_eq!(provider.queue_counter(QueueMeter::LowPriority).collected, 2);
        assert_eq!(provider.message_counter().sent_messages, 1);

        // Snapshots reset the shared counters, not copies of them.
        assert_eq!(high.peek(), QueueCounter::default());
        assert_eq!(hub.peek(), MessageCounter::default());
    }
}
