//! Event-publisher task.
//! Decides every tick whether an envelope is due: memory pressure drains the
//! high-priority path immediately, otherwise each priority publishes on its
//! own cadence. The opposite queue rides along as padding so an envelope is
//! filled up to the byte budget without waiting for the other cadence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::config::TwinConfiguration;
use crate::hub::HubSink;
use crate::memory::MemoryMonitor;
use crate::message::{create_security_message, SerializedMessage};
use crate::queueing::SyncQueue;

pub struct EventPublisherTask {
    operational_queue: Arc<SyncQueue<Vec<u8>>>,
    high_priority_queue: Arc<SyncQueue<Vec<u8>>>,
    low_priority_queue: Arc<SyncQueue<Vec<u8>>>,
    hub: Arc<dyn HubSink>,
    twin: Arc<TwinConfiguration>,
    monitor: Arc<MemoryMonitor>,
    agent_id: String,
    last_high_priority_dispatch: Instant,
    last_low_priority_dispatch: Instant,
}

impl EventPublisherTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operational_queue: Arc<SyncQueue<Vec<u8>>>,
        high_priority_queue: Arc<SyncQueue<Vec<u8>>>,
        low_priority_queue: Arc<SyncQueue<Vec<u8>>>,
        hub: Arc<dyn HubSink>,
        twin: Arc<TwinConfiguration>,
        monitor: Arc<MemoryMonitor>,
        agent_id: String,
    ) -> Self {
        let now = Instant::now();
        Self {
            operational_queue,
            high_priority_queue,
            low_priority_queue,
            hub,
            twin,
            monitor,
            agent_id,
            last_high_priority_dispatch: now,
            last_low_priority_dispatch: now,
        }
    }

    pub fn execute(&mut self) {
        let high_frequency = Duration::from_millis(self.twin.high_priority_message_frequency());
        let low_frequency = Duration::from_millis(self.twin.low_priority_message_frequency());
        let max_message_size = self.twin.max_message_size();
        let current_memory = self.monitor.current_consumption();
        let now = Instant::now();

        // Queued bytes already exceed one message: drain through the
        // high-priority path now rather than wait out the cadence.
        if current_memory > max_message_size {
            self.dispatch(&self.high_priority_queue, &self.low_priority_queue);
            self.last_high_priority_dispatch = now;
        }

        if now.duration_since(self.last_high_priority_dispatch) > high_frequency {
            self.dispatch(&self.high_priority_queue, &self.low_priority_queue);
            self.last_high_priority_dispatch = now;
        }

        if now.duration_since(self.last_low_priority_dispatch) > low_frequency {
            self.dispatch(&self.low_priority_queue, &self.high_priority_queue);
            self.last_low_priority_dispatch = now;
        }
    }

    fn dispatch(&self, main: &SyncQueue<Vec<u8>>, padding: &SyncQueue<Vec<u8>>) {
        // No empty sends: a cadence with nothing in its own bucket waits.
        if main.is_empty() {
            return;
        }

        let queues = [&*self.operational_queue, main, padding];
        match create_security_message(&queues, &self.twin, &self.agent_id) {
            Ok(SerializedMessage::Complete(bytes)) | Ok(SerializedMessage::Partial(bytes)) => {
                if !self.hub.send_message_async(&bytes) {
                    error!("error sending a message to the hub");
                }
            }
            Ok(SerializedMessage::Empty) => debug!("serializer produced nothing to send"),
            Err(err) => error!("message serialization failed: {err}"),
        }
    }
}
