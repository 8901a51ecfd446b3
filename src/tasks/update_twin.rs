//! Update-twin task.
//! Consumes pushed twin payloads from the ingress queue, applies them to the
//! configuration store and acknowledges each one by writing the agent's
//! current configuration back as reported properties. A payload that fails
//! to parse is still acknowledged, so the service sees what the agent kept
//! running with.

use std::sync::Arc;

use log::{error, warn};

use crate::config::{Severity, TwinConfiguration, TwinError};
use crate::diagnostics::DiagnosticsSink;
use crate::hub::{HubSink, TwinUpdateState};
use crate::queueing::{QueueData, SyncQueue};

/// One pushed twin payload awaiting application.
#[derive(Debug, Clone)]
pub struct TwinUpdateItem {
    pub state: TwinUpdateState,
    pub payload: Vec<u8>,
}

impl QueueData for TwinUpdateItem {
    fn byte_size(&self) -> usize {
        self.payload.len()
    }
}

pub struct UpdateTwinTask {
    update_queue: Arc<SyncQueue<TwinUpdateItem>>,
    hub: Arc<dyn HubSink>,
    twin: Arc<TwinConfiguration>,
    diagnostics: DiagnosticsSink,
}

impl UpdateTwinTask {
    pub fn new(
        update_queue: Arc<SyncQueue<TwinUpdateItem>>,
        hub: Arc<dyn HubSink>,
        twin: Arc<TwinConfiguration>,
        diagnostics: DiagnosticsSink,
    ) -> Self {
        Self {
            update_queue,
            hub,
            twin,
            diagnostics,
        }
    }

    pub fn execute(&mut self) {
        while let Ok(item) = self.update_queue.pop_front() {
            let complete = item.state == TwinUpdateState::Complete;
            match self.twin.update(&item.payload, complete) {
                Ok(()) => {}
                Err(err @ TwinError::Parse(_)) => {
                    // Still acknowledge below: the reported properties tell
                    // the service which configuration stayed active.
                    warn!("twin update rejected: {err}");
                    self.diagnostics
                        .report(Severity::Error, &format!("twin update rejected: {err}"));
                }
                Err(err) => {
                    error!("twin update failed: {err}");
                    return;
                }
            }
            self.report_twin_state();
        }
    }

    fn report_twin_state(&self) {
        let serialized = match self.twin.serialized() {
            Ok(serialized) => serialized,
            Err(err) => {
                error!("cannot serialize the twin configuration: {err}");
                return;
            }
        };
        if !self.hub.set_reported_properties_async(&serialized) {
            warn!("could not push the reported properties to the hub");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LastUpdateResult;
    use crate::memory::MemoryMonitor;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct RecordingSink {
        reported: Mutex<Vec<Vec<u8>>>,
    }

    impl HubSink for RecordingSink {
        fn send_message_async(&self, _data: &[u8]) -> bool {
            true
        }
        fn set_reported_properties_async(&self, data: &[u8]) -> bool {
            self.reported.lock().push(data.to_vec());
            true
        }
    }

    struct Fixture {
        queue: Arc<SyncQueue<TwinUpdateItem>>,
        twin: Arc<TwinConfiguration>,
        sink: Arc<RecordingSink>,
        diagnostic_queue: Arc<SyncQueue<Vec<u8>>>,
    }

    fn fixture() -> (Fixture, UpdateTwinTask) {
        let twin = Arc::new(TwinConfiguration::new("agentConfiguration", BTreeMap::new()));
        let monitor = Arc::new(MemoryMonitor::new(twin.clone()));
        let queue = Arc::new(SyncQueue::new(monitor.clone(), true));
        let diagnostic_queue = Arc::new(SyncQueue::new(monitor, false));
        let sink = Arc::new(RecordingSink::default());
        let task = UpdateTwinTask::new(
            queue.clone(),
            sink.clone(),
            twin.clone(),
            DiagnosticsSink::new(diagnostic_queue.clone(), Severity::Warning),
        );
        (
            Fixture {
                queue,
                twin,
                sink,
                diagnostic_queue,
            },
            task,
        )
    }

    #[test]
    fn applies_updates_and_acknowledges_each() {
        let (f, mut task) = fixture();
        f.queue
            .push_back(TwinUpdateItem {
                state: TwinUpdateState::Complete,
                payload: br#"{ "desired": { "agentConfiguration": {
                    "maxMessageSizeInBytes": { "value": 4096 }
                } } }"#
                    .to_vec(),
            })
            .unwrap();
        f.queue
            .push_back(TwinUpdateItem {
                state: TwinUpdateState::Partial,
                payload: br#"{ "agentConfiguration": {
                    "maxLocalCacheSizeInBytes": { "value": 8192 }
                } }"#
                    .to_vec(),
            })
            .unwrap();

        task.execute();

        assert!(f.queue.is_empty());
        assert_eq!(f.twin.max_message_size(), 4096);
        assert_eq!(f.twin.max_local_cache_size(), 8192);

        let reported = f.sink.reported.lock();
        assert_eq!(reported.len(), 2);
        let last: Value = serde_json::from_slice(reported.last().unwrap()).unwrap();
        assert_eq!(
            last["agentConfiguration"]["maxLocalCacheSizeInBytes"]["value"],
            8192
        );
    }

    #[test]
    fn parse_failure_still_acknowledges_and_emits_a_diagnostic() {
        let (f, mut task) = fixture();
        f.queue
            .push_back(TwinUpdateItem {
                state: TwinUpdateState::Complete,
                payload: b"{ not json".to_vec(),
            })
            .unwrap();

        task.execute();

        assert_eq!(f.twin.last_update_data().last_update_result, LastUpdateResult::ParseError);
        // Acknowledged despite the failure.
        assert_eq!(f.sink.reported.lock().len(), 1);
        // And a diagnostic record was queued for the next monitor cycle.
        assert_eq!(f.diagnostic_queue.len(), 1);
    }

    #[test]
    fn idle_queue_means_no_acknowledgement() {
        let (f, mut task) = fixture();
        task.execute();
        assert!(f.sink.reported.lock().is_empty());
    }
}
