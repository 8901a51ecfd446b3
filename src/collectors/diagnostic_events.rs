//! Diagnostic-event collector.
//! Drains the diagnostic queue filled by [`DiagnosticsSink`] handles and
//! wraps each record in an operational event, one event per record.
//!
//! [`DiagnosticsSink`]: crate::diagnostics::DiagnosticsSink

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::events::{build_event, EventCategory};
use crate::queueing::SyncQueue;

use super::{CollectorError, EventCollector};

pub const DIAGNOSTIC_EVENT_NAME: &str = "Diagnostic";

pub struct DiagnosticEventCollector {
    queue: Arc<SyncQueue<Vec<u8>>>,
}

impl DiagnosticEventCollector {
    pub fn new(queue: Arc<SyncQueue<Vec<u8>>>) -> Self {
        Self { queue }
    }
}

impl EventCollector for DiagnosticEventCollector {
    fn event_name(&self) -> &'static str {
        DIAGNOSTIC_EVENT_NAME
    }

    fn category(&self) -> EventCategory {
        EventCategory::Triggered
    }

    fn is_operational(&self) -> bool {
        true
    }

    fn collect(&mut self) -> Result<Vec<Vec<u8>>, CollectorError> {
        let mut events = Vec::new();
        while let Ok(record) = self.queue.pop_front() {
            let row: Value = match serde_json::from_slice(&record) {
                Ok(row) => row,
                Err(err) => {
                    debug!("discarding broken diagnostic record: {err}");
                    continue;
                }
            };
            events.push(build_event(
                DIAGNOSTIC_EVENT_NAME,
                EventCategory::Triggered,
                true,
                vec![row],
            )?);
        }
        Ok(events)
    }
}
