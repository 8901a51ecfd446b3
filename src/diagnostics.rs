//! Diagnostic event plumbing.
//! Pipeline components report notable conditions here; records above the
//! configured severity land in the diagnostic queue as serialized payload
//! rows, and a collector later folds them into operational events. A full
//! queue drops the record rather than block the reporting thread.

use std::cell::RefCell;
use std::sync::Arc;

use chrono::Utc;
use log::debug;
use serde_json::json;

use crate::config::Severity;
use crate::queueing::{PushError, SyncQueue};

thread_local! {
    static CORRELATION_ID: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Draws a fresh correlation id for this thread. Scheduler threads call this
/// once per cycle so every record of one task execution shares an id.
pub fn refresh_correlation() {
    CORRELATION_ID.with(|slot| {
        *slot.borrow_mut() = Some(crate::events::random_event_id());
    });
}

/// The current thread's correlation id, drawing one on first use.
pub fn current_correlation() -> String {
    CORRELATION_ID.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.get_or_insert_with(crate::events::random_event_id).clone()
    })
}

/// Cloneable handle for reporting diagnostic records.
#[derive(Clone)]
pub struct DiagnosticsSink {
    queue: Arc<SyncQueue<Vec<u8>>>,
    minimum_severity: Severity,
}

impl DiagnosticsSink {
    pub fn new(queue: Arc<SyncQueue<Vec<u8>>>, minimum_severity: Severity) -> Self {
        Self {
            queue,
            minimum_severity,
        }
    }

    /// Queues one diagnostic record. Records below the configured severity
    /// are discarded; a refused enqueue is dropped silently.
    pub fn report(&self, severity: Severity, message: &str) {
        if severity < self.minimum_severity {
            return;
        }

        let row = json!({
            "Message": message,
            "Severity": severity.as_str(),
            "ProcessId": std::process::id(),
            "TimestampUTC": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "CorrelationId": current_correlation(),
        });
        let record = match serde_json::to_vec(&row) {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        if let Err(PushError::MemoryExceeded(_)) = self.queue.push_back(record) {
            debug!("diagnostic record dropped, cache limit reached");
        }
    }
}
