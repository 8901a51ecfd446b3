//! Builds one outbound envelope from an ordered set of event queues.
//! Queues are drained in the order given, under the twin's byte budget. The
//! conditional pop is what keeps an oversized head item queued instead of
//! truncating it mid-message: it stays for a later dispatch, where the budget
//! may be higher or an operator will notice the stuck head.

use log::error;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::TwinConfiguration;
use crate::consts::{AGENT_VERSION, DEFAULT_MESSAGE_SCHEMA_VERSION};
use crate::queueing::{PopError, SyncQueue};

/// Serialization outcome. `Partial` means some queue produced a broken record
/// along the way but the envelope still carries everything that fit.
#[derive(Debug)]
pub enum SerializedMessage {
    Complete(Vec<u8>),
    Partial(Vec<u8>),
    /// Nothing was serialized; there is no message to send.
    Empty,
}

impl SerializedMessage {
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Self::Complete(bytes) | Self::Partial(bytes) => Some(bytes),
            Self::Empty => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("cannot serialize security message: {0}")]
    Envelope(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SecurityMessage<'a> {
    #[serde(rename = "AgentVersion")]
    agent_version: &'a str,
    #[serde(rename = "AgentId")]
    agent_id: &'a str,
    #[serde(rename = "MessageSchemaVersion")]
    message_schema_version: &'a str,
    #[serde(rename = "Events")]
    events: Vec<Value>,
}

/// Drains `queues` in order into one envelope, keeping the total event bytes
/// under the twin's `maxMessageSize`. By convention the first queue is the
/// operational-events queue.
pub fn create_security_message(
    queues: &[&SyncQueue<Vec<u8>>],
    twin: &TwinConfiguration,
    agent_id: &str,
) -> Result<SerializedMessage, SerializerError> {
    let max_message_size = twin.max_message_size();
    let mut current_size: u64 = 0;
    let mut events: Vec<Value> = Vec::new();
    let mut partial = false;

    for queue in queues {
        while current_size < max_message_size {
            let popped =
                queue.pop_front_if(|head| current_size + (head.len() as u64) < max_message_size);
            match popped {
                Ok(record) => match serde_json::from_slice::<Value>(&record) {
                    Ok(event) => {
                        current_size += record.len() as u64;
                        events.push(event);
                    }
                    Err(err) => {
                        // The broken record is already off the queue; drop it
                        // and move on to the next queue.
                        error!("event record is not valid JSON, discarding: {err}");
                        partial = true;
                        break;
                    }
                },
                Err(PopError::Empty) | Err(PopError::ConditionFailed) => break,
            }
        }
    }

    if events.is_empty() {
        return Ok(SerializedMessage::Empty);
    }

    let message = SecurityMessage {
        agent_version: AGENT_VERSION,
        agent_id,
        message_schema_version: DEFAULT_MESSAGE_SCHEMA_VERSION,
        events,
    };
    let bytes = serde_json::to_vec(&message)?;
    Ok(if partial {
        SerializedMessage::Partial(bytes)
    } else {
        SerializedMessage::Complete(bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMonitor;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct Fixture {
        twin: Arc<TwinConfiguration>,
        operational: Arc<SyncQueue<Vec<u8>>>,
        high: Arc<SyncQueue<Vec<u8>>>,
        low: Arc<SyncQueue<Vec<u8>>>,
    }

    fn fixture(max_message_size: u64) -> Fixture {
        let twin = Arc::new(TwinConfiguration::new("agentConfiguration", BTreeMap::new()));
        let doc = format!(
            r#"{{ "desired": {{ "agentConfiguration": {{
                "maxMessageSizeInBytes": {{ "value": {max_message_size} }}
            }} }} }}"#
        );
        twin.update(doc.as_bytes(), true).unwrap();
        let monitor = Arc::new(MemoryMonitor::new(twin.clone()));
        Fixture {
            twin,
            operational: Arc::new(SyncQueue::new(monitor.clone(), true)),
            high: Arc::new(SyncQueue::new(monitor.clone(), true)),
            low: Arc::new(SyncQueue::new(monitor, true)),
        }
    }

    fn record(name: &str, index: u32) -> Vec<u8> {
        serde_json::to_vec(&json!({ "Name": name, "Index": index })).unwrap()
    }

    fn names(bytes: &[u8]) -> Vec<String> {
        let message: Value = serde_json::from_slice(bytes).unwrap();
        message["Events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|event| event["Name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn empty_queues_produce_no_message() {
        let f = fixture(1 << 20);
        let result = create_security_message(
            &[&f.operational, &f.high, &f.low],
            &f.twin,
            "agent-1",
        )
        .unwrap();
        assert!(matches!(result, SerializedMessage::Empty));
    }

    #[test]
    fn queues_drain_in_order_and_envelope_is_stamped() {
        let f = fixture(1 << 20);
        f.low.push_back(record("low", 0)).unwrap();
        f.high.push_back(record("high", 0)).unwrap();
        f.high.push_back(record("high", 1)).unwrap();
        f.operational.push_back(record("op", 0)).unwrap();

        let bytes = create_security_message(
            &[&f.operational, &f.high, &f.low],
            &f.twin,
            "7aaeef0e-614f-4ff2-97d2-1442186f73fa",
        )
        .unwrap()
        .into_bytes()
        .unwrap();

        let message: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(message["AgentVersion"], AGENT_VERSION);
        assert_eq!(message["AgentId"], "7aaeef0e-614f-4ff2-97d2-1442186f73fa");
        assert_eq!(message["MessageSchemaVersion"], "1.0");
        assert_eq!(names(&bytes), ["op", "high", "high", "low"]);
    }

    #[test]
    fn budget_stops_the_drain_and_keeps_the_head() {
        let f = fixture(100);
        let small = record("small", 0); // well under 100 bytes
        let big = serde_json::to_vec(&json!({
            "Name": "big",
            "Filler": "x".repeat(200),
        }))
        .unwrap();

        f.high.push_back(small).unwrap();
        f.high.push_back(big).unwrap();
        f.high.push_back(record("small", 1)).unwrap();

        let result =
            create_security_message(&[&f.operational, &f.high, &f.low], &f.twin, "a").unwrap();
        let bytes = result.into_bytes().unwrap();

        // The oversized record blocks its queue; nothing behind it is taken
        // and it stays queued for a later dispatch.
        assert_eq!(names(&bytes), ["small"]);
        assert_eq!(f.high.len(), 2);
    }

    #[test]
    fn an_item_larger_than_the_budget_is_never_lost() {
        let f = fixture(50);
        let big = serde_json::to_vec(&json!({ "Name": "big", "Filler": "x".repeat(80) })).unwrap();
        f.high.push_back(big).unwrap();

        let result =
            create_security_message(&[&f.operational, &f.high, &f.low], &f.twin, "a").unwrap();
        assert!(matches!(result, SerializedMessage::Empty));
        assert_eq!(f.high.len(), 1);
    }

    #[test]
    fn broken_record_degrades_to_partial() {
        let f = fixture(1 << 20);
        f.high.push_back(b"not json at all".to_vec()).unwrap();
        f.high.push_back(record("high", 0)).unwrap();
        f.low.push_back(record("low", 0)).unwrap();

        let result =
            create_security_message(&[&f.operational, &f.high, &f.low], &f.twin, "a").unwrap();
        match result {
            SerializedMessage::Partial(bytes) => {
                // The broken record is discarded and its queue abandoned for
                // this round; later queues still contribute.
                assert_eq!(names(&bytes), ["low"]);
                assert_eq!(f.high.len(), 1);
            }
            other => panic!("expected partial message, got {other:?}"),
        }
    }
}
