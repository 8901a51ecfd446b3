//! Outbound security-event shells.
//! Collectors produce payload rows; this module wraps them in the envelope
//! the ingestion service expects. Field order is fixed by the serializer
//! struct so emitted documents are stable.

use chrono::{Local, Utc};
use serde::Serialize;
use serde_json::Value;

pub const EVENT_PAYLOAD_SCHEMA_VERSION: &str = "1.0";

/// How an event came to be: on a schedule or in response to host activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Triggered,
    Periodic,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triggered => "Triggered",
            Self::Periodic => "Periodic",
        }
    }
}

#[derive(Serialize)]
struct EventShell<'a> {
    #[serde(rename = "Category")]
    category: &'static str,
    #[serde(rename = "IsOperational")]
    is_operational: bool,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "PayloadSchemaVersion")]
    payload_schema_version: &'a str,
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "TimestampLocal")]
    timestamp_local: String,
    #[serde(rename = "TimestampUTC")]
    timestamp_utc: String,
    #[serde(rename = "Payload")]
    payload: Vec<Value>,
}

/// Serializes one event record ready for enqueueing.
pub fn build_event(
    name: &str,
    category: EventCategory,
    is_operational: bool,
    payload: Vec<Value>,
) -> Result<Vec<u8>, serde_json::Error> {
    let shell = EventShell {
        category: category.as_str(),
        is_operational,
        name,
        payload_schema_version: EVENT_PAYLOAD_SCHEMA_VERSION,
        id: random_event_id(),
        timestamp_local: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        timestamp_utc: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        payload,
    };
    serde_json::to_vec(&shell)
}

/// Random UUID-shaped event id.
pub fn random_event_id() -> String {
    let bits: u128 = rand::random();
    let hex = format!("{bits:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
