//! Twin configuration store.
//! The hub owns a "twin" document for every device; the slice of it under the
//! configured object name parameterizes the whole pipeline (cache budget,
//! message budget, cadences, collector priorities). Updates arrive as pushed
//! documents (complete) or patches (partial) and are applied atomically: a
//! reader never observes a half-applied update.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::config::duration::{format_iso8601_ms, parse_iso8601_ms};
use crate::consts;

pub const MAX_LOCAL_CACHE_SIZE_KEY: &str = "maxLocalCacheSizeInBytes";
pub const MAX_MESSAGE_SIZE_KEY: &str = "maxMessageSizeInBytes";
pub const LOW_PRIORITY_MESSAGE_FREQUENCY_KEY: &str = "lowPriorityMessageFrequency";
pub const HIGH_PRIORITY_MESSAGE_FREQUENCY_KEY: &str = "highPriorityMessageFrequency";
pub const SNAPSHOT_FREQUENCY_KEY: &str = "snapshotFrequency";
pub const BASELINE_CUSTOM_CHECKS_ENABLED_KEY: &str = "baselineCustomChecksEnabled";
pub const BASELINE_CUSTOM_CHECKS_FILE_PATH_KEY: &str = "baselineCustomChecksFilePath";
pub const BASELINE_CUSTOM_CHECKS_FILE_HASH_KEY: &str = "baselineCustomChecksFileHash";
pub const EVENT_PRIORITY_KEY_PREFIX: &str = "eventPriority";

/// Root key wrapping a complete twin document.
pub const DESIRED_PROPERTIES_KEY: &str = "desired";

/// Routing class of a collector's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPriority {
    High,
    Low,
    Off,
}

impl EventPriority {
    fn from_wire(text: &str) -> Option<Self> {
        match text {
            "High" => Some(Self::High),
            "Low" => Some(Self::Low),
            "Off" => Some(Self::Off),
            _ => None,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Low => "Low",
            Self::Off => "Off",
        }
    }
}

/// Outcome of the last typed read of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldStatus {
    #[default]
    Ok,
    TypeMismatch,
    Missing,
}

/// Per-field read status of the last applied update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TwinBundleStatus {
    pub max_local_cache_size: FieldStatus,
    pub max_message_size: FieldStatus,
    pub low_priority_message_frequency: FieldStatus,
    pub high_priority_message_frequency: FieldStatus,
    pub snapshot_frequency: FieldStatus,
    pub baseline_custom_checks_enabled: FieldStatus,
    pub baseline_custom_checks_file_path: FieldStatus,
    pub baseline_custom_checks_file_hash: FieldStatus,
    pub event_priorities: FieldStatus,
}

impl TwinBundleStatus {
    pub fn any_type_mismatch(&self) -> bool {
        [
            self.max_local_cache_size,
            self.max_message_size,
            self.low_priority_message_frequency,
            self.high_priority_message_frequency,
            self.snapshot_frequency,
            self.baseline_custom_checks_enabled,
            self.baseline_custom_checks_file_path,
            self.baseline_custom_checks_file_hash,
            self.event_priorities,
        ]
        .contains(&FieldStatus::TypeMismatch)
    }
}

/// Aggregate result of the last update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastUpdateResult {
    #[default]
    Ok,
    /// The pushed document was not valid JSON.
    ParseError,
    /// The document parsed but the configuration object had the wrong shape.
    Other,
}

/// The typed configuration slice, always fully populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinBundle {
    pub max_local_cache_size: u64,
    pub max_message_size: u64,
    /// Milliseconds between low-priority publishes.
    pub low_priority_message_frequency: u64,
    /// Milliseconds between high-priority publishes.
    pub high_priority_message_frequency: u64,
    /// Milliseconds between periodic collector snapshots.
    pub snapshot_frequency: u64,
    pub baseline_custom_checks_enabled: bool,
    pub baseline_custom_checks_file_path: Option<String>,
    pub baseline_custom_checks_file_hash: Option<String>,
    pub event_priorities: BTreeMap<String, EventPriority>,
}

impl TwinBundle {
    fn defaults(event_defaults: &BTreeMap<String, EventPriority>) -> Self {
        Self {
            max_local_cache_size: consts::DEFAULT_MAX_LOCAL_CACHE_SIZE,
            max_message_size: consts::DEFAULT_MAX_MESSAGE_SIZE,
            low_priority_message_frequency: consts::DEFAULT_LOW_PRIORITY_MESSAGE_FREQUENCY,
            high_priority_message_frequency: consts::DEFAULT_HIGH_PRIORITY_MESSAGE_FREQUENCY,
            snapshot_frequency: consts::DEFAULT_SNAPSHOT_FREQUENCY,
            baseline_custom_checks_enabled: consts::DEFAULT_BASELINE_CUSTOM_CHECKS_ENABLED,
            baseline_custom_checks_file_path: None,
            baseline_custom_checks_file_hash: None,
            event_priorities: event_defaults.clone(),
        }
    }
}

/// Snapshot returned by [`TwinConfiguration::last_update_data`].
#[derive(Debug, Clone, Copy)]
pub struct TwinUpdateData {
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_update_result: LastUpdateResult,
    pub bundle_status: TwinBundleStatus,
}

#[derive(Debug, Error)]
pub enum TwinError {
    #[error("malformed twin document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("twin entry {0:?} is not a JSON object")]
    NotAnObject(String),
}

struct TwinState {
    bundle: TwinBundle,
    status: TwinBundleStatus,
    last_update_time: Option<DateTime<Utc>>,
    last_update_result: LastUpdateResult,
}

pub struct TwinConfiguration {
    /// Name of the sub-object holding the agent configuration inside the twin.
    object_name: String,
    /// Collector-defined priority defaults, fixed at init.
    event_defaults: BTreeMap<String, EventPriority>,
    state: Mutex<TwinState>,
}

impl TwinConfiguration {
    pub fn new(object_name: &str, event_defaults: BTreeMap<String, EventPriority>) -> Self {
        let bundle = TwinBundle::defaults(&event_defaults);
        Self {
            object_name: object_name.to_string(),
            event_defaults,
            state: Mutex::new(TwinState {
                bundle,
                status: TwinBundleStatus::default(),
                last_update_time: None,
                last_update_result: LastUpdateResult::Ok,
            }),
        }
    }

    /// Applies a pushed twin payload.
    ///
    /// A complete payload is authoritative: recognized fields absent from it
    /// reset to their defaults. A partial payload touches only the fields it
    /// carries. A field that is present but of the wrong type keeps the value
    /// it would otherwise have had and is flagged `TypeMismatch` until a later
    /// update reads it successfully. The whole update is applied under one
    /// lock hold.
    pub fn update(&self, payload: &[u8], complete: bool) -> Result<(), TwinError> {
        let mut state = self.state.lock();
        state.last_update_time = Some(Utc::now());

        let doc: Value = match serde_json::from_slice(payload) {
            Ok(doc) => doc,
            Err(err) => {
                state.last_update_result = LastUpdateResult::ParseError;
                return Err(err.into());
            }
        };

        // Complete documents nest the configuration under the desired root;
        // partial patches carry it at the top level.
        let entry = if complete {
            doc.get(DESIRED_PROPERTIES_KEY)
                .and_then(|desired| desired.get(&self.object_name))
        } else {
            doc.get(&self.object_name)
        };
        let object: Option<&Map<String, Value>> = match entry {
            None => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                state.last_update_result = LastUpdateResult::Other;
                return Err(TwinError::NotAnObject(self.object_name.clone()));
            }
        };

        let mut staged = if complete {
            TwinBundle::defaults(&self.event_defaults)
        } else {
            state.bundle.clone()
        };
        let mut status = TwinBundleStatus::default();
        let empty = Map::new();
        let object = object.unwrap_or(&empty);

        status.max_local_cache_size =
            read_u64(object, MAX_LOCAL_CACHE_SIZE_KEY, &mut staged.max_local_cache_size);
        status.max_message_size =
            read_u64(object, MAX_MESSAGE_SIZE_KEY, &mut staged.max_message_size);
        status.low_priority_message_frequency = read_duration_ms(
            object,
            LOW_PRIORITY_MESSAGE_FREQUENCY_KEY,
            &mut staged.low_priority_message_frequency,
        );
        status.high_priority_message_frequency = read_duration_ms(
            object,
            HIGH_PRIORITY_MESSAGE_FREQUENCY_KEY,
            &mut staged.high_priority_message_frequency,
        );
        status.snapshot_frequency =
            read_duration_ms(object, SNAPSHOT_FREQUENCY_KEY, &mut staged.snapshot_frequency);
        status.baseline_custom_checks_enabled = read_bool(
            object,
            BASELINE_CUSTOM_CHECKS_ENABLED_KEY,
            &mut staged.baseline_custom_checks_enabled,
        );
        status.baseline_custom_checks_file_path = read_opt_string(
            object,
            BASELINE_CUSTOM_CHECKS_FILE_PATH_KEY,
            &mut staged.baseline_custom_checks_file_path,
        );
        status.baseline_custom_checks_file_hash = read_opt_string(
            object,
            BASELINE_CUSTOM_CHECKS_FILE_HASH_KEY,
            &mut staged.baseline_custom_checks_file_hash,
        );
        status.event_priorities =
            read_event_priorities(object, &self.event_defaults, &mut staged.event_priorities);

        state.bundle = staged;
        state.status = status;
        state.last_update_result = LastUpdateResult::Ok;
        Ok(())
    }

    pub fn max_local_cache_size(&self) -> u64 {
        self.state.lock().bundle.max_local_cache_size
    }

    pub fn max_message_size(&self) -> u64 {
        self.state.lock().bundle.max_message_size
    }

    pub fn low_priority_message_frequency(&self) -> u64 {
        self.state.lock().bundle.low_priority_message_frequency
    }

    pub fn high_priority_message_frequency(&self) -> u64 {
        self.state.lock().bundle.high_priority_message_frequency
    }

    pub fn snapshot_frequency(&self) -> u64 {
        self.state.lock().bundle.snapshot_frequency
    }

    pub fn baseline_custom_checks_enabled(&self) -> bool {
        self.state.lock().bundle.baseline_custom_checks_enabled
    }

    pub fn baseline_custom_checks_file_path(&self) -> Option<String> {
        self.state.lock().bundle.baseline_custom_checks_file_path.clone()
    }

    pub fn baseline_custom_checks_file_hash(&self) -> Option<String> {
        self.state.lock().bundle.baseline_custom_checks_file_hash.clone()
    }

    /// Routing priority for a collector's events. `None` for event names the
    /// store has never heard of; callers pick their own fallback.
    pub fn event_priority(&self, event_name: &str) -> Option<EventPriority> {
        self.state.lock().bundle.event_priorities.get(event_name).copied()
    }

    /// A full copy of the current configuration.
    pub fn snapshot(&self) -> TwinBundle {
        self.state.lock().bundle.clone()
    }

    pub fn last_update_data(&self) -> TwinUpdateData {
        let state = self.state.lock();
        TwinUpdateData {
            last_update_time: state.last_update_time,
            last_update_result: state.last_update_result,
            bundle_status: state.status,
        }
    }

    /// Re-serializes the current configuration in the wire shape, for the
    /// reported-properties acknowledgement.
    pub fn serialized(&self) -> Result<Vec<u8>, serde_json::Error> {
        let bundle = self.snapshot();
        let mut object = Map::new();
        object.insert(
            MAX_LOCAL_CACHE_SIZE_KEY.into(),
            json!({ "value": bundle.max_local_cache_size }),
        );
        object.insert(
            MAX_MESSAGE_SIZE_KEY.into(),
            json!({ "value": bundle.max_message_size }),
        );
        object.insert(
            LOW_PRIORITY_MESSAGE_FREQUENCY_KEY.into(),
            json!({ "value": format_iso8601_ms(bundle.low_priority_message_frequency) }),
        );
        object.insert(
            HIGH_PRIORITY_MESSAGE_FREQUENCY_KEY.into(),
            json!({ "value": format_iso8601_ms(bundle.high_priority_message_frequency) }),
        );
        object.insert(
            SNAPSHOT_FREQUENCY_KEY.into(),
            json!({ "value": format_iso8601_ms(bundle.snapshot_frequency) }),
        );
        object.insert(
            BASELINE_CUSTOM_CHECKS_ENABLED_KEY.into(),
            json!({ "value": bundle.baseline_custom_checks_enabled }),
        );
        object.insert(
            BASELINE_CUSTOM_CHECKS_FILE_PATH_KEY.into(),
            json!({ "value": bundle.baseline_custom_checks_file_path }),
        );
        object.insert(
            BASELINE_CUSTOM_CHECKS_FILE_HASH_KEY.into(),
            json!({ "value": bundle.baseline_custom_checks_file_hash }),
        );
        for (event, priority) in &bundle.event_priorities {
            object.insert(
                format!("{EVENT_PRIORITY_KEY_PREFIX}{event}"),
                json!({ "value": priority.as_wire() }),
            );
        }

        let mut document = Map::new();
        document.insert(self.object_name.clone(), Value::Object(object));
        serde_json::to_vec(&Value::Object(document))
    }
}

fn wire_value<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).map(|entry| entry.get("value").unwrap_or(entry))
}

fn read_u64(object: &Map<String, Value>, key: &str, slot: &mut u64) -> FieldStatus {
    match wire_value(object, key) {
        None => FieldStatus::Missing,
        Some(value) => match value.as_u64() {
            Some(parsed) => {
                *slot = parsed;
                FieldStatus::Ok
            }
            None => FieldStatus::TypeMismatch,
        },
    }
}

fn read_duration_ms(object: &Map<String, Value>, key: &str, slot: &mut u64) -> FieldStatus {
    match wire_value(object, key) {
        None => FieldStatus::Missing,
        Some(value) => match value.as_str().and_then(|text| parse_iso8601_ms(text).ok()) {
            Some(ms) => {
                *slot = ms;
                FieldStatus::Ok
            }
            None => FieldStatus::TypeMismatch,
        },
    }
}

fn read_bool(object: &Map<String, Value>, key: &str, slot: &mut bool) -> FieldStatus {
    match wire_value(object, key) {
        None => FieldStatus::Missing,
        Some(value) => match value.as_bool() {
            Some(parsed) => {
                *slot = parsed;
                FieldStatus::Ok
            }
            None => FieldStatus::TypeMismatch,
        },
    }
}

fn read_opt_string(
    object: &Map<String, Value>,
    key: &str,
    slot: &mut Option<String>,
) -> FieldStatus {
    match wire_value(object, key) {
        None => FieldStatus::Missing,
        Some(Value::Null) => {
            *slot = None;
            FieldStatus::Ok
        }
        Some(value) => match value.as_str() {
            Some(text) => {
                *slot = Some(text.to_string());
                FieldStatus::Ok
            }
            None => FieldStatus::TypeMismatch,
        },
    }
}

fn read_event_priorities(
    object: &Map<String, Value>,
    known_events: &BTreeMap<String, EventPriority>,
    slots: &mut BTreeMap<String, EventPriority>,
) -> FieldStatus {
    let mut seen_any = false;
    let mut mismatch = false;
    for event in known_events.keys() {
        let key = format!("{EVENT_PRIORITY_KEY_PREFIX}{event}");
        match wire_value(object, &key) {
            None => {}
            Some(value) => {
                seen_any = true;
                match value.as_str().and_then(EventPriority::from_wire) {
                    Some(priority) => {
                        slots.insert(event.clone(), priority);
                    }
                    None => mismatch = true,
                }
            }
        }
    }
    if mismatch {
        FieldStatus::TypeMismatch
    } else if seen_any {
        FieldStatus::Ok
    } else {
        FieldStatus::Missing
    }
}
