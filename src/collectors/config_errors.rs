//! Configuration-error collector.
//! After every observed twin update this collector synthesizes one
//! operational event: when the update was read cleanly it validates the
//! active values (conflicts, sub-optimal sizes), otherwise it reports the
//! fields that could not be parsed, so the service can see what the agent
//! actually runs with.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::twin::{
    HIGH_PRIORITY_MESSAGE_FREQUENCY_KEY, LOW_PRIORITY_MESSAGE_FREQUENCY_KEY,
    MAX_LOCAL_CACHE_SIZE_KEY, MAX_MESSAGE_SIZE_KEY,
};
use crate::config::{LastUpdateResult, TwinBundleStatus, TwinConfiguration};
use crate::consts::MESSAGE_BILLING_MULTIPLE;
use crate::events::{build_event, EventCategory};

use super::{CollectorError, EventCollector};

pub const CONFIGURATION_ERROR_EVENT_NAME: &str = "ConfigurationError";

const CONFIGURATION_ERROR_NAME_KEY: &str = "ConfigurationName";
const CONFIGURATION_ERROR_USED_CONFIGURATION_KEY: &str = "UsedConfiguration";
const CONFIGURATION_ERROR_MESSAGE_KEY: &str = "Message";
const CONFIGURATION_ERROR_ERROR_KEY: &str = "Error";

const ERROR_TYPE_CONFLICT: &str = "Conflict";
const ERROR_TYPE_NOT_OPTIMAL: &str = "NotOptimal";
const ERROR_TYPE_TYPE_MISMATCH: &str = "TypeMismatch";

pub struct ConfigurationErrorCollector {
    twin: Arc<TwinConfiguration>,
    last_seen_update: Option<DateTime<Utc>>,
}

impl ConfigurationErrorCollector {
    pub fn new(twin: Arc<TwinConfiguration>) -> Self {
        Self {
            twin,
            last_seen_update: None,
        }
    }
}

fn payload_row(configuration_name: &str, error_type: &str, message: &str, used: &str) -> Value {
    json!({
        (CONFIGURATION_ERROR_NAME_KEY): configuration_name,
        (CONFIGURATION_ERROR_USED_CONFIGURATION_KEY): used,
        (CONFIGURATION_ERROR_MESSAGE_KEY): message,
        (CONFIGURATION_ERROR_ERROR_KEY): error_type,
    })
}

fn mismatched_field_names(status: &TwinBundleStatus) -> Vec<&'static str> {
    use crate::config::FieldStatus::TypeMismatch;
    let mut names = Vec::new();
    if status.max_local_cache_size == TypeMismatch {
        names.push(MAX_LOCAL_CACHE_SIZE_KEY);
    }
    if status.max_message_size == TypeMismatch {
        names.push(MAX_MESSAGE_SIZE_KEY);
    }
    if status.low_priority_message_frequency == TypeMismatch {
        names.push(LOW_PRIORITY_MESSAGE_FREQUENCY_KEY);
    }
    if status.high_priority_message_frequency == TypeMismatch {
        names.push(HIGH_PRIORITY_MESSAGE_FREQUENCY_KEY);
    }
    if status.snapshot_frequency == TypeMismatch {
        names.push(crate::config::twin::SNAPSHOT_FREQUENCY_KEY);
    }
    if status.baseline_custom_checks_enabled == TypeMismatch {
        names.push(crate::config::twin::BASELINE_CUSTOM_CHECKS_ENABLED_KEY);
    }
    if status.baseline_custom_checks_file_path == TypeMismatch {
        names.push(crate::config::twin::BASELINE_CUSTOM_CHECKS_FILE_PATH_KEY);
    }
    if status.baseline_custom_checks_file_hash == TypeMismatch {
        names.push(crate::config::twin::BASELINE_CUSTOM_CHECKS_FILE_HASH_KEY);
    }
    if status.event_priorities == TypeMismatch {
        names.push(crate::config::twin::EVENT_PRIORITY_KEY_PREFIX);
    }
    names
}

impl EventCollector for ConfigurationErrorCollector {
    fn event_name(&self) -> &'static str {
        CONFIGURATION_ERROR_EVENT_NAME
    }

    fn category(&self) -> EventCategory {
        EventCategory::Triggered
    }

    fn is_operational(&self) -> bool {
        true
    }

    fn collect(&mut self) -> Result<Vec<Vec<u8>>, CollectorError> {
        let data = self.twin.last_update_data();
        // Only speak up once per observed update.
        if data.last_update_time.is_none() || data.last_update_time == self.last_seen_update {
            return Ok(Vec::new());
        }
        self.last_seen_update = data.last_update_time;

        let mut rows = Vec::new();
        let mismatched = mismatched_field_names(&data.bundle_status);

        // A cleanly read update gets its applied values validated; an update
        // that could not be fully read is reported field by field instead.
        if data.last_update_result == LastUpdateResult::Ok && mismatched.is_empty() {
            let bundle = self.twin.snapshot();

            if bundle.max_local_cache_size < bundle.max_message_size {
                rows.push(payload_row(
                    MAX_LOCAL_CACHE_SIZE_KEY,
                    ERROR_TYPE_CONFLICT,
                    "maxLocalCacheSize is lower than maxMessageSize",
                    &bundle.max_local_cache_size.to_string(),
                ));
            }

            if bundle.max_message_size % MESSAGE_BILLING_MULTIPLE != 0 {
                rows.push(payload_row(
                    MAX_MESSAGE_SIZE_KEY,
                    ERROR_TYPE_NOT_OPTIMAL,
                    "maxMessageSize is not a multiple of the billing quantum",
                    &bundle.max_message_size.to_string(),
                ));
            }

            if bundle.high_priority_message_frequency > bundle.low_priority_message_frequency {
                rows.push(payload_row(
                    HIGH_PRIORITY_MESSAGE_FREQUENCY_KEY,
                    ERROR_TYPE_CONFLICT,
                    "highPriorityMessageFrequency is longer than lowPriorityMessageFrequency",
                    &bundle.high_priority_message_frequency.to_string(),
                ));
            }
        } else {
            let mut message = String::from("couldn't parse the following configurations: ");
            message.push_str(&mismatched.join(", "));
            let used = self
                .twin
                .serialized()
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .unwrap_or_default();
            rows.push(payload_row(
                "TwinConfiguration",
                ERROR_TYPE_TYPE_MISMATCH,
                &message,
                &used,
            ));
        }

        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let event = build_event(
            CONFIGURATION_ERROR_EVENT_NAME,
            EventCategory::Triggered,
            true,
            rows,
        )?;
        Ok(vec![event])
    }
}
