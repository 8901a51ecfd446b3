//! Local (file-based) agent configuration.
//! Read once at startup from a JSON file. Everything the agent needs before
//! it has a hub connection lives here: credentials, identity, timeouts and
//! the name of the twin sub-object that carries the remote configuration.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;

/// Severity scale shared by the log sinks. Wire format is an integer 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug = 0,
    Information = 1,
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

impl Severity {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Debug),
            1 => Some(Self::Information),
            2 => Some(Self::Warning),
            3 => Some(Self::Error),
            4 => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    /// The `log` filter that admits exactly this severity and above.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Debug => log::LevelFilter::Debug,
            Self::Information => log::LevelFilter::Info,
            Self::Warning => log::LevelFilter::Warn,
            Self::Error | Self::Fatal => log::LevelFilter::Error,
        }
    }
}

#[derive(Debug, Error)]
pub enum LocalConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse configuration file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration carries neither a connection string nor DPS settings")]
    MissingCredentials,
    #[error("severity {0} is out of range (expected 0..=4)")]
    BadSeverity(u8),
}

/// Device-provisioning-service parameters, used instead of a static
/// connection string when the operator rotates credentials externally.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpsSettings {
    pub id_scope: String,
    pub registration_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalConfigFile {
    connection_string: Option<String>,
    dps: Option<DpsSettings>,
    agent_id: String,
    #[serde(default = "default_triggered_events_interval")]
    triggered_events_interval_ms: u64,
    #[serde(default = "default_connection_timeout")]
    connection_timeout_ms: u64,
    #[serde(default)]
    system_logger_minimum_severity: u8,
    #[serde(default = "default_diagnostic_severity")]
    diagnostic_event_minimum_severity: u8,
    remote_configuration_object_name: String,
}

fn default_triggered_events_interval() -> u64 {
    crate::consts::SCHEDULER_INTERVAL_MS
}

fn default_connection_timeout() -> u64 {
    30_000
}

fn default_diagnostic_severity() -> u8 {
    Severity::Warning as u8
}

#[derive(Debug)]
pub struct LocalConfiguration {
    path: Option<PathBuf>,
    agent_id: String,
    triggered_events_interval_ms: u64,
    connection_timeout_ms: u64,
    system_logger_minimum_severity: Severity,
    diagnostic_event_minimum_severity: Severity,
    remote_configuration_object_name: String,
    dps: Option<DpsSettings>,
    // Behind a mutex so a DPS renewal can swap it while the adapter holds
    // a shared reference.
    connection_string: Mutex<String>,
}

impl LocalConfiguration {
    pub fn load(path: &Path) -> Result<Self, LocalConfigError> {
        let text = fs::read_to_string(path).map_err(|source| LocalConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, Some(path.to_path_buf()))
    }

    pub fn parse(text: &str, path: Option<PathBuf>) -> Result<Self, LocalConfigError> {
        let file: LocalConfigFile = serde_json::from_str(text)?;

        let connection_string = match (&file.connection_string, &file.dps) {
            (Some(conn), _) => conn.clone(),
            // With DPS the initial connection string is derived from the
            // registration; renewals re-read the file the provisioning
            // service keeps current.
            (None, Some(dps)) => format!(
                "HostName={}.device.local;DeviceId={};SharedAccessKey=",
                dps.id_scope, dps.registration_id
            ),
            (None, None) => return Err(LocalConfigError::MissingCredentials),
        };

        Ok(Self {
            path,
            agent_id: file.agent_id,
            triggered_events_interval_ms: file.triggered_events_interval_ms,
            connection_timeout_ms: file.connection_timeout_ms,
            system_logger_minimum_severity: Severity::from_wire(file.system_logger_minimum_severity)
                .ok_or(LocalConfigError::BadSeverity(file.system_logger_minimum_severity))?,
            diagnostic_event_minimum_severity: Severity::from_wire(
                file.diagnostic_event_minimum_severity,
            )
            .ok_or(LocalConfigError::BadSeverity(file.diagnostic_event_minimum_severity))?,
            remote_configuration_object_name: file.remote_configuration_object_name,
            dps: file.dps,
            connection_string: Mutex::new(connection_string),
        })
    }

    pub fn connection_string(&self) -> String {
        self.connection_string.lock().clone()
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn triggered_events_interval_ms(&self) -> u64 {
        self.triggered_events_interval_ms
    }

    pub fn connection_timeout_ms(&self) -> u64 {
        self.connection_timeout_ms
    }

    pub fn system_logger_minimum_severity(&self) -> Severity {
        self.system_logger_minimum_severity
    }

    pub fn diagnostic_event_minimum_severity(&self) -> Severity {
        self.diagnostic_event_minimum_severity
    }

    pub fn remote_configuration_object_name(&self) -> &str {
        &self.remote_configuration_object_name
    }

    pub fn use_dps(&self) -> bool {
        self.dps.is_some()
    }

    /// Re-derives the connection string after a credential rotation. The
    /// provisioning service keeps the configuration file current, so a renewal
    /// is a re-read of the file.
    pub fn try_renew_connection_string(&self) -> bool {
        if !self.use_dps() {
            return false;
        }
        let Some(path) = &self.path else {
            return false;
        };
        match fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<LocalConfigFile>(&text).ok())
        {
            Some(file) => {
                if let Some(conn) = file.connection_string {
                    *self.connection_string.lock() = conn;
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "connectionString": "HostName=hub.local:7310;DeviceId=dev-1;SharedAccessKey=abc",
        "agentId": "7aaeef0e-614f-4ff2-97d2-1442186f73fa",
        "triggeredEventsIntervalMs": 1000,
        "connectionTimeoutMs": 5000,
        "systemLoggerMinimumSeverity": 0,
        "diagnosticEventMinimumSeverity": 3,
        "remoteConfigurationObjectName": "agentConfiguration"
    }"#;

    #[test]
    fn parses_a_full_file() {
        let config = LocalConfiguration::parse(CONFIG, None).unwrap();
        assert_eq!(config.agent_id(), "7aaeef0e-614f-4ff2-97d2-1442186f73fa");
        assert_eq!(config.connection_timeout_ms(), 5000);
        assert_eq!(config.triggered_events_interval_ms(), 1000);
        assert_eq!(config.system_logger_minimum_severity(), Severity::Debug);
        assert_eq!(config.diagnostic_event_minimum_severity(), Severity::Error);
        assert_eq!(config.remote_configuration_object_name(), "agentConfiguration");
        assert!(!config.use_dps());
        assert!(config.connection_string().starts_with("HostName=hub.local"));
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let config = LocalConfiguration::parse(
            r#"{
                "connectionString": "HostName=h;DeviceId=d;SharedAccessKey=k",
                "agentId": "id",
                "remoteConfigurationObjectName": "agentConfiguration"
            }"#,
            None,
        )
        .unwrap();
        assert_eq!(config.triggered_events_interval_ms(), 1000);
        assert_eq!(config.connection_timeout_ms(), 30_000);
        assert_eq!(config.diagnostic_event_minimum_severity(), Severity::Warning);
    }

    #[test]
    fn requires_some_credentials() {
        let err = LocalConfiguration::parse(
            r#"{ "agentId": "id", "remoteConfigurationObjectName": "x" }"#,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LocalConfigError::MissingCredentials));
    }

    #[test]
    fn rejects_out_of_range_severity() {
        let err = LocalConfiguration::parse(
            r#"{
                "connectionString": "c",
                "agentId": "id",
                "systemLoggerMinimumSeverity": 9,
                "remoteConfigurationObjectName": "x"
            }"#,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, LocalConfigError::BadSeverity(9)));
    }
}
