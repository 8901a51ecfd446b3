//! Agent-wide constants: identity, protocol defaults and cadence intervals.
//! Default values are the fallbacks the twin configuration starts from; the
//! hub may override the tunable ones at runtime.

/// Agent name, reported in diagnostics.
pub const AGENT_NAME: &str = "iotguard";

/// Agent version, stamped into every outbound envelope.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the outbound security-message schema.
pub const DEFAULT_MESSAGE_SCHEMA_VERSION: &str = "1.0";

/// Default cap on the memory accounted to queued events. 10 MiB.
pub const DEFAULT_MAX_LOCAL_CACHE_SIZE: u64 = 10 * 1024 * 1024;

/// Default cap on a single outbound message. 200 KiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 200 * 1024;

pub const MILLISECONDS_IN_A_MINUTE: u64 = 60 * 1000;
pub const MILLISECONDS_IN_AN_HOUR: u64 = 60 * MILLISECONDS_IN_A_MINUTE;

/// Default low-priority publish cadence. 5 hours.
pub const DEFAULT_LOW_PRIORITY_MESSAGE_FREQUENCY: u64 = 5 * MILLISECONDS_IN_AN_HOUR;

/// Default high-priority publish cadence. 7 minutes.
pub const DEFAULT_HIGH_PRIORITY_MESSAGE_FREQUENCY: u64 = 7 * MILLISECONDS_IN_A_MINUTE;

/// Default cadence for periodic snapshot collectors. 13 hours.
pub const DEFAULT_SNAPSHOT_FREQUENCY: u64 = 13 * MILLISECONDS_IN_AN_HOUR;

pub const DEFAULT_BASELINE_CUSTOM_CHECKS_ENABLED: bool = false;

/// Interval between executions of the monitor and publisher tasks.
pub const SCHEDULER_INTERVAL_MS: u64 = 1000;

/// Interval between executions of the twin-update task.
pub const TWIN_UPDATE_SCHEDULER_INTERVAL_MS: u64 = 10_000;

/// Poll step used while waiting for the hub connection to come up.
pub const CONNECT_POLL_INTERVAL_MS: u64 = 100;

/// Hub billing quantum. Messages below this size are metered as "small".
pub const MESSAGE_BILLING_MULTIPLE: u64 = 4 * 1024;

/// Default path of the local configuration file.
pub const CONFIGURATION_FILE: &str = "/etc/iotguard/LocalConfiguration.json";

pub const TCP_PROTOCOL: &str = "tcp";
pub const TCP6_PROTOCOL: &str = "tcp6";
pub const UDP_PROTOCOL: &str = "udp";
pub const UDP6_PROTOCOL: &str = "udp6";
pub const RAW_PROTOCOL: &str = "raw";
pub const RAW6_PROTOCOL: &str = "raw6";

/// Socket protocols scanned by the listening-ports collector, in report order.
pub const PROTOCOL_TYPES: [&str; 6] = [
    TCP_PROTOCOL,
    TCP6_PROTOCOL,
    UDP_PROTOCOL,
    UDP6_PROTOCOL,
    RAW_PROTOCOL,
    RAW6_PROTOCOL,
];
