//! Event collectors.
//! A collector is a capability: it turns host or agent state into zero or
//! more serialized event records. The monitor task owns a vector of boxed
//! collectors picked at supervisor init; platform collectors that need
//! privileged audit sources live outside this crate and plug in through the
//! same trait.

pub mod config_errors;
pub mod diagnostic_events;
pub mod listening_ports;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::config::EventPriority;
use crate::events::EventCategory;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("collector serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub trait EventCollector: Send {
    /// Event name, also the key under which the twin configures routing.
    fn event_name(&self) -> &'static str;

    /// Periodic collectors are gated by the snapshot frequency; triggered
    /// ones run on every monitor tick.
    fn category(&self) -> EventCategory;

    /// Operational events bypass priority routing and always lead envelopes.
    fn is_operational(&self) -> bool {
        false
    }

    /// Routing used until (and unless) the twin overrides it.
    fn default_priority(&self) -> EventPriority {
        EventPriority::High
    }

    /// Produces serialized event records.
    fn collect(&mut self) -> Result<Vec<Vec<u8>>, CollectorError>;
}

/// Collector-defined priority defaults, seeded into the twin store at init.
pub fn default_priorities(collectors: &[Box<dyn EventCollector>]) -> BTreeMap<String, EventPriority> {
    collectors
        .iter()
        .filter(|collector| !collector.is_operational())
        .map(|collector| (collector.event_name().to_string(), collector.default_priority()))
        .collect()
}

pub use config_errors::ConfigurationErrorCollector;
pub use diagnostic_events::DiagnosticEventCollector;
pub use listening_ports::ListeningPortsCollector;
