//! # iotguard
//!
//! Device-side security telemetry agent. Collectors turn host state into
//! serialized events, bounded-memory priority queues buffer them, and
//! scheduler-driven tasks batch and deliver them to a remote ingestion hub
//! as structured envelopes. A remotely-pushed "twin" document reconfigures
//! the pipeline at runtime.
//!
//! ## Architecture
//! - **Collectors** (triggered, periodic, operational) feed the queues.
//! - **Queues** charge every item against one process-wide byte budget; the
//!   budget refuses items once the twin's cache limit is reached.
//! - **Publisher** drains the queues into envelopes on twin-configured
//!   cadences, with memory pressure forcing early drains.
//! - **Hub adapter** owns the connect/authenticate/twin/send state machine
//!   over a narrow transport seam.
//! - **Supervisor** wires everything, starts the worker threads and unwinds
//!   them in reverse on stop.

pub mod agent;
pub mod collectors;
pub mod config;
pub mod consts;
pub mod diagnostics;
pub mod events;
pub mod hub;
pub mod memory;
pub mod message;
pub mod os;
pub mod queueing;
pub mod scheduling;
pub mod tasks;
pub mod telemetry;

pub use agent::{AgentError, SecurityAgent};
