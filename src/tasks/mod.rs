//! The three periodic pipeline tasks driven by scheduler threads.

pub mod event_monitor;
pub mod event_publisher;
pub mod update_twin;

pub use event_monitor::EventMonitorTask;
pub use event_publisher::EventPublisherTask;
pub use update_twin::{TwinUpdateItem, UpdateTwinTask};
