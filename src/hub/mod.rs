//! Hub delivery: the transport seam and the adapter state machine above it.

pub mod adapter;
pub mod transport;

pub use adapter::{ConnectError, HubAdapter, HubSink};
pub use transport::{
    ConnectionReason, HubEventHandler, HubTransport, SendConfirmation, TcpHubClient,
    TransportError, TwinUpdateState,
};
