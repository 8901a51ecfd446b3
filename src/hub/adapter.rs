//! Hub adapter: the state machine between the pipeline and the transport.
//! Owns the connected / has-twin flags, the message meter and the twin
//! ingress path. Init, shutdown and sends serialize on the adapter lock;
//! transport callbacks run concurrently on transport-owned threads and only
//! touch the shared flag block and its sub-locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::LocalConfiguration;
use crate::consts::{CONNECT_POLL_INTERVAL_MS, MESSAGE_BILLING_MULTIPLE};
use crate::queueing::{PushError, SyncQueue};
use crate::tasks::update_twin::TwinUpdateItem;
use crate::telemetry::{MessageCounter, SyncedCounter};

use super::transport::{
    ConnectionReason, HubEventHandler, HubTransport, SendConfirmation, TransportError,
    TwinUpdateState,
};

/// Why a connect attempt gave up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("could not connect to the hub within the timeout period")]
    Timeout,
    #[error("connected, but no remote configuration arrived within the timeout period")]
    ConfigurationTimeout,
    #[error("the hub rejected the agent's credentials")]
    BadCredential,
    #[error("no network route to the hub")]
    NoNetwork,
}

/// The outbound surface tasks depend on. Kept narrow so task tests can
/// substitute a recording sink.
pub trait HubSink: Send + Sync {
    fn send_message_async(&self, data: &[u8]) -> bool;
    fn set_reported_properties_async(&self, data: &[u8]) -> bool;
}

/// Flag block shared between the adapter and the transport callbacks.
struct AdapterShared {
    connected: AtomicBool,
    has_twin_configuration: AtomicBool,
    last_connection_reason: Mutex<ConnectionReason>,
    twin_updates: Arc<SyncQueue<TwinUpdateItem>>,
    message_counter: Arc<SyncedCounter<MessageCounter>>,
}

impl HubEventHandler for AdapterShared {
    fn connection_status(&self, connected: bool, reason: ConnectionReason) {
        *self.last_connection_reason.lock() = reason;
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if connected && !was_connected {
            info!("hub client connected");
        } else if !connected && was_connected {
            info!("hub client disconnected ({reason:?})");
        }
    }

    fn twin_update(&self, state: TwinUpdateState, payload: &[u8]) {
        debug!("twin update received ({state:?}, {} bytes)", payload.len());
        let item = TwinUpdateItem {
            state,
            payload: payload.to_vec(),
        };
        match self.twin_updates.push_back(item) {
            Ok(()) => {
                self.has_twin_configuration.store(true, Ordering::SeqCst);
            }
            Err(PushError::MemoryExceeded(_)) => {
                error!("twin update dropped, cache limit reached");
            }
        }
    }

    fn send_confirm(&self, result: SendConfirmation) {
        if result != SendConfirmation::Ok {
            self.message_counter.increase_by(|c| &mut c.failed_messages, 1);
        }
    }
}

pub struct HubAdapter {
    shared: Arc<AdapterShared>,
    transport: Box<dyn HubTransport>,
    local: Arc<LocalConfiguration>,
    // Serializes init, shutdown and sends against each other.
    lock: Mutex<()>,
    initiated: AtomicBool,
}

impl HubAdapter {
    /// Builds the adapter and starts the transport. On failure the transport
    /// is quiesced before the error is handed back.
    pub fn init(
        transport: Box<dyn HubTransport>,
        twin_updates: Arc<SyncQueue<TwinUpdateItem>>,
        local: Arc<LocalConfiguration>,
    ) -> Result<Arc<Self>, TransportError> {
        let shared = Arc::new(AdapterShared {
            connected: AtomicBool::new(false),
            has_twin_configuration: AtomicBool::new(false),
            last_connection_reason: Mutex::new(ConnectionReason::Ok),
            twin_updates,
            message_counter: Arc::new(SyncedCounter::new()),
        });

        let adapter = Arc::new(Self {
            shared: shared.clone(),
            transport,
            local,
            lock: Mutex::new(()),
            initiated: AtomicBool::new(false),
        });

        let _guard = adapter.lock.lock();
        if let Err(err) = adapter.transport.start(shared) {
            adapter.transport.shutdown();
            return Err(err);
        }
        adapter.initiated.store(true, Ordering::SeqCst);
        drop(_guard);
        Ok(adapter)
    }

    /// Waits for the transport to report both an authenticated connection and
    /// an initial twin document, polling every 100 ms up to the configured
    /// connection timeout. Permanent failure reasons cut the wait short.
    pub fn connect(&self) -> Result<(), ConnectError> {
        let timeout = Duration::from_millis(self.local.connection_timeout_ms());
        let poll = Duration::from_millis(CONNECT_POLL_INTERVAL_MS);
        let started = Instant::now();

        loop {
            let connected = self.shared.connected.load(Ordering::SeqCst);
            let has_twin = self.shared.has_twin_configuration.load(Ordering::SeqCst);
            if connected && has_twin {
                return Ok(());
            }
            if !connected {
                match *self.shared.last_connection_reason.lock() {
                    ConnectionReason::BadCredential => {
                        error!("connect failed: credentials rejected, check the authentication configuration");
                        return Err(ConnectError::BadCredential);
                    }
                    ConnectionReason::NoNetwork => {
                        error!("connect failed: no network");
                        return Err(ConnectError::NoNetwork);
                    }
                    _ => {}
                }
            }
            if started.elapsed() >= timeout {
                return Err(if connected {
                    error!("connect failed: no remote configuration within the timeout period");
                    ConnectError::ConfigurationTimeout
                } else {
                    error!("connect failed: could not reach the hub within the timeout period");
                    ConnectError::Timeout
                });
            }
            thread::sleep(poll);
        }
    }

    pub fn message_counter(&self) -> Arc<SyncedCounter<MessageCounter>> {
        self.shared.message_counter.clone()
    }

    /// Stops the transport. All callbacks are quiesced before this returns,
    /// so the shared flag block can no longer be reached from its threads.
    pub fn shutdown(&self) {
        let _guard = self.lock.lock();
        if self.initiated.swap(false, Ordering::SeqCst) {
            self.transport.shutdown();
        }
    }

    fn send_internal(&self, data: &[u8]) -> bool {
        if !self.initiated.load(Ordering::SeqCst) {
            error!("cannot send message, adapter not initiated");
            return false;
        }

        // A disconnected DPS-provisioned device may hold rotated credentials;
        // renew and bring the transport back up before sending.
        if !self.shared.connected.load(Ordering::SeqCst) && self.local.use_dps() {
            if !self.local.try_renew_connection_string() {
                error!("could not renew the connection credentials");
                return false;
            }
            self.transport.shutdown();
            if let Err(err) = self.transport.start(self.shared.clone()) {
                error!("could not re-initialize the hub transport: {err}");
                return false;
            }
        }

        if let Err(err) = self.transport.send_event(data) {
            warn!("failed to hand the message to the transport: {err}");
            return false;
        }

        if (data.len() as u64) < MESSAGE_BILLING_MULTIPLE {
            self.shared
                .message_counter
                .increase_by(|c| &mut c.small_messages, 1);
        }
        self.shared
            .message_counter
            .increase_by(|c| &mut c.sent_messages, 1);
        debug!("transport accepted the message for delivery");
        true
    }
}

impl HubSink for HubAdapter {
    fn send_message_async(&self, data: &[u8]) -> bool {
        let _guard = self.lock.lock();
        self.send_internal(data)
    }

    fn set_reported_properties_async(&self, data: &[u8]) -> bool {
        if let Err(err) = self.transport.send_reported_state(data) {
            warn!("failed to hand the reported properties to the transport: {err}");
            return false;
        }
        debug!("transport accepted the reported properties");
        true
    }
}
