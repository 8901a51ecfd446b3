//! Narrow seam to the messaging client.
//! The adapter never talks to a socket directly; it drives a [`HubTransport`]
//! and receives callbacks through a [`HubEventHandler`] on transport-owned
//! threads. [`TcpHubClient`] is the wire implementation (newline-delimited
//! JSON frames over TCP); tests substitute an in-process fake.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;

/// Why the connection is in its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionReason {
    Ok,
    /// The hub rejected the credentials. Permanent until reconfigured.
    BadCredential,
    /// No route to the hub. Permanent for the current connect attempt.
    NoNetwork,
    CommunicationError,
    Closing,
}

/// Whether a pushed twin payload is the whole document or a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinUpdateState {
    Complete,
    Partial,
}

/// Delivery verdict reported for a previously sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendConfirmation {
    Ok,
    Timeout,
    Error,
}

/// Callbacks delivered on transport-owned threads. Implementations take
/// their own sub-locks; the transport never holds any adapter lock while
/// calling in.
pub trait HubEventHandler: Send + Sync {
    fn connection_status(&self, connected: bool, reason: ConnectionReason);
    fn twin_update(&self, state: TwinUpdateState, payload: &[u8]);
    fn send_confirm(&self, result: SendConfirmation);
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("malformed connection string (expected HostName=..;DeviceId=..;SharedAccessKey=..)")]
    BadConnectionString,
    #[error("transport is not running")]
    NotRunning,
    #[error("cannot frame message: {0}")]
    Frame(#[from] serde_json::Error),
}

/// The opaque transport interface the adapter depends on.
pub trait HubTransport: Send + Sync {
    /// Connects and begins delivering callbacks to `handler`.
    fn start(&self, handler: Arc<dyn HubEventHandler>) -> Result<(), TransportError>;
    /// Hands one security message to the hub; the verdict arrives through
    /// the send-confirm callback.
    fn send_event(&self, data: &[u8]) -> Result<(), TransportError>;
    /// Writes the device's reported properties back to the twin.
    fn send_reported_state(&self, data: &[u8]) -> Result<(), TransportError>;
    /// Quiesces the transport: no callbacks are in flight once this returns.
    fn shutdown(&self);
}

const OUTBOUND_QUEUE_DEPTH: usize = 64;
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

struct Session {
    frames: Sender<Value>,
    stream: TcpStream,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

/// Messaging client speaking newline-delimited JSON frames over TCP.
pub struct TcpHubClient {
    host: String,
    device_id: String,
    access_key: String,
    session: Mutex<Option<Session>>,
}

impl TcpHubClient {
    /// Parses a `HostName=..;DeviceId=..;SharedAccessKey=..` connection
    /// string. `HostName` carries `host:port`.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, TransportError> {
        let mut host = None;
        let mut device_id = None;
        let mut access_key = None;
        for pair in connection_string.split(';') {
            match pair.split_once('=') {
                Some(("HostName", value)) => host = Some(value.to_string()),
                Some(("DeviceId", value)) => device_id = Some(value.to_string()),
                Some(("SharedAccessKey", value)) => access_key = Some(value.to_string()),
                _ => {}
            }
        }
        match (host, device_id, access_key) {
            (Some(host), Some(device_id), Some(access_key)) => Ok(Self {
                host,
                device_id,
                access_key,
                session: Mutex::new(None),
            }),
            _ => Err(TransportError::BadConnectionString),
        }
    }

    fn enqueue(&self, frame: Value) -> Result<(), TransportError> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(TransportError::NotRunning)?;
        session
            .frames
            .send(frame)
            .map_err(|_| TransportError::NotRunning)
    }
}

fn writer_loop(frames: Receiver<Value>, stream: TcpStream, handler: Arc<dyn HubEventHandler>) {
    let mut stream = stream;
    for frame in frames.iter() {
        let mut line = frame.to_string();
        line.push('\n');
        if let Err(err) = stream.write_all(line.as_bytes()) {
            warn!("hub connection lost while writing: {err}");
            handler.connection_status(false, ConnectionReason::CommunicationError);
            break;
        }
    }
}

fn reader_loop(stream: TcpStream, handler: Arc<dyn HubEventHandler>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("hub connection lost while reading: {err}");
                handler.connection_status(false, ConnectionReason::NoNetwork);
                return;
            }
        };
        let frame: Value = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                debug!("discarding unparseable hub frame: {err}");
                continue;
            }
        };
        dispatch_frame(&frame, &handler);
    }
    // Orderly EOF from the hub side.
    handler.connection_status(false, ConnectionReason::Closing);
}

fn dispatch_frame(frame: &Value, handler: &Arc<dyn HubEventHandler>) {
    match frame.get("type").and_then(Value::as_str) {
        Some("connectionAck") => match frame.get("status").and_then(Value::as_str) {
            Some("ok") => handler.connection_status(true, ConnectionReason::Ok),
            Some("unauthorized") => {
                handler.connection_status(false, ConnectionReason::BadCredential)
            }
            _ => handler.connection_status(false, ConnectionReason::CommunicationError),
        },
        Some("twin") => {
            let state = match frame.get("state").and_then(Value::as_str) {
                Some("partial") => TwinUpdateState::Partial,
                _ => TwinUpdateState::Complete,
            };
            if let Some(payload) = frame.get("payload") {
                match serde_json::to_vec(payload) {
                    Ok(bytes) => handler.twin_update(state, &bytes),
                    Err(err) => debug!("cannot re-serialize twin payload: {err}"),
                }
            }
        }
        Some("sendAck") => {
            let confirmation = match frame.get("status").and_then(Value::as_str) {
                Some("ok") => SendConfirmation::Ok,
                Some("timeout") => SendConfirmation::Timeout,
                _ => SendConfirmation::Error,
            };
            handler.send_confirm(confirmation);
        }
        other => debug!("ignoring hub frame of type {other:?}"),
    }
}

impl HubTransport for TcpHubClient {
    fn start(&self, handler: Arc<dyn HubEventHandler>) -> Result<(), TransportError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }

        let stream = TcpStream::connect(&self.host)?;
        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

        let (frames_tx, frames_rx) = bounded::<Value>(OUTBOUND_QUEUE_DEPTH);
        frames_tx
            .send(json!({
                "type": "auth",
                "deviceId": self.device_id,
                "sharedAccessKey": self.access_key,
            }))
            .map_err(|_| TransportError::NotRunning)?;

        let writer = {
            let stream = stream.try_clone()?;
            let handler = handler.clone();
            thread::spawn(move || writer_loop(frames_rx, stream, handler))
        };
        let reader = {
            let stream = stream.try_clone()?;
            let handler = handler.clone();
            thread::spawn(move || reader_loop(stream, handler))
        };

        info!("hub transport connected to {}", self.host);
        *session = Some(Session {
            frames: frames_tx,
            stream,
            writer: Some(writer),
            reader: Some(reader),
        });
        Ok(())
    }

    fn send_event(&self, data: &[u8]) -> Result<(), TransportError> {
        let body: Value = serde_json::from_slice(data)?;
        self.enqueue(json!({ "type": "securityMessage", "body": body }))
    }

    fn send_reported_state(&self, data: &[u8]) -> Result<(), TransportError> {
        let body: Value = serde_json::from_slice(data)?;
        self.enqueue(json!({ "type": "reportedProperties", "body": body }))
    }

    fn shutdown(&self) {
        let Some(mut session) = self.session.lock().take() else {
            return;
        };
        // Unblock the reader, then drop the frame sender to stop the writer.
        let _ = session.stream.shutdown(Shutdown::Both);
        drop(session.frames);
        if let Some(writer) = session.writer.take() {
            let _ = writer.join();
        }
        if let Some(reader) = session.reader.take() {
            let _ = reader.join();
        }
        info!("hub transport shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::net::TcpListener;

    #[derive(Default)]
    struct RecordingHandler {
        statuses: PlMutex<Vec<(bool, ConnectionReason)>>,
        twins: PlMutex<Vec<(TwinUpdateState, Vec<u8>)>>,
        confirms: PlMutex<Vec<SendConfirmation>>,
    }

    impl HubEventHandler for RecordingHandler {
        fn connection_status(&self, connected: bool, reason: ConnectionReason) {
            self.statuses.lock().push((connected, reason));
        }
        fn twin_update(&self, state: TwinUpdateState, payload: &[u8]) {
            self.twins.lock().push((state, payload.to_vec()));
        }
        fn send_confirm(&self, result: SendConfirmation) {
            self.confirms.lock().push(result);
        }
    }

    #[test]
    fn rejects_incomplete_connection_strings() {
        for bad in ["", "HostName=h", "DeviceId=d;SharedAccessKey=k", "junk"] {
            assert!(TcpHubClient::from_connection_string(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn parses_a_connection_string() {
        let client = TcpHubClient::from_connection_string(
            "HostName=hub.local:7310;DeviceId=dev-1;SharedAccessKey=abc",
        )
        .unwrap();
        assert_eq!(client.host, "hub.local:7310");
        assert_eq!(client.device_id, "dev-1");
        assert_eq!(client.access_key, "abc");
    }

    #[test]
    fn frame_dispatch_reaches_the_handler() {
        let recording = Arc::new(RecordingHandler::default());
        let handler: Arc<dyn HubEventHandler> = recording.clone();

        dispatch_frame(&json!({ "type": "connectionAck", "status": "ok" }), &handler);
        dispatch_frame(
            &json!({ "type": "connectionAck", "status": "unauthorized" }),
            &handler,
        );
        dispatch_frame(
            &json!({ "type": "twin", "state": "partial", "payload": { "a": 1 } }),
            &handler,
        );
        dispatch_frame(&json!({ "type": "sendAck", "status": "error" }), &handler);
        dispatch_frame(&json!({ "type": "somethingElse" }), &handler);

        assert_eq!(
            *recording.statuses.lock(),
            vec![
                (true, ConnectionReason::Ok),
                (false, ConnectionReason::BadCredential),
            ]
        );
        let twins = recording.twins.lock();
        assert_eq!(twins[0].0, TwinUpdateState::Partial);
        assert_eq!(twins[0].1, br#"{"a":1}"#);
        assert_eq!(*recording.confirms.lock(), vec![SendConfirmation::Error]);
    }

    #[test]
    fn talks_to_a_scripted_hub() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut lines = BufReader::new(stream.try_clone().unwrap()).lines();

            // Expect the auth frame first.
            let auth: Value = serde_json::from_str(&lines.next().unwrap().unwrap()).unwrap();
            assert_eq!(auth["type"], "auth");
            assert_eq!(auth["deviceId"], "dev-1");

            let mut stream = stream;
            stream
                .write_all(b"{\"type\":\"connectionAck\",\"status\":\"ok\"}\n")
                .unwrap();
            stream
                .write_all(
                    b"{\"type\":\"twin\",\"state\":\"complete\",\"payload\":{\"desired\":{}}}\n",
                )
                .unwrap();

            // One security message should arrive, acknowledge it.
            let message: Value = serde_json::from_str(&lines.next().unwrap().unwrap()).unwrap();
            assert_eq!(message["type"], "securityMessage");
            assert_eq!(message["body"]["AgentId"], "a1");
            stream
                .write_all(b"{\"type\":\"sendAck\",\"status\":\"ok\"}\n")
                .unwrap();
        });

        let client = TcpHubClient::from_connection_string(&format!(
            "HostName={address};DeviceId=dev-1;SharedAccessKey=k"
        ))
        .unwrap();
        let handler = Arc::new(RecordingHandler::default());
        client.start(handler.clone()).unwrap();

        client.send_event(br#"{"AgentId":"a1","Events":[]}"#).unwrap();
        server.join().unwrap();

        // Give the reader thread a moment to drain the scripted frames.
        for _ in 0..50 {
            if !handler.confirms.lock().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        client.shutdown();

        assert!(handler
            .statuses
            .lock()
            .contains(&(true, ConnectionReason::Ok)));
        let twins = handler.twins.lock();
        assert_eq!(twins.len(), 1);
        assert_eq!(twins[0].0, TwinUpdateState::Complete);
        assert_eq!(handler.confirms.lock()[0], SendConfirmation::Ok);
    }
}
