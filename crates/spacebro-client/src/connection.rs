//! Connection lifecycle.
//!
//! Every `connect` opens a transport handle and spawns one pump task that
//! consumes the handle's signal stream in order. Lifecycle signals update
//! the connection state and are re-emitted to listeners under their own
//! names; application events pass through self-echo suppression and the
//! unpackers before reaching listeners.
//!
//! Each opened handle gets a generation number. Signals from a handle that
//! has since been closed or replaced no longer touch the state; only their
//! final `disconnect` is still delivered to listeners.

use serde_json::Value;
use spacebro_core::{fold, Event};
use spacebro_protocol::{Frame, Payload, Register, FROM_FIELD};
use spacebro_transport::{SignalReceiver, TransportError, TransportHandle, TransportSignal};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, trace, warn};

use crate::client::{lock, ClientInner};
use crate::error::ClientError;
use crate::metrics::{self, drop_reasons};

/// Where a client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, or the connection was closed.
    Disconnected,
    /// Waiting for the first `connect` signal.
    Connecting,
    /// Connected and registered.
    Connected,
    /// The connection dropped and the transport is retrying.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Build the broker URL for `address` and `port`.
///
/// The address is used as given when it already names a scheme, otherwise
/// `ws://` is prepended.
///
/// # Errors
///
/// Returns an error if the address is empty or the port is zero.
pub fn endpoint_url(address: &str, port: u16) -> Result<String, ClientError> {
    if address.is_empty() {
        return Err(ClientError::InvalidAddress);
    }
    if port == 0 {
        return Err(ClientError::InvalidPort);
    }
    let address = address.trim_end_matches('/');
    if address.contains("://") {
        Ok(format!("{address}:{port}"))
    } else {
        Ok(format!("ws://{address}:{port}"))
    }
}

struct Slot {
    state: ConnectionState,
    handle: Option<Arc<dyn TransportHandle>>,
    generation: u64,
}

/// The client's current transport handle and state.
pub(crate) struct Connection {
    slot: Mutex<Slot>,
}

impl Connection {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                handle: None,
                generation: 0,
            }),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        lock(&self.slot).state
    }

    /// Install a freshly opened handle, closing any previous one.
    fn begin(&self, handle: Arc<dyn TransportHandle>) -> u64 {
        let (generation, previous) = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.state = ConnectionState::Connecting;
            (slot.generation, slot.handle.replace(handle))
        };
        if let Some(previous) = previous {
            debug!(connection = %previous.id(), "Closing replaced connection");
            previous.close();
        }
        generation
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.slot).generation == generation
    }

    fn transition(&self, generation: u64, state: ConnectionState) {
        let mut slot = lock(&self.slot);
        if slot.generation == generation {
            slot.state = state;
        }
    }

    /// The handle, when the connection is up.
    pub(crate) fn connected_handle(&self) -> Option<Arc<dyn TransportHandle>> {
        let slot = lock(&self.slot);
        match slot.state {
            ConnectionState::Connected => slot.handle.clone(),
            _ => None,
        }
    }

    fn current_handle(&self, generation: u64) -> Option<Arc<dyn TransportHandle>> {
        let slot = lock(&self.slot);
        if slot.generation == generation {
            slot.handle.clone()
        } else {
            None
        }
    }

    /// Close the handle, if any. Later signals from it become stale.
    pub(crate) fn close(&self) {
        let handle = {
            let mut slot = lock(&self.slot);
            slot.generation += 1;
            slot.state = ConnectionState::Disconnected;
            slot.handle.take()
        };
        if let Some(handle) = handle {
            handle.close();
        }
    }
}

impl ClientInner {
    /// Open a connection to `url` and start pumping its signals.
    pub(crate) fn open(self: &Arc<Self>, url: &str) -> Result<(), ClientError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let (handle, signals) = self.transport.open(url)?;
        let generation = self.connection.begin(Arc::from(handle));
        metrics::record_connection(self.transport.name());

        runtime.spawn(pump(Arc::downgrade(self), generation, signals));
        Ok(())
    }

    fn handle_signal(&self, generation: u64, signal: TransportSignal) {
        if let TransportSignal::Event(frame) = signal {
            if self.connection.is_current(generation) {
                self.deliver(frame);
            }
            return;
        }

        if !self.connection.is_current(generation) {
            if let TransportSignal::Disconnect(_) = signal {
                self.emit_local(signal);
            } else {
                trace!(signal = signal.name(), "Ignoring signal from a closed connection");
            }
            return;
        }

        // Disconnect and reconnect reach listeners before the state changes.
        let mut deferred = None;
        match &signal {
            TransportSignal::Connect => {
                self.connection
                    .transition(generation, ConnectionState::Connected);
                self.register(generation);
                if self.config.verbose {
                    info!(
                        channel = ?self.config.channel_name,
                        client = ?self.config.client.name,
                        "socket connected"
                    );
                }
            }
            TransportSignal::ConnectError(reason) => {
                warn!(reason = %reason, "error, connection failed");
                self.connection
                    .transition(generation, ConnectionState::Disconnected);
            }
            TransportSignal::ConnectTimeout => {
                warn!("connection timeout");
            }
            TransportSignal::Error(reason) => {
                warn!(reason = %reason, "error");
                self.connection
                    .transition(generation, ConnectionState::Disconnected);
            }
            TransportSignal::Disconnect(reason) => {
                if self.config.verbose {
                    info!(reason = %reason, "socket down");
                }
                deferred = Some(ConnectionState::Disconnected);
            }
            TransportSignal::Reconnect(attempt) => {
                if self.config.verbose {
                    info!(attempt, "socket reconnected");
                }
                deferred = Some(ConnectionState::Connected);
            }
            TransportSignal::ReconnectAttempt(attempt) => {
                if self.config.verbose {
                    info!(attempt, "attempt to reconnect");
                }
            }
            TransportSignal::Reconnecting(attempt) => {
                if self.config.verbose {
                    info!(attempt, "socket reconnecting");
                }
                self.connection
                    .transition(generation, ConnectionState::Reconnecting);
            }
            TransportSignal::ReconnectError(reason) => {
                warn!(reason = %reason, "socket reconnect error");
            }
            TransportSignal::ReconnectFailed => {
                warn!("socket can't reconnect");
                self.connection
                    .transition(generation, ConnectionState::Disconnected);
            }
            TransportSignal::Event(_) => {}
        }

        self.emit_local(signal);
        if let Some(state) = deferred {
            self.connection.transition(generation, state);
        }
    }

    /// Announce this client to the broker.
    fn register(&self, generation: u64) {
        let Some(handle) = self.connection.current_handle(generation) else {
            return;
        };
        let register = Register::new(self.config.channel_name.clone(), self.config.client.clone());
        if let Err(e) = handle.send(Frame::register(register)) {
            warn!(error = %e, "Failed to register");
        }
    }

    /// Re-emit a lifecycle signal to listeners under its own name.
    fn emit_local(&self, signal: TransportSignal) {
        let name = signal.name().to_string();
        self.listeners.dispatch(&Event::new(name, signal.into_payload()));
    }

    /// Deliver an application event to its listeners.
    fn deliver(&self, frame: Frame) {
        let Frame { event, payload } = frame;

        if !self.config.send_back && self.is_own(&payload) {
            trace!(event = %event, "Dropping own event");
            metrics::record_dropped(drop_reasons::SELF_ECHO);
            return;
        }

        let Some(set) = self.listeners.resolve(&event) else {
            trace!(event = %event, "No listener");
            metrics::record_dropped(drop_reasons::NO_LISTENER);
            return;
        };

        if self.config.verbose {
            debug!(event = %event, from = ?payload.sender(), "received");
        }

        let hooks = lock(&self.unpackers).select(&event);
        let payload = match fold(&hooks, &event, payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event = %event, error = %e, "Unpacker failed, dropping event");
                metrics::record_dropped(drop_reasons::UNPACKER);
                return;
            }
        };

        set.dispatch(&Event::new(event, payload));
        metrics::record_received();
    }

    /// Whether the payload's `_from` names this client.
    fn is_own(&self, payload: &Payload) -> bool {
        let own = self
            .config
            .client
            .name
            .as_deref()
            .map_or(Value::Null, |name| Value::String(name.to_string()));
        payload.get(FROM_FIELD) == Some(&own)
    }
}

async fn pump(inner: Weak<ClientInner>, generation: u64, mut signals: SignalReceiver) {
    while let Some(signal) = signals.recv().await {
        let Some(client) = inner.upgrade() else {
            break;
        };
        client.handle_signal(generation, signal);
    }
    trace!(generation, "Signal stream ended");
}
