//! The client facade.
//!
//! A [`Client`] owns one broker connection, the listeners registered on it
//! and the packer and unpacker pipelines. It is cheap to clone; clones share
//! the same connection. Dropping the last clone closes the connection.

use spacebro_core::{fold, Event, EventKey, HookContext, HookPipeline, HookResult, ListenerRegistry};
use spacebro_protocol::{Frame, Payload};
use spacebro_transport::{signals, Transport};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[cfg(feature = "websocket")]
use spacebro_transport::WebSocketTransport;

use crate::config::ClientConfig;
use crate::connection::{endpoint_url, Connection, ConnectionState};
use crate::error::ClientError;
use crate::metrics;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) packers: Mutex<HookPipeline>,
    pub(crate) unpackers: Mutex<HookPipeline>,
    pub(crate) connection: Connection,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.connection.close();
    }
}

/// A spacebro client.
///
/// ```rust,ignore
/// use serde_json::json;
/// use spacebro_client::{Client, ClientConfig};
///
/// let client = Client::create("localhost", 3333, ClientConfig::new("lobby", "player")).await?;
/// client.on("play", |event| println!("{} from {:?}", event.data.unboxed(), event.sender()));
/// client.emit("ready", json!({ "screen": 1 }))?;
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

type Outcome = Arc<Mutex<Option<oneshot::Sender<Result<(), ClientError>>>>>;

/// Signals `create` listens on until the first attempt settles.
const OUTCOME_SIGNALS: [&str; 4] = [
    signals::CONNECT,
    signals::CONNECT_ERROR,
    signals::CONNECT_TIMEOUT,
    signals::ERROR,
];

fn settle(outcome: &Outcome, result: Result<(), ClientError>) {
    if let Some(tx) = lock(outcome).take() {
        let _ = tx.send(result);
    }
}

fn reason(event: &Event) -> String {
    let value = event.data.unboxed();
    value
        .as_str()
        .map_or_else(|| value.to_string(), str::to_string)
}

impl Client {
    /// Create a client that connects over WebSocket.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let transport = WebSocketTransport::new(config.transport.websocket_config());
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client from the settings file, or from defaults when there is none.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn from_settings() -> Self {
        let config = match ClientConfig::load() {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!("Client created without options and no settings file found, using defaults");
                ClientConfig::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load settings, using defaults");
                ClientConfig::default()
            }
        };
        Self::new(config)
    }

    /// Create a client over a specific transport.
    #[must_use]
    pub fn with_transport(mut config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        metrics::describe();
        config.normalize();

        let mut packers = HookPipeline::new();
        for hook in std::mem::take(&mut config.packers) {
            packers.add(hook);
        }
        let mut unpackers = HookPipeline::new();
        for hook in std::mem::take(&mut config.unpackers) {
            unpackers.add(hook);
        }

        if config.verbose {
            debug!(
                channel = ?config.channel_name,
                client = ?config.client.name,
                transport = transport.name(),
                "Client created"
            );
        }

        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                listeners: ListenerRegistry::new(),
                packers: Mutex::new(packers),
                unpackers: Mutex::new(unpackers),
                connection: Connection::new(),
            }),
        }
    }

    /// Connect over WebSocket and wait for the first connection outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid, or if the first attempt
    /// reports `connect_error`, `connect_timeout` or `error`.
    #[cfg(feature = "websocket")]
    pub async fn create(address: &str, port: u16, config: ClientConfig) -> Result<Self, ClientError> {
        let transport = WebSocketTransport::new(config.transport.websocket_config());
        Self::create_with_transport(address, port, config, Arc::new(transport)).await
    }

    /// Connect over a specific transport and wait for the first connection outcome.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid, or if the first attempt
    /// reports `connect_error`, `connect_timeout` or `error`.
    pub async fn create_with_transport(
        address: &str,
        port: u16,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        let client = Self::with_transport(config, transport);
        let (tx, rx) = oneshot::channel();
        let outcome: Outcome = Arc::new(Mutex::new(Some(tx)));

        let slot = outcome.clone();
        client.add_once(signals::CONNECT, move |_| settle(&slot, Ok(())), None);
        let slot = outcome.clone();
        client.add_once(
            signals::CONNECT_ERROR,
            move |event| settle(&slot, Err(ClientError::ConnectError(reason(event)))),
            None,
        );
        let slot = outcome.clone();
        client.add_once(
            signals::CONNECT_TIMEOUT,
            move |_| settle(&slot, Err(ClientError::ConnectTimeout)),
            None,
        );
        let slot = outcome;
        client.add_once(
            signals::ERROR,
            move |event| settle(&slot, Err(ClientError::ConnectError(reason(event)))),
            None,
        );

        client.connect(address, port)?;
        let outcome = rx.await;

        for name in OUTCOME_SIGNALS {
            client.off(name);
        }
        match outcome {
            Ok(Ok(())) => Ok(client),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Abandoned),
        }
    }

    /// Start connecting to the broker at `address:port`.
    ///
    /// Returns as soon as the attempt is started; the outcome is reported
    /// to `connect`, `connect_error` and `connect_timeout` listeners. An
    /// address without a scheme is reached over `ws://`. Must be called
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty, the port is zero, or the
    /// transport cannot start the attempt.
    pub fn connect(&self, address: &str, port: u16) -> Result<(), ClientError> {
        let url = endpoint_url(address, port)?;
        if self.inner.config.verbose {
            info!(url = %url, channel = ?self.inner.config.channel_name, "Trying to connect");
        }
        self.inner.open(&url)
    }

    /// Close the connection and drop every packer and unpacker.
    ///
    /// Listeners stay registered. A later `connect` starts over.
    pub fn disconnect(&self) {
        self.inner.connection.close();
        lock(&self.inner.packers).clear();
        lock(&self.inner.unpackers).clear();
        if self.inner.config.verbose {
            info!("Disconnected");
        }
    }

    /// Register an outgoing payload transform.
    ///
    /// Hooks for an event run in descending priority, ties in registration
    /// order; a missing priority counts as 0.
    pub fn add_packer<F>(&self, handler: F, priority: Option<i32>, event: impl Into<EventKey>)
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        lock(&self.inner.packers).register(handler, priority, event);
    }

    /// Register an incoming payload transform.
    pub fn add_unpacker<F>(&self, handler: F, priority: Option<i32>, event: impl Into<EventKey>)
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        lock(&self.inner.unpackers).register(handler, priority, event);
    }

    /// Publish an event to the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if a packer rejects the payload.
    pub fn emit(&self, event: &str, data: impl Into<Payload>) -> Result<(), ClientError> {
        self.send_to(event, None, data)
    }

    /// Publish an event with an empty object as data.
    ///
    /// # Errors
    ///
    /// Returns an error if a packer rejects the payload.
    pub fn emit_empty(&self, event: &str) -> Result<(), ClientError> {
        self.send_to(event, None, Payload::empty())
    }

    /// Publish an event to one client, or to the channel when `to` is `None`.
    ///
    /// Scalar data is boxed as `{"data": .., "altered": true}`. The payload
    /// carries `_to` and `_from`, then goes through the packers. Does
    /// nothing but log a warning while not connected.
    ///
    /// # Errors
    ///
    /// Returns an error if a packer rejects the payload.
    pub fn send_to(
        &self,
        event: &str,
        to: Option<&str>,
        data: impl Into<Payload>,
    ) -> Result<(), ClientError> {
        let Some(handle) = self.inner.connection.connected_handle() else {
            warn!(event = %event, "can't emit, not connected");
            return Ok(());
        };

        let payload = data.into().with_envelope(self.client_name(), to);
        let hooks = lock(&self.inner.packers).select(event);
        let payload = fold(&hooks, event, payload)?;

        match handle.send(Frame::new(event, payload)) {
            Ok(()) => {
                metrics::record_sent();
                if self.inner.config.verbose {
                    debug!(event = %event, to = ?to, "emitted");
                }
            }
            Err(e) => warn!(event = %event, error = %e, "Failed to emit"),
        }
        Ok(())
    }

    /// Listen to an event, replacing any listeners already registered for it.
    ///
    /// `"*"` listens to every application event that has no listener of
    /// its own.
    pub fn on<F>(&self, event: impl Into<EventKey>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.on(event, handler, None);
    }

    /// Like [`on`](Self::on), with an explicit priority.
    pub fn on_with_priority<F>(&self, event: impl Into<EventKey>, handler: F, priority: i32)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.on(event, handler, Some(priority));
    }

    /// Listen to the next occurrence of an event, replacing any listeners
    /// already registered for it.
    pub fn once<F>(&self, event: impl Into<EventKey>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.once(event, handler, None);
    }

    /// Like [`once`](Self::once), with an explicit priority.
    pub fn once_with_priority<F>(&self, event: impl Into<EventKey>, handler: F, priority: i32)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.once(event, handler, Some(priority));
    }

    /// Add a listener next to those already registered for the event.
    pub fn add_listener<F>(&self, event: impl Into<EventKey>, handler: F, priority: Option<i32>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.add(event, handler, priority);
    }

    /// Add a once-listener next to those already registered for the event.
    pub fn add_once<F>(&self, event: impl Into<EventKey>, handler: F, priority: Option<i32>)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.add_once(event, handler, priority);
    }

    /// Remove every listener for an event.
    ///
    /// Returns `true` if any were registered.
    pub fn off(&self, event: impl Into<EventKey>) -> bool {
        self.inner.listeners.off(event)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Whether events can be sent right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The configuration the client was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Name stamped as `_from` on outgoing events.
    #[must_use]
    pub fn client_name(&self) -> Option<&str> {
        self.inner.config.client.name.as_deref()
    }

    pub(crate) fn listeners(&self) -> &ListenerRegistry {
        &self.inner.listeners
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("channel", &self.inner.config.channel_name)
            .field("client", &self.inner.config.client.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
