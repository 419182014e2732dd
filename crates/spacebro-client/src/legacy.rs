//! Process-wide default client.
//!
//! Older applications drive one implicit client through free functions
//! instead of holding a [`Client`]. [`DefaultClient`] keeps that client and
//! a pre-connect client that collects listeners registered before the first
//! `connect`; those listeners move to the real client when it is created.
//!
//! ```rust,ignore
//! use spacebro_client::{legacy, ClientConfig};
//!
//! legacy::on("play", |event| println!("{:?}", event.data));
//! legacy::connect("localhost", 3333, ClientConfig::new("lobby", "player"))?;
//! legacy::emit("ready", serde_json::json!({}))?;
//! ```

use spacebro_core::{Event, EventKey, HookContext, HookResult};
use spacebro_protocol::Payload;
use spacebro_transport::Transport;
use std::sync::{Arc, Mutex};
use tracing::warn;

#[cfg(feature = "websocket")]
use spacebro_transport::WebSocketTransport;
#[cfg(feature = "websocket")]
use std::sync::OnceLock;

use crate::client::lock;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::Client;

/// Holder of the implicit client.
pub struct DefaultClient {
    transport: Arc<dyn Transport>,
    pre_connect: Mutex<Option<Client>>,
    current: Mutex<Option<Client>>,
}

impl DefaultClient {
    /// Create a holder whose clients connect over WebSocket.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn new() -> Self {
        Self::with_transport(Arc::new(WebSocketTransport::default()))
    }

    /// Create a holder whose clients connect over `transport`.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        let pre_connect = Client::with_transport(ClientConfig::default(), transport.clone());
        Self {
            transport,
            pre_connect: Mutex::new(Some(pre_connect)),
            current: Mutex::new(None),
        }
    }

    /// Create the implicit client and start connecting it.
    ///
    /// Listeners registered before the first call are moved onto the new
    /// client. A client that is already open is replaced.
    ///
    /// When the client cannot start connecting, the open client is kept and
    /// pre-connect listeners stay pending for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot start connecting.
    pub fn connect(
        &self,
        address: &str,
        port: u16,
        config: ClientConfig,
    ) -> Result<Client, ClientError> {
        let client = Client::with_transport(config, self.transport.clone());
        let pre_connect = lock(&self.pre_connect).take();
        if let Some(pre_connect) = &pre_connect {
            client.listeners().adopt(pre_connect.listeners());
        }

        if let Err(e) = client.connect(address, port) {
            if let Some(pre_connect) = pre_connect {
                pre_connect.listeners().adopt(client.listeners());
                *lock(&self.pre_connect) = Some(pre_connect);
            }
            return Err(e);
        }

        if lock(&self.current).replace(client.clone()).is_some() {
            warn!("A spacebro client is already open, replacing it");
        }
        Ok(client)
    }

    /// The implicit client, if `connect` has been called.
    #[must_use]
    pub fn current(&self) -> Option<Client> {
        lock(&self.current).clone()
    }

    fn checked(&self) -> Option<Client> {
        let client = self.current();
        if client.is_none() {
            warn!("No spacebro client is open");
        }
        client
    }

    fn listener_target(&self) -> Option<Client> {
        let client = self
            .current()
            .or_else(|| lock(&self.pre_connect).clone());
        if client.is_none() {
            warn!("No spacebro client is open");
        }
        client
    }

    /// Disconnect and forget the implicit client.
    pub fn disconnect(&self) {
        if let Some(client) = self.checked() {
            client.disconnect();
        }
        lock(&self.current).take();
    }

    /// See [`Client::add_packer`].
    pub fn add_packer<F>(&self, handler: F, priority: Option<i32>, event: impl Into<EventKey>)
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        if let Some(client) = self.checked() {
            client.add_packer(handler, priority, event);
        }
    }

    /// See [`Client::add_unpacker`].
    pub fn add_unpacker<F>(&self, handler: F, priority: Option<i32>, event: impl Into<EventKey>)
    where
        F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        if let Some(client) = self.checked() {
            client.add_unpacker(handler, priority, event);
        }
    }

    /// See [`Client::emit`].
    ///
    /// # Errors
    ///
    /// Returns an error if a packer rejects the payload.
    pub fn emit(&self, event: &str, data: impl Into<Payload>) -> Result<(), ClientError> {
        match self.checked() {
            Some(client) => client.emit(event, data),
            None => Ok(()),
        }
    }

    /// See [`Client::send_to`].
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
        match self.checked() {
            Some(client) => client.send_to(event, to, data),
            None => Ok(()),
        }
    }

    /// See [`Client::on`]. Works before `connect`.
    pub fn on<F>(&self, event: impl Into<EventKey>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if let Some(client) = self.listener_target() {
            client.on(event, handler);
        }
    }

    /// See [`Client::once`]. Works before `connect`.
    pub fn once<F>(&self, event: impl Into<EventKey>, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if let Some(client) = self.listener_target() {
            client.once(event, handler);
        }
    }

    /// See [`Client::off`]. Works before `connect`.
    pub fn off(&self, event: impl Into<EventKey>) -> bool {
        self.listener_target()
            .is_some_and(|client| client.off(event))
    }
}

#[cfg(feature = "websocket")]
impl Default for DefaultClient {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide default client.
#[cfg(feature = "websocket")]
pub fn global() -> &'static DefaultClient {
    static GLOBAL: OnceLock<DefaultClient> = OnceLock::new();
    GLOBAL.get_or_init(DefaultClient::new)
}

/// Connect the process-wide client. See [`DefaultClient::connect`].
///
/// # Errors
///
/// Returns an error if the client cannot start connecting.
#[cfg(feature = "websocket")]
pub fn connect(address: &str, port: u16, config: ClientConfig) -> Result<Client, ClientError> {
    global().connect(address, port, config)
}

/// Disconnect the process-wide client.
#[cfg(feature = "websocket")]
pub fn disconnect() {
    global().disconnect();
}

/// Add a packer to the process-wide client.
#[cfg(feature = "websocket")]
pub fn add_packer<F>(handler: F, priority: Option<i32>, event: impl Into<EventKey>)
where
    F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
{
    global().add_packer(handler, priority, event);
}

/// Add an unpacker to the process-wide client.
#[cfg(feature = "websocket")]
pub fn add_unpacker<F>(handler: F, priority: Option<i32>, event: impl Into<EventKey>)
where
    F: Fn(&HookContext<'_>) -> HookResult + Send + Sync + 'static,
{
    global().add_unpacker(handler, priority, event);
}

/// Publish on the process-wide client.
///
/// # Errors
///
/// Returns an error if a packer rejects the payload.
#[cfg(feature = "websocket")]
pub fn emit(event: &str, data: impl Into<Payload>) -> Result<(), ClientError> {
    global().emit(event, data)
}

/// Publish to one client on the process-wide client.
///
/// # Errors
///
/// Returns an error if a packer rejects the payload.
#[cfg(feature = "websocket")]
pub fn send_to(event: &str, to: Option<&str>, data: impl Into<Payload>) -> Result<(), ClientError> {
    global().send_to(event, to, data)
}

/// Listen on the process-wide client.
#[cfg(feature = "websocket")]
pub fn on<F>(event: impl Into<EventKey>, handler: F)
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    global().on(event, handler);
}

/// Listen once on the process-wide client.
#[cfg(feature = "websocket")]
pub fn once<F>(event: impl Into<EventKey>, handler: F)
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    global().once(event, handler);
}

/// Stop listening on the process-wide client.
#[cfg(feature = "websocket")]
pub fn off(event: impl Into<EventKey>) -> bool {
    global().off(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{connected, next, recorder, settle_tasks};
    use serde_json::json;
    use spacebro_transport::MemoryBroker;

    #[tokio::test]
    async fn test_listeners_before_connect_move_to_client() {
        let broker = MemoryBroker::new();
        let default = DefaultClient::with_transport(Arc::new(broker.clone()));
        let peer = connected(&broker, ClientConfig::new("test", "peer")).await;

        let (handler, mut rx) = recorder();
        let (up, mut up_rx) = recorder();
        default.on("hello", handler);
        default.on("connect", up);

        let client = default
            .connect("memory", 1, ClientConfig::new("test", "legacy"))
            .unwrap();
        next(&mut up_rx).await;
        assert!(client.is_connected());

        peer.emit("hello", json!({"x": 1})).unwrap();
        assert_eq!(next(&mut rx).await.sender(), Some("peer"));
    }

    #[tokio::test]
    async fn test_operations_without_client_are_noops() {
        let default = DefaultClient::with_transport(Arc::new(MemoryBroker::new()));

        assert!(default.current().is_none());
        assert!(default.emit("hello", json!({})).is_ok());
        assert!(default.send_to("hello", Some("x"), json!({})).is_ok());
        default.add_packer(|_| Ok(None), None, "*");
        default.disconnect();
        assert!(default.current().is_none());
    }

    #[tokio::test]
    async fn test_emit_through_default_client() {
        let broker = MemoryBroker::new();
        let default = DefaultClient::with_transport(Arc::new(broker.clone()));
        let peer = connected(&broker, ClientConfig::new("test", "peer")).await;
        let (handler, mut rx) = recorder();
        peer.on("hello", handler);

        let (up, mut up_rx) = recorder();
        default.on("connect", up);
        default
            .connect("memory", 1, ClientConfig::new("test", "legacy"))
            .unwrap();
        next(&mut up_rx).await;

        default.emit("hello", json!({})).unwrap();
        assert_eq!(next(&mut rx).await.sender(), Some("legacy"));

        default.send_to("hello", Some("peer"), "direct").unwrap();
        assert_eq!(next(&mut rx).await.data.unboxed(), json!("direct"));
    }

    #[tokio::test]
    async fn test_second_connect_replaces_client() {
        let broker = MemoryBroker::new();
        let default = DefaultClient::with_transport(Arc::new(broker.clone()));

        let first = default
            .connect("memory", 1, ClientConfig::new("test", "first"))
            .unwrap();
        let second = default
            .connect("memory", 1, ClientConfig::new("test", "second"))
            .unwrap();
        settle_tasks().await;

        let current = default.current().unwrap();
        assert_eq!(current.client_name(), Some("second"));
        assert_eq!(second.client_name(), Some("second"));
        assert_eq!(first.client_name(), Some("first"));
    }

    #[tokio::test]
    async fn test_disconnect_forgets_client() {
        let broker = MemoryBroker::new();
        let default = DefaultClient::with_transport(Arc::new(broker.clone()));
        let (up, mut up_rx) = recorder();
        default.on("connect", up);
        default
            .connect("memory", 1, ClientConfig::new("test", "legacy"))
            .unwrap();
        next(&mut up_rx).await;

        default.disconnect();
        settle_tasks().await;
        assert!(default.current().is_none());
        assert_eq!(broker.connection_count(), 0);
        assert!(!default.off("connect"));
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_reported() {
        let default = DefaultClient::with_transport(Arc::new(MemoryBroker::new()));
        assert!(matches!(
            default.connect("", 1, ClientConfig::default()),
            Err(ClientError::InvalidAddress)
        ));
        assert!(default.current().is_none());
    }

    #[tokio::test]
    async fn test_listeners_survive_failed_connect() {
        let broker = MemoryBroker::new();
        let default = DefaultClient::with_transport(Arc::new(broker.clone()));
        let peer = connected(&broker, ClientConfig::new("test", "peer")).await;

        let (handler, mut rx) = recorder();
        let (up, mut up_rx) = recorder();
        default.on("hello", handler);
        default.on("connect", up);

        assert!(matches!(
            default.connect("", 1, ClientConfig::new("test", "legacy")),
            Err(ClientError::InvalidAddress)
        ));
        assert!(default.current().is_none());

        let client = default
            .connect("memory", 1, ClientConfig::new("test", "legacy"))
            .unwrap();
        next(&mut up_rx).await;
        assert!(client.is_connected());

        peer.emit("hello", json!({"x": 1})).unwrap();
        assert_eq!(next(&mut rx).await.sender(), Some("peer"));
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_open_client() {
        let broker = MemoryBroker::new();
        let default = DefaultClient::with_transport(Arc::new(broker.clone()));
        let (up, mut up_rx) = recorder();
        default.on("connect", up);
        default
            .connect("memory", 1, ClientConfig::new("test", "first"))
            .unwrap();
        next(&mut up_rx).await;

        assert!(default
            .connect("memory", 0, ClientConfig::new("test", "second"))
            .is_err());
        let current = default.current().unwrap();
        assert_eq!(current.client_name(), Some("first"));
        assert!(current.is_connected());
    }
}
