//! Transport abstraction traits for spacebro clients.
//!
//! A transport opens a connection to a broker URL and hands back two things:
//! a [`TransportHandle`] for fire-and-forget sends, and a stream of
//! [`TransportSignal`]s describing lifecycle changes and incoming events.
//! Reconnection is the transport's own business; it only reports it.

use spacebro_protocol::{Frame, Payload};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Names under which lifecycle signals are surfaced to listeners.
pub mod signals {
    pub const CONNECT: &str = "connect";
    pub const CONNECT_ERROR: &str = "connect_error";
    pub const CONNECT_TIMEOUT: &str = "connect_timeout";
    pub const ERROR: &str = "error";
    pub const DISCONNECT: &str = "disconnect";
    pub const RECONNECT: &str = "reconnect";
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
    pub const RECONNECTING: &str = "reconnecting";
    pub const RECONNECT_ERROR: &str = "reconnect_error";
    pub const RECONNECT_FAILED: &str = "reconnect_failed";
}

/// Disconnect reason reported after a local `close()`.
pub const CLIENT_CLOSE_REASON: &str = "io client disconnect";

/// Counter for connection IDs.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The URL cannot be used by this transport.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No tokio runtime to run the connection on.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] spacebro_protocol::ProtocolError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// The connection is established.
    Connect,
    /// The first connection attempt failed.
    ConnectError(String),
    /// The first connection attempt timed out.
    ConnectTimeout,
    /// The connection failed.
    Error(String),
    /// The connection was lost or closed, with a reason.
    Disconnect(String),
    /// A reconnection succeeded after this many attempts.
    Reconnect(u32),
    /// A reconnection attempt is starting.
    ReconnectAttempt(u32),
    /// The transport is waiting before a reconnection attempt.
    Reconnecting(u32),
    /// A reconnection attempt failed.
    ReconnectError(String),
    /// The transport gave up reconnecting.
    ReconnectFailed,
    /// An application event arrived.
    Event(Frame),
}

impl TransportSignal {
    /// Name the signal is surfaced under; the event name for [`Event`](Self::Event).
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            TransportSignal::Connect => signals::CONNECT,
            TransportSignal::ConnectError(_) => signals::CONNECT_ERROR,
            TransportSignal::ConnectTimeout => signals::CONNECT_TIMEOUT,
            TransportSignal::Error(_) => signals::ERROR,
            TransportSignal::Disconnect(_) => signals::DISCONNECT,
            TransportSignal::Reconnect(_) => signals::RECONNECT,
            TransportSignal::ReconnectAttempt(_) => signals::RECONNECT_ATTEMPT,
            TransportSignal::Reconnecting(_) => signals::RECONNECTING,
            TransportSignal::ReconnectError(_) => signals::RECONNECT_ERROR,
            TransportSignal::ReconnectFailed => signals::RECONNECT_FAILED,
            TransportSignal::Event(frame) => &frame.event,
        }
    }

    /// The value carried by the signal, as a payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        match self {
            TransportSignal::Connect
            | TransportSignal::ConnectTimeout
            | TransportSignal::ReconnectFailed => Payload::Scalar(Default::default()),
            TransportSignal::ConnectError(reason)
            | TransportSignal::Error(reason)
            | TransportSignal::Disconnect(reason)
            | TransportSignal::ReconnectError(reason) => Payload::from(reason),
            TransportSignal::Reconnect(attempt)
            | TransportSignal::ReconnectAttempt(attempt)
            | TransportSignal::Reconnecting(attempt) => Payload::from(i64::from(attempt)),
            TransportSignal::Event(frame) => frame.payload,
        }
    }
}

/// Sending half of a signal stream.
pub type SignalSender = mpsc::UnboundedSender<TransportSignal>;

/// Receiving half of a signal stream.
pub type SignalReceiver = mpsc::UnboundedReceiver<TransportSignal>;

/// A way of reaching a broker.
pub trait Transport: Send + Sync {
    /// Start connecting to `url`.
    ///
    /// Must not block: the outcome of the attempt is reported through the
    /// returned signal stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the attempt cannot even be started.
    fn open(&self, url: &str) -> Result<(Box<dyn TransportHandle>, SignalReceiver), TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An open connection.
pub trait TransportHandle: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Queue a frame for sending. No delivery acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is a no-op.
    fn close(&self);

    /// Check if the connection has not been closed.
    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(TransportSignal::Connect.name(), "connect");
        assert_eq!(TransportSignal::Reconnecting(2).name(), "reconnecting");
        let event = TransportSignal::Event(Frame::new("hello", json!({})));
        assert_eq!(event.name(), "hello");
    }

    #[test]
    fn test_signal_payloads() {
        assert_eq!(
            TransportSignal::ReconnectAttempt(3).into_payload(),
            Payload::from(3_i64)
        );
        assert_eq!(
            TransportSignal::ConnectError("refused".into()).into_payload(),
            Payload::from("refused")
        );
        assert_eq!(
            TransportSignal::Connect.into_payload(),
            Payload::Scalar(json!(null))
        );
    }
}
