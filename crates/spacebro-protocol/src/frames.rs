//! Frame types exchanged with a spacebro broker.
//!
//! Everything on the wire is a named event carrying one payload. The
//! registration handshake is itself an event, `register`, whose payload is a
//! serialized [`Register`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::payload::Payload;

/// Event name of the registration handshake.
pub const REGISTER_EVENT: &str = "register";

/// Identity of a client on a channel.
///
/// Only `name` is interpreted by the client; any other fields are passed
/// through to the broker untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name, used as `_from` on outgoing events.
    #[serde(default)]
    pub name: Option<String>,
    /// Additional descriptive fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientInfo {
    /// Create a client identity with a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            extra: Map::new(),
        }
    }
}

/// Registration message sent right after the transport connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    /// Channel to join.
    pub channel_name: Option<String>,
    /// Client identity.
    pub client: ClientInfo,
    /// Duplicate of `client.name` for brokers predating `client`.
    pub client_name: Option<String>,
}

impl Register {
    /// Create a registration for a channel and client.
    #[must_use]
    pub fn new(channel_name: Option<String>, client: ClientInfo) -> Self {
        let client_name = client.name.clone();
        Self {
            channel_name,
            client,
            client_name,
        }
    }

    /// Read a registration back out of a `register` payload.
    #[must_use]
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        serde_json::from_value(payload.clone().into_value()).ok()
    }
}

impl From<Register> for Payload {
    fn from(register: Register) -> Self {
        // A struct of strings and maps always serializes to an object.
        serde_json::to_value(register)
            .map(Payload::from)
            .unwrap_or_default()
    }
}

/// A named event and its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub payload: Payload,
}

impl Frame {
    /// Create a new event frame.
    #[must_use]
    pub fn new(event: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            event: event.into(),
            payload: payload.into(),
        }
    }

    /// Create a registration frame.
    #[must_use]
    pub fn register(register: Register) -> Self {
        Self::new(REGISTER_EVENT, register)
    }

    /// Whether this is the registration handshake.
    #[must_use]
    pub fn is_register(&self) -> bool {
        self.event == REGISTER_EVENT
    }
}
