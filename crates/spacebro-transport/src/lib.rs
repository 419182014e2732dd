//! # spacebro-transport
//!
//! Transport abstraction layer for spacebro clients.
//!
//! This crate provides the connection primitive the client is built on:
//!
//! - **WebSocket** - reconnecting client over tokio-tungstenite
//! - **Memory** - an in-process broker, for tests and loopback setups
//!
//! ## Transport Abstraction
//!
//! All transports implement the `Transport` and `TransportHandle` traits.
//! Opening a connection returns immediately; everything that happens
//! afterwards arrives as `TransportSignal`s on a channel.
//!
//! ```rust,ignore
//! use spacebro_transport::{Transport, TransportSignal, WebSocketTransport};
//!
//! let (handle, mut signals) = WebSocketTransport::default().open("ws://localhost:3333")?;
//! while let Some(signal) = signals.recv().await {
//!     if let TransportSignal::Event(frame) = signal {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryBroker;
pub use traits::{
    signals, ConnectionId, SignalReceiver, SignalSender, Transport, TransportError,
    TransportHandle, TransportSignal, CLIENT_CLOSE_REASON,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
