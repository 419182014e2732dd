//! # spacebro-client
//!
//! Client SDK for spacebro, a realtime publish/subscribe fabric where
//! named clients join a channel on a broker and exchange named events.
//!
//! ## Features
//!
//! - **Channels** - register on a channel, publish to it or to one client
//! - **Listeners** - per-event, once and wildcard listeners
//! - **Hooks** - prioritized packers and unpackers transform payloads
//! - **Reconnection** - lifecycle signals surface as listenable events
//! - **Settings** - TOML configuration files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use serde_json::json;
//! use spacebro_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), spacebro_client::ClientError> {
//!     let config = ClientConfig::new("media-stream", "player");
//!     let client = Client::create("localhost", 3333, config).await?;
//!
//!     client.on("play", |event| {
//!         println!("play {} from {:?}", event.data.unboxed(), event.sender());
//!     });
//!     client.emit("ready", json!({ "screen": 1 }))?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod legacy;
pub mod metrics;

#[cfg(test)]
mod test_utils;

pub use client::Client;
pub use config::{ClientConfig, TransportSettings};
pub use connection::{endpoint_url, ConnectionState};
pub use error::ClientError;
pub use legacy::DefaultClient;

pub use spacebro_core::{Event, EventKey, Hook, HookContext, HookError, HookResult, WILDCARD};
pub use spacebro_protocol::{ClientInfo, Encoding, Payload};
pub use spacebro_transport::{signals, MemoryBroker, Transport, TransportSignal};
