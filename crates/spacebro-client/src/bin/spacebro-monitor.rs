//! # spacebro-monitor
//!
//! Joins a channel, logs every event seen on it and greets the channel.
//!
//! ## Usage
//!
//! ```bash
//! # Connect to localhost:3333 with spacebro.toml settings
//! spacebro-monitor
//!
//! # Connect elsewhere
//! spacebro-monitor 10.0.0.2 8888
//!
//! # Use an explicit settings file
//! SPACEBRO_SETTINGS=~/spacebro.toml spacebro-monitor
//! ```

use anyhow::{Context, Result};
use serde_json::json;
use spacebro_client::{signals, Client, ClientConfig, WILDCARD};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spacebro_client=info,spacebro_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = match args.next() {
        Some(port) => port.parse().context("port must be a number")?,
        None => 3333,
    };

    let mut config = ClientConfig::load()?.unwrap_or_default();
    if config.client.name.is_none() {
        config.client.name = Some("spacebro-monitor".to_string());
    }

    let client = Client::create(&address, port, config).await?;
    tracing::info!(
        "Monitoring channel {:?} on {}:{}",
        client.config().channel_name,
        address,
        port
    );

    client.on(WILDCARD, |event| {
        tracing::info!(event = %event.name, from = ?event.sender(), data = %event.data.unboxed(), "event");
    });
    client.on(signals::RECONNECT, |_| tracing::info!("back online"));
    client.emit("hello", json!({ "monitor": true }))?;

    tokio::signal::ctrl_c().await?;
    client.disconnect();

    Ok(())
}
