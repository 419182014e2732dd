//! Helpers shared by the client tests.

use spacebro_core::Event;
use spacebro_transport::MemoryBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::{Client, ClientConfig};

/// A listener that forwards every event it sees to the returned receiver.
pub(crate) fn recorder() -> (
    impl Fn(&Event) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Event>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: &Event| {
        let _ = tx.send(event.clone());
    };
    (handler, rx)
}

/// Wait for the next event seen by a recorder.
pub(crate) async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("recorder dropped")
}

/// Let every spawned pump drain its queued signals.
pub(crate) async fn settle_tasks() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// A client on `broker` that has connected and registered.
pub(crate) async fn connected(broker: &MemoryBroker, config: ClientConfig) -> Client {
    let client = Client::with_transport(config, Arc::new(broker.clone()));
    let (handler, mut rx) = recorder();
    client.add_once("connect", handler, None);
    client.connect("memory", 1).expect("connect");
    next(&mut rx).await;
    client
}
