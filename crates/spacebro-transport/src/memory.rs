//! In-process broker.
//!
//! [`MemoryBroker`] is a [`Transport`] whose connections never leave the
//! process. It understands the `register` handshake and routes every other
//! event to the clients registered on the sender's channel, the sender
//! included, or only to the named recipient when `_to` is set. It can also
//! simulate connection loss and refused connections.

use spacebro_protocol::{Frame, Register};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::traits::{
    ConnectionId, SignalReceiver, SignalSender, Transport, TransportError, TransportHandle,
    TransportSignal, CLIENT_CLOSE_REASON,
};

struct Peer {
    url: String,
    channel: Option<String>,
    client: Option<String>,
    registered: bool,
    up: bool,
    signals: SignalSender,
}

#[derive(Default)]
struct BrokerState {
    peers: HashMap<ConnectionId, Peer>,
    refusal: Vec<TransportSignal>,
}

/// An in-memory broker shared by every handle it opens.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make later `open` calls fail with `connect_error(reason)`; `None` accepts again.
    pub fn refuse_connections(&self, reason: Option<String>) {
        self.fail_connections(reason.map(TransportSignal::ConnectError).into_iter().collect());
    }

    /// Make later `open` calls report `signals` instead of `connect`; an
    /// empty list accepts again.
    pub fn fail_connections(&self, signals: Vec<TransportSignal>) {
        self.state().refusal = signals;
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state().peers.len()
    }

    /// Client names registered on `channel`.
    #[must_use]
    pub fn members(&self, channel: Option<&str>) -> Vec<Option<String>> {
        self.state()
            .peers
            .values()
            .filter(|p| p.registered && p.channel.as_deref() == channel)
            .map(|p| p.client.clone())
            .collect()
    }

    /// URLs of open connections.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.state().peers.values().map(|p| p.url.clone()).collect()
    }

    /// Simulate a network drop: every connection reports `disconnect`
    /// followed by `reconnecting`, and stops receiving events.
    pub fn drop_connections(&self) {
        let mut state = self.state();
        for peer in state.peers.values_mut().filter(|p| p.up) {
            peer.up = false;
            let _ = peer.signals.send(TransportSignal::Disconnect("transport close".into()));
            let _ = peer.signals.send(TransportSignal::Reconnecting(1));
        }
        debug!("Dropped all memory connections");
    }

    /// End a simulated drop: every dropped connection reports
    /// `reconnect_attempt`, `reconnect` and `connect`.
    pub fn restore_connections(&self) {
        let mut state = self.state();
        for peer in state.peers.values_mut().filter(|p| !p.up) {
            peer.up = true;
            let _ = peer.signals.send(TransportSignal::ReconnectAttempt(1));
            let _ = peer.signals.send(TransportSignal::Reconnect(1));
            let _ = peer.signals.send(TransportSignal::Connect);
        }
        debug!("Restored all memory connections");
    }

    /// Push a raw signal to every open connection.
    pub fn inject(&self, signal: TransportSignal) {
        for peer in self.state().peers.values() {
            let _ = peer.signals.send(signal.clone());
        }
    }

    /// Deliver a frame to every connection registered on `channel`, as the
    /// broker itself.
    pub fn publish(&self, channel: Option<&str>, frame: Frame) -> usize {
        let state = self.state();
        let recipients: Vec<&Peer> = state
            .peers
            .values()
            .filter(|p| p.up && p.registered && p.channel.as_deref() == channel)
            .collect();
        for peer in &recipients {
            let _ = peer.signals.send(TransportSignal::Event(frame.clone()));
        }
        recipients.len()
    }

    fn route(&self, from: &ConnectionId, frame: Frame) -> Result<(), TransportError> {
        let mut state = self.state();

        if frame.is_register() {
            let peer = state
                .peers
                .get_mut(from)
                .ok_or(TransportError::ConnectionClosed)?;
            let register = Register::from_payload(&frame.payload).ok_or_else(|| {
                TransportError::SendFailed("malformed register payload".into())
            })?;
            debug!(connection = %from, channel = ?register.channel_name, client = ?register.client.name, "Registered");
            peer.channel = register.channel_name;
            peer.client = register.client.name.or(register.client_name);
            peer.registered = true;
            return Ok(());
        }

        let channel = match state.peers.get(from) {
            Some(peer) if peer.up => peer.channel.clone(),
            Some(_) => return Err(TransportError::SendFailed("connection is down".into())),
            None => return Err(TransportError::ConnectionClosed),
        };
        let recipient = frame.payload.recipient().map(str::to_string);

        let mut delivered = 0;
        for peer in state.peers.values() {
            if !peer.up || !peer.registered || peer.channel != channel {
                continue;
            }
            if recipient.is_some() && peer.client != recipient {
                continue;
            }
            let _ = peer.signals.send(TransportSignal::Event(frame.clone()));
            delivered += 1;
        }
        trace!(connection = %from, event = %frame.event, delivered, "Routed");

        Ok(())
    }

    fn detach(&self, id: &ConnectionId) {
        if let Some(peer) = self.state().peers.remove(id) {
            let _ = peer
                .signals
                .send(TransportSignal::Disconnect(CLIENT_CLOSE_REASON.into()));
        }
    }
}

impl Transport for MemoryBroker {
    fn open(&self, url: &str) -> Result<(Box<dyn TransportHandle>, SignalReceiver), TransportError> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let id = ConnectionId::generate();
        let open = Arc::new(AtomicBool::new(true));

        let mut state = self.state();
        if state.refusal.is_empty() {
            let _ = signal_tx.send(TransportSignal::Connect);
            state.peers.insert(
                id.clone(),
                Peer {
                    url: url.to_string(),
                    channel: None,
                    client: None,
                    registered: false,
                    up: true,
                    signals: signal_tx,
                },
            );
        } else {
            open.store(false, Ordering::SeqCst);
            for signal in &state.refusal {
                let _ = signal_tx.send(signal.clone());
            }
        }
        drop(state);

        debug!(connection = %id, url = %url, "Memory connection opened");

        Ok((
            Box::new(MemoryHandle {
                id,
                broker: self.clone(),
                open,
            }),
            signal_rx,
        ))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryHandle {
    id: ConnectionId,
    broker: MemoryBroker,
    open: Arc<AtomicBool>,
}

impl TransportHandle for MemoryHandle {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.broker.route(&self.id, frame)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.detach(&self.id);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spacebro_protocol::{ClientInfo, Payload};

    fn register(handle: &dyn TransportHandle, channel: &str, name: &str) {
        let register = Register::new(Some(channel.into()), ClientInfo::named(name));
        handle.send(Frame::register(register)).unwrap();
    }

    #[test]
    fn test_open_signals_connect() {
        let broker = MemoryBroker::new();
        let (_handle, mut signals) = broker.open("ws://memory:1").unwrap();
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::Connect);
        assert_eq!(broker.connection_count(), 1);
    }

    #[test]
    fn test_refused_connection() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(Some("refused".into()));

        let (handle, mut signals) = broker.open("ws://memory:1").unwrap();
        assert_eq!(
            signals.try_recv().unwrap(),
            TransportSignal::ConnectError("refused".into())
        );
        assert!(!handle.is_open());
        assert_eq!(broker.connection_count(), 0);
    }

    #[test]
    fn test_failed_connection_reports_every_signal() {
        let broker = MemoryBroker::new();
        broker.fail_connections(vec![
            TransportSignal::ConnectTimeout,
            TransportSignal::Error("late".into()),
        ]);

        let (handle, mut signals) = broker.open("ws://memory:1").unwrap();
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::ConnectTimeout);
        assert_eq!(
            signals.try_recv().unwrap(),
            TransportSignal::Error("late".into())
        );
        assert!(!handle.is_open());

        broker.fail_connections(Vec::new());
        let (_handle, mut signals) = broker.open("ws://memory:1").unwrap();
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::Connect);
    }

    #[test]
    fn test_inject_reaches_open_connections() {
        let broker = MemoryBroker::new();
        let (_a, mut signals) = broker.open("ws://memory:1").unwrap();
        signals.try_recv().unwrap();

        broker.inject(TransportSignal::ReconnectFailed);
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::ReconnectFailed);
    }

    #[test]
    fn test_publish_to_channel() {
        let broker = MemoryBroker::new();
        let (a, mut a_signals) = broker.open("ws://memory:1").unwrap();
        let (b, mut b_signals) = broker.open("ws://memory:1").unwrap();
        register(a.as_ref(), "room", "A");
        register(b.as_ref(), "elsewhere", "B");
        a_signals.try_recv().unwrap();
        b_signals.try_recv().unwrap();

        let frame = Frame::new("news", json!({"headline": "up"}));
        assert_eq!(broker.publish(Some("room"), frame.clone()), 1);
        assert_eq!(a_signals.try_recv().unwrap(), TransportSignal::Event(frame));
        assert!(b_signals.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_within_channel() {
        let broker = MemoryBroker::new();
        let (a, mut a_signals) = broker.open("ws://memory:1").unwrap();
        let (b, mut b_signals) = broker.open("ws://memory:1").unwrap();
        let (c, mut c_signals) = broker.open("ws://memory:1").unwrap();
        register(a.as_ref(), "room", "A");
        register(b.as_ref(), "room", "B");
        register(c.as_ref(), "elsewhere", "C");
        for signals in [&mut a_signals, &mut b_signals, &mut c_signals] {
            assert_eq!(signals.try_recv().unwrap(), TransportSignal::Connect);
        }

        let payload = Payload::from(json!({"x": 1})).with_envelope(Some("A"), None);
        a.send(Frame::new("hello", payload.clone())).unwrap();

        let expected = TransportSignal::Event(Frame::new("hello", payload));
        assert_eq!(a_signals.try_recv().unwrap(), expected);
        assert_eq!(b_signals.try_recv().unwrap(), expected);
        assert!(c_signals.try_recv().is_err());
        assert_eq!(broker.members(Some("room")).len(), 2);
    }

    #[test]
    fn test_targeted_send() {
        let broker = MemoryBroker::new();
        let (a, mut a_signals) = broker.open("ws://memory:1").unwrap();
        let (b, mut b_signals) = broker.open("ws://memory:1").unwrap();
        register(a.as_ref(), "room", "A");
        register(b.as_ref(), "room", "B");
        a_signals.try_recv().unwrap();
        b_signals.try_recv().unwrap();

        let payload = Payload::from(json!({})).with_envelope(Some("A"), Some("B"));
        a.send(Frame::new("direct", payload)).unwrap();

        assert!(a_signals.try_recv().is_err());
        assert!(matches!(b_signals.try_recv(), Ok(TransportSignal::Event(_))));
    }

    #[test]
    fn test_drop_and_restore() {
        let broker = MemoryBroker::new();
        let (a, mut signals) = broker.open("ws://memory:1").unwrap();
        register(a.as_ref(), "room", "A");
        signals.try_recv().unwrap();

        broker.drop_connections();
        assert!(matches!(signals.try_recv(), Ok(TransportSignal::Disconnect(_))));
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::Reconnecting(1));
        assert!(a.send(Frame::new("hello", json!({}))).is_err());

        broker.restore_connections();
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::ReconnectAttempt(1));
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::Reconnect(1));
        assert_eq!(signals.try_recv().unwrap(), TransportSignal::Connect);
    }

    #[test]
    fn test_close_reports_disconnect_once() {
        let broker = MemoryBroker::new();
        let (a, mut signals) = broker.open("ws://memory:1").unwrap();
        signals.try_recv().unwrap();

        a.close();
        a.close();

        assert_eq!(
            signals.try_recv().unwrap(),
            TransportSignal::Disconnect(CLIENT_CLOSE_REASON.into())
        );
        assert!(signals.try_recv().is_err());
        assert_eq!(broker.connection_count(), 0);
        assert!(matches!(
            a.send(Frame::new("x", json!({}))),
            Err(TransportError::ConnectionClosed)
        ));
    }
}
