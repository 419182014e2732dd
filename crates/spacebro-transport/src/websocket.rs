//! WebSocket transport implementation.
//!
//! This module provides a reconnecting WebSocket client using
//! tokio-tungstenite. Each opened connection runs as one tokio task that
//! owns the socket, writes queued frames and reports signals.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use spacebro_protocol::{codec, Encoding, Frame, FrameCodec, WireMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

use crate::traits::{
    ConnectionId, SignalReceiver, SignalSender, Transport, TransportError, TransportHandle,
    TransportSignal, CLIENT_CLOSE_REASON,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How long a single connection attempt may take.
    pub connect_timeout: Duration,
    /// Whether to reconnect after a failed attempt or a lost connection.
    pub reconnection: bool,
    /// Maximum consecutive reconnection attempts; `None` retries forever.
    pub reconnection_attempts: Option<u32>,
    /// Delay before the first reconnection attempt.
    pub reconnection_delay: Duration,
    /// Upper bound for the doubling reconnection delay.
    pub reconnection_delay_max: Duration,
    /// Encoding of outgoing frames.
    pub encoding: Encoding,
    /// Maximum incoming message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            reconnection: true,
            reconnection_attempts: None,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            encoding: Encoding::Json,
            max_message_size: codec::MAX_FRAME_SIZE,
        }
    }
}

impl WebSocketConfig {
    /// Delay before reconnection attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.reconnection_delay
            .saturating_mul(factor)
            .min(self.reconnection_delay_max)
    }
}

/// WebSocket transport.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Get the transport configuration.
    #[must_use]
    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str) -> Result<(Box<dyn TransportHandle>, SignalReceiver), TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(url.to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let id = ConnectionId::generate();

        let session = Session {
            id: id.clone(),
            url: url.to_string(),
            config: self.config.clone(),
            codec: FrameCodec::new(self.config.encoding),
            signals: signal_tx,
            commands: command_rx,
            open: open.clone(),
        };
        runtime.spawn(session.run());

        debug!(connection = %id, url = %url, "WebSocket connection opening");

        Ok((
            Box::new(WebSocketHandle {
                id,
                commands: command_tx,
                open,
            }),
            signal_rx,
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

enum Command {
    Send(Frame),
    Close,
}

/// Handle to a WebSocket connection task.
pub struct WebSocketHandle {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

impl TransportHandle for WebSocketHandle {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Why a connected socket stopped.
enum SessionEnd {
    /// Closed through the handle.
    Closed,
    /// Lost, with a reason.
    Lost(String),
}

struct Session {
    id: ConnectionId,
    url: String,
    config: WebSocketConfig,
    codec: FrameCodec,
    signals: SignalSender,
    commands: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
}

impl Session {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                self.emit(TransportSignal::Reconnecting(attempt));
                if !self.wait(self.config.backoff(attempt)).await {
                    return;
                }
                self.emit(TransportSignal::ReconnectAttempt(attempt));
            }

            match tokio::time::timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
                .await
            {
                Ok(Ok((socket, _response))) => {
                    if !self.is_open() {
                        debug!(connection = %self.id, "Closed while connecting");
                        return;
                    }
                    info!(connection = %self.id, url = %self.url, "WebSocket connected");
                    if attempt > 0 {
                        self.emit(TransportSignal::Reconnect(attempt));
                    }
                    self.emit(TransportSignal::Connect);
                    attempt = 0;

                    match self.pump(socket).await {
                        SessionEnd::Closed => {
                            self.emit(TransportSignal::Disconnect(CLIENT_CLOSE_REASON.into()));
                            return;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(connection = %self.id, reason = %reason, "WebSocket lost");
                            self.emit(TransportSignal::Disconnect(reason));
                        }
                    }
                }
                Ok(Err(e)) => {
                    debug!(connection = %self.id, error = %e, attempt, "Connection attempt failed");
                    if attempt == 0 {
                        self.emit(TransportSignal::ConnectError(e.to_string()));
                    } else {
                        self.emit(TransportSignal::ReconnectError(e.to_string()));
                    }
                }
                Err(_) => {
                    debug!(connection = %self.id, attempt, "Connection attempt timed out");
                    if attempt == 0 {
                        self.emit(TransportSignal::ConnectTimeout);
                    } else {
                        self.emit(TransportSignal::ReconnectError("timeout".into()));
                    }
                }
            }

            if !self.is_open() || self.signals.is_closed() {
                return;
            }
            if !self.config.reconnection {
                self.open.store(false, Ordering::SeqCst);
                return;
            }

            attempt += 1;
            if let Some(max) = self.config.reconnection_attempts {
                if attempt > max {
                    warn!(connection = %self.id, attempts = max, "Giving up reconnecting");
                    self.emit(TransportSignal::ReconnectFailed);
                    self.open.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    /// Sleep for `delay`, discarding sends. Returns `false` if closed meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return self.is_open(),
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        trace!(connection = %self.id, event = %frame.event, "Dropping frame while disconnected");
                    }
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn pump(&mut self, socket: Socket) -> SessionEnd {
        let (mut sink, mut source) = socket.split();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(frame)) => {
                        let message = match self.codec.encode(&frame) {
                            Ok(WireMessage::Text(text)) => Message::Text(text),
                            Ok(WireMessage::Binary(data)) => Message::Binary(data.to_vec()),
                            Err(e) => {
                                warn!(connection = %self.id, event = %frame.event, error = %e, "Failed to encode frame");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(message).await {
                            return SessionEnd::Lost(format!("transport error: {}", e));
                        }
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = sink.close().await {
                            debug!(connection = %self.id, error = %e, "Close handshake failed");
                        }
                        return SessionEnd::Closed;
                    }
                },
                message = source.next() => match message {
                    Some(Ok(Message::Text(text))) => self.deliver(WireMessage::Text(text)),
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > self.config.max_message_size {
                            warn!(
                                "Message too large: {} bytes (max: {})",
                                data.len(),
                                self.config.max_message_size
                            );
                            continue;
                        }
                        self.deliver(WireMessage::Binary(Bytes::from(data)));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        return SessionEnd::Lost("io server disconnect".into());
                    }
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        return SessionEnd::Lost("transport close".into());
                    }
                    Some(Err(e)) => {
                        self.emit(TransportSignal::Error(e.to_string()));
                        return SessionEnd::Lost("transport error".into());
                    }
                },
            }
        }
    }

    fn deliver(&self, message: WireMessage) {
        match self.codec.decode(&message) {
            Ok(frame) => {
                trace!(connection = %self.id, event = %frame.event, "Frame received");
                self.emit(TransportSignal::Event(frame));
            }
            Err(e) => warn!(connection = %self.id, error = %e, "Dropping undecodable message"),
        }
    }

    fn emit(&self, signal: TransportSignal) {
        if self.signals.send(signal).is_err() {
            trace!(connection = %self.id, "Signal receiver dropped");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
