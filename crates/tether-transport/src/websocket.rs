//! WebSocket transport implementation.
//!
//! Client-side transport over tokio-tungstenite. One background task owns
//! the write half, one owns the read half; namespace handles talk to both
//! through shared state.

use async_trait::async_trait;
use bytes::BytesMut;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tether_protocol::{codec, BackendOptions, Frame, SyncRequest, PROTOCOL_VERSION};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, trace, warn};

use crate::traits::{
    Connection, ConnectionId, Namespace, SyncReply, SyncedHandler, Transport, TransportError,
};

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server URL (e.g., `ws://127.0.0.1:8080/ws`).
    pub url: String,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl WebSocketConfig {
    /// Create a config for the given URL with default limits.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Create a transport for the given URL with default config.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(WebSocketConfig::new(url))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError> {
        let (ws, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| TransportError::Other(format!("WebSocket connect failed: {}", e)))?;

        debug!(url = %self.config.url, "WebSocket established");

        let (mut sink, mut stream) = ws.split();

        // Writer task: everything outbound funnels through one mpsc.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
        });

        // Connect handshake: the server answers with a Connected frame.
        let hello = codec::encode(&Frame::connect(PROTOCOL_VERSION.major))?;
        out_tx
            .send(Message::Binary(hello.to_vec()))
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut read_buffer = BytesMut::with_capacity(4096);
        let connected = loop {
            if let Some(frame) = codec::decode_from(&mut read_buffer)? {
                break frame;
            }
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => read_buffer.extend_from_slice(&data),
                Some(Ok(Message::Text(text))) => read_buffer.extend_from_slice(text.as_bytes()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::ConnectionClosed),
            }
        };

        let Frame::Connected {
            connection_id,
            version,
            heartbeat,
        } = connected
        else {
            return Err(TransportError::Other(format!(
                "expected connected frame, got {:?}",
                connected.frame_type()
            )));
        };

        if version != PROTOCOL_VERSION.major {
            return Err(TransportError::Other(format!(
                "incompatible protocol version {} (client speaks {})",
                version, PROTOCOL_VERSION.major
            )));
        }

        debug!(connection = %connection_id, heartbeat, "Connected");

        let shared = Arc::new(Shared {
            out_tx,
            pending: DashMap::new(),
            synced: DashMap::new(),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        });

        // Reader task: buffer, decode, dispatch.
        let reader_shared = shared.clone();
        let max_message_size = self.config.max_message_size;
        tokio::spawn(async move {
            // Frames may already sit behind the Connected frame.
            if drain_frames(&reader_shared, &mut read_buffer).is_err() {
                reader_shared.open.store(false, Ordering::SeqCst);
                reader_shared.pending.clear();
                return;
            }

            loop {
                match stream.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > max_message_size {
                            warn!(
                                size = data.len(),
                                max = max_message_size,
                                "Inbound message too large, closing"
                            );
                            break;
                        }
                        read_buffer.extend_from_slice(&data);
                        if drain_frames(&reader_shared, &mut read_buffer).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        // For compatibility, treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());
                        if drain_frames(&reader_shared, &mut read_buffer).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = reader_shared.out_tx.send(Message::Pong(data));
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!("Received close frame");
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            reader_shared.open.store(false, Ordering::SeqCst);
            // Wake every in-flight request with a closed error.
            reader_shared.pending.clear();
        });

        Ok(Arc::new(WebSocketConnection {
            id: ConnectionId::new(connection_id),
            shared,
        }))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// State shared between the connection, its namespaces and the I/O tasks.
struct Shared {
    out_tx: mpsc::UnboundedSender<Message>,
    /// In-flight requests awaiting acknowledgment, keyed by request ID.
    pending: DashMap<u64, oneshot::Sender<Frame>>,
    /// Synced handlers, keyed by namespace name.
    synced: DashMap<String, Vec<SyncedHandler>>,
    next_id: AtomicU64,
    open: AtomicBool,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let data = codec::encode(frame)?;
        self.out_tx
            .send(Message::Binary(data.to_vec()))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Send a frame and wait for the matching acknowledgment.
    ///
    /// There is deliberately no timeout here: an unacknowledged request
    /// stays pending until the connection closes.
    async fn request(&self, id: u64, frame: &Frame) -> Result<Frame, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.send(frame) {
            self.pending.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| TransportError::ConnectionClosed)
    }
}

/// Decode every complete frame in the buffer and dispatch it.
fn drain_frames(shared: &Arc<Shared>, buf: &mut BytesMut) -> Result<(), TransportError> {
    loop {
        match codec::decode_from(buf) {
            Ok(Some(frame)) => dispatch(shared, frame),
            Ok(None) => return Ok(()),
            Err(e) => {
                error!(error = %e, "Protocol error on inbound frame");
                return Err(e.into());
            }
        }
    }
}

fn dispatch(shared: &Arc<Shared>, frame: Frame) {
    if let Some(id) = frame.ack_id() {
        if let Some((_, tx)) = shared.pending.remove(&id) {
            let _ = tx.send(frame);
        } else {
            trace!(id, "Dropping ack with no pending request");
        }
        return;
    }

    match frame {
        Frame::Synced {
            namespace,
            method,
            payload,
        } => {
            trace!(namespace = %namespace, method = %method, "Synced push");
            if let Some(handlers) = shared.synced.get(&namespace) {
                for handler in handlers.iter() {
                    handler(method, &payload);
                }
            }
        }
        Frame::Ping { timestamp } => {
            let _ = shared.send(&Frame::pong(timestamp));
        }
        Frame::Pong { .. } => {}
        other => {
            trace!(frame_type = ?other.frame_type(), "Ignoring unexpected frame");
        }
    }
}

/// A WebSocket base connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    shared: Arc<Shared>,
}

impl Connection for WebSocketConnection {
    fn of(&self, name: &str) -> Arc<dyn Namespace> {
        Arc::new(WebSocketNamespace {
            name: name.to_string(),
            channel: Mutex::new(None),
            shared: self.shared.clone(),
        })
    }

    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }
}

/// A namespace sub-connection over a WebSocket base connection.
///
/// Remembers the channel it joined so subsequent sync requests carry the
/// same scope.
pub struct WebSocketNamespace {
    name: String,
    channel: Mutex<Option<String>>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Namespace for WebSocketNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn listen(&self, channel: Option<&str>) -> Result<BackendOptions, TransportError> {
        *self.channel.lock().unwrap() = channel.map(str::to_string);

        let id = self.shared.next_id();
        let frame = Frame::listen(id, &self.name, channel.map(str::to_string));

        debug!(namespace = %self.name, channel = ?channel, "Listen");

        match self.shared.request(id, &frame).await? {
            Frame::ListenAck { options, .. } => Ok(options),
            Frame::Error { code, message, .. } => Err(TransportError::Other(format!(
                "listen rejected ({}): {}",
                code, message
            ))),
            other => Err(TransportError::ReceiveFailed(format!(
                "unexpected ack frame {:?}",
                other.frame_type()
            ))),
        }
    }

    async fn sync(&self, request: SyncRequest) -> Result<SyncReply, TransportError> {
        let id = self.shared.next_id();
        let channel = self.channel.lock().unwrap().clone();
        let frame = Frame::sync(id, &self.name, channel, request);

        match self.shared.request(id, &frame).await? {
            Frame::SyncAck { error, payload, .. } => Ok(SyncReply { error, payload }),
            Frame::Error { code, message, .. } => Err(TransportError::Other(format!(
                "sync rejected ({}): {}",
                code, message
            ))),
            other => Err(TransportError::ReceiveFailed(format!(
                "unexpected ack frame {:?}",
                other.frame_type()
            ))),
        }
    }

    fn on_synced(&self, handler: SyncedHandler) {
        self.shared
            .synced
            .entry(self.name.clone())
            .or_default()
            .push(handler);
    }
}
