//! Connection handlers for the tether server.
//!
//! This module handles the connection lifecycle and frame processing: the
//! connect exchange, listen handshakes, sync requests and the synced
//! fan-out to other room members.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::rooms::Rooms;
use crate::store::Store;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tether_protocol::{codec, Frame, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Room and connection registry.
    pub rooms: Rooms,
    /// The model store.
    pub store: Store,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            rooms: Rooms::new(),
            store: Store::new(),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Tether server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID
    let connection_id = format!(
        "conn_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Every outbound frame funnels through one channel: direct replies and
    // room broadcasts alike.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    state.rooms.register(&connection_id, out_tx.clone());

    // Send Connected frame
    let connected_frame = Frame::connected(
        &connection_id,
        PROTOCOL_VERSION.major,
        state.config.heartbeat.interval_ms as u32,
    );
    if let Ok(data) = codec::encode(&connected_frame) {
        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
            error!(connection = %connection_id, "Failed to send Connected frame");
            state.rooms.remove_connection(&connection_id);
            return;
        }
    }

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Deliver outbound frames
            Some(frame) = out_rx.recv() => {
                match codec::encode(&frame) {
                    Ok(data) => {
                        metrics::record_message(data.len(), "outbound");
                        if sender.send(Message::Binary(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, error = %e, "Outbound encode error");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > state.config.limits.max_message_size {
                            warn!(
                                connection = %connection_id,
                                size = data.len(),
                                "Message too large"
                            );
                            metrics::record_error("oversized_message");
                            break;
                        }

                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        // Try to decode frames
                        while let Ok(Some(frame)) = codec::decode_from(&mut read_buffer) {
                            metrics::record_message(data.len(), "inbound");
                            handle_frame(&frame, &connection_id, &state, &out_tx);
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Treat text as binary
                        read_buffer.extend_from_slice(text.as_bytes());

                        while let Ok(Some(frame)) = codec::decode_from(&mut read_buffer) {
                            handle_frame(&frame, &connection_id, &state, &out_tx);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: leave rooms, drop the outbound sender
    state.rooms.remove_connection(&connection_id);
    metrics::set_active_rooms(state.rooms.room_count());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle a decoded frame.
fn handle_frame(
    frame: &Frame,
    connection_id: &str,
    state: &Arc<AppState>,
    out_tx: &mpsc::UnboundedSender<Frame>,
) {
    match frame {
        Frame::Listen {
            id,
            namespace,
            channel,
        } => {
            debug!(
                connection = %connection_id,
                namespace = %namespace,
                channel = ?channel,
                "Listen request"
            );

            if state.rooms.joined_count(connection_id)
                >= state.config.limits.max_listens_per_connection
            {
                warn!(connection = %connection_id, "Listen limit reached");
                let _ = out_tx.send(Frame::error(*id, 1003, "Listen limit reached"));
                return;
            }

            state
                .rooms
                .join(connection_id, namespace, channel.as_deref());

            let entry = state.config.backend(namespace);
            let options = tether_protocol::BackendOptions::new(entry.event);

            metrics::record_listen();
            metrics::set_active_rooms(state.rooms.room_count());

            let _ = out_tx.send(Frame::listen_ack(*id, options));
        }

        Frame::Sync {
            id,
            namespace,
            channel,
            request,
        } => {
            debug!(
                connection = %connection_id,
                namespace = %namespace,
                method = %request.method,
                "Sync request"
            );

            let entry = state.config.backend(namespace);
            let scope = Store::scope_key(namespace, channel.as_deref());

            match state
                .store
                .apply(&scope, &entry.id_attribute, request.method, &request.model)
            {
                Ok(result) => {
                    let _ = out_tx.send(Frame::sync_ack(*id, result.clone()));

                    // Mutations fan out to the rest of the room; the
                    // originator already has the result in its ack.
                    if request.method.is_mutation() {
                        let push = Frame::synced(namespace.clone(), request.method, result);
                        let recipients = state.rooms.broadcast(
                            namespace,
                            channel.as_deref(),
                            &push,
                            connection_id,
                        );
                        debug!(
                            connection = %connection_id,
                            namespace = %namespace,
                            recipients,
                            "Synced broadcast"
                        );
                    }
                }
                Err(e) => {
                    debug!(connection = %connection_id, error = %e, "Sync rejected");
                    metrics::record_error("sync");
                    let _ = out_tx.send(Frame::sync_rejected(
                        *id,
                        json!(e.to_string()),
                        request.model.clone(),
                    ));
                }
            }
        }

        Frame::Ping { timestamp } => {
            let _ = out_tx.send(Frame::pong(*timestamp));
        }

        Frame::Pong { .. } => {
            // Keepalive only
        }

        Frame::Connect { version } => {
            debug!(
                connection = %connection_id,
                version = version,
                "Connect frame (already connected)"
            );
            // Connection already established, ignore
        }

        other => {
            warn!(
                connection = %connection_id,
                frame_type = ?other.frame_type(),
                "Unexpected frame type"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_protocol::{Method, SyncRequest};

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(Config::default()))
    }

    #[tokio::test]
    async fn test_listen_ack_carries_configured_event() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        state.rooms.register("a", out_tx.clone());

        handle_frame(
            &Frame::listen(1, "todos", None),
            "a",
            &state,
            &out_tx,
        );

        match out_rx.try_recv().unwrap() {
            Frame::ListenAck { id, options } => {
                assert_eq!(id, 1);
                assert_eq!(options.event, "backend");
            }
            other => panic!("Expected ListenAck, got {:?}", other),
        }
        assert_eq!(state.rooms.member_count("todos", None), 1);
    }

    #[tokio::test]
    async fn test_sync_create_acks_and_broadcasts_to_other_members() {
        let state = test_state();

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        state.rooms.register("a", a_tx.clone());
        handle_frame(&Frame::listen(1, "todos", Some("room-1".into())), "a", &state, &a_tx);
        let _ = a_rx.try_recv(); // ListenAck

        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        state.rooms.register("b", b_tx.clone());
        handle_frame(&Frame::listen(1, "todos", Some("room-1".into())), "b", &state, &b_tx);
        let _ = b_rx.try_recv(); // ListenAck

        let request = SyncRequest::new(Method::Create, json!({"name": "a"}));
        handle_frame(
            &Frame::sync(2, "todos", Some("room-1".into()), request),
            "a",
            &state,
            &a_tx,
        );

        // Originator gets the ack with the stored record.
        let created = match a_rx.try_recv().unwrap() {
            Frame::SyncAck { id, error, payload } => {
                assert_eq!(id, 2);
                assert!(error.is_none());
                assert!(payload.get("id").is_some());
                payload
            }
            other => panic!("Expected SyncAck, got {:?}", other),
        };
        // No synced echo back to the originator.
        assert!(a_rx.try_recv().is_err());

        // The other member gets the synced push.
        match b_rx.try_recv().unwrap() {
            Frame::Synced {
                namespace,
                method,
                payload,
            } => {
                assert_eq!(namespace, "todos");
                assert_eq!(method, Method::Create);
                assert_eq!(payload, created);
            }
            other => panic!("Expected Synced, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sync_rejection_carries_error_and_model() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        state.rooms.register("a", out_tx.clone());

        let request = SyncRequest::new(Method::Update, json!({"id": 404}));
        handle_frame(&Frame::sync(3, "todos", None, request), "a", &state, &out_tx);

        match out_rx.try_recv().unwrap() {
            Frame::SyncAck { id, error, payload } => {
                assert_eq!(id, 3);
                assert!(error.is_some());
                assert_eq!(payload, json!({"id": 404}));
            }
            other => panic!("Expected SyncAck, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_does_not_broadcast() {
        let state = test_state();

        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        state.rooms.register("a", a_tx.clone());
        handle_frame(&Frame::listen(1, "todos", None), "a", &state, &a_tx);
        let _ = a_rx.try_recv();

        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        state.rooms.register("b", b_tx.clone());
        handle_frame(&Frame::listen(1, "todos", None), "b", &state, &b_tx);
        let _ = b_rx.try_recv();

        let request = SyncRequest::new(Method::Read, json!([]));
        handle_frame(&Frame::sync(2, "todos", None, request), "a", &state, &a_tx);

        assert!(matches!(a_rx.try_recv().unwrap(), Frame::SyncAck { .. }));
        assert!(b_rx.try_recv().is_err());
    }
}
