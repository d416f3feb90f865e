//! In-process memory transport.
//!
//! Connects the bridge to a scriptable peer living in the same process.
//! Useful for tests and for embedding a backend next to the client without
//! a network in between. The peer answers listen and sync requests
//! immediately unless told to park handshake acks, and can inject synced
//! pushes at any point.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tether_protocol::{BackendOptions, Method, SyncRequest};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::traits::{
    Connection, ConnectionId, Namespace, SyncReply, SyncedHandler, Transport, TransportError,
};

type SyncAnswerFn = Box<dyn Fn(&SyncRequest) -> SyncReply + Send + Sync>;

/// A recorded listen handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenRecord {
    /// Namespace the handshake targeted.
    pub namespace: String,
    /// Channel scope, if any.
    pub channel: Option<String>,
}

/// A recorded sync request.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    /// Namespace the request targeted.
    pub namespace: String,
    /// Channel scope the emitting handle joined.
    pub channel: Option<String>,
    /// The transmitted request.
    pub request: SyncRequest,
}

/// The scriptable peer behind a [`MemoryTransport`].
pub struct MemoryBackend {
    /// Handshake options per namespace; unset namespaces get the default.
    options: DashMap<String, BackendOptions>,
    /// Answer for sync requests; defaults to echoing the model back.
    sync_answer: Mutex<Option<SyncAnswerFn>>,
    /// Parked listen acks, released by `release_listen_acks`.
    parked_listens: Mutex<Option<Vec<(String, oneshot::Sender<BackendOptions>)>>>,
    /// Synced handlers, keyed by namespace name.
    handlers: DashMap<String, Vec<SyncedHandler>>,
    listens: Mutex<Vec<ListenRecord>>,
    syncs: Mutex<Vec<SyncRecord>>,
}

impl MemoryBackend {
    /// Create a new peer.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            options: DashMap::new(),
            sync_answer: Mutex::new(None),
            parked_listens: Mutex::new(None),
            handlers: DashMap::new(),
            listens: Mutex::new(Vec::new()),
            syncs: Mutex::new(Vec::new()),
        })
    }

    /// Assign the handshake options for a namespace.
    pub fn set_options(&self, namespace: impl Into<String>, options: BackendOptions) {
        self.options.insert(namespace.into(), options);
    }

    /// Script the answer for sync requests.
    pub fn on_sync<F>(&self, answer: F)
    where
        F: Fn(&SyncRequest) -> SyncReply + Send + Sync + 'static,
    {
        *self.sync_answer.lock().unwrap() = Some(Box::new(answer));
    }

    /// Park listen acks until [`release_listen_acks`](Self::release_listen_acks).
    ///
    /// While held, handshakes stay pending and every backend handle built on
    /// this transport remains non-ready.
    pub fn hold_listen_acks(&self) {
        let mut parked = self.parked_listens.lock().unwrap();
        if parked.is_none() {
            *parked = Some(Vec::new());
        }
    }

    /// Release every parked listen ack, in arrival order.
    pub fn release_listen_acks(&self) {
        let parked = self.parked_listens.lock().unwrap().take();
        if let Some(parked) = parked {
            debug!(count = parked.len(), "Releasing parked listen acks");
            for (namespace, tx) in parked {
                let _ = tx.send(self.options_for(&namespace));
            }
        }
    }

    /// Inject an unsolicited synced push on a namespace.
    ///
    /// Handlers run synchronously on the caller, in registration order.
    pub fn push_synced(&self, namespace: &str, method: Method, payload: Value) {
        trace!(namespace = %namespace, method = %method, "Injecting synced push");
        if let Some(handlers) = self.handlers.get(namespace) {
            for handler in handlers.iter() {
                handler(method, &payload);
            }
        }
    }

    /// All listen handshakes received so far.
    #[must_use]
    pub fn listen_requests(&self) -> Vec<ListenRecord> {
        self.listens.lock().unwrap().clone()
    }

    /// All sync requests received so far.
    #[must_use]
    pub fn sync_requests(&self) -> Vec<SyncRecord> {
        self.syncs.lock().unwrap().clone()
    }

    fn options_for(&self, namespace: &str) -> BackendOptions {
        self.options
            .get(namespace)
            .map(|o| o.clone())
            .unwrap_or_else(|| BackendOptions::new("backend"))
    }

    fn answer_sync(&self, request: &SyncRequest) -> SyncReply {
        match self.sync_answer.lock().unwrap().as_ref() {
            Some(answer) => answer(request),
            None => SyncReply::ok(request.model.clone()),
        }
    }
}

/// In-process transport backed by a [`MemoryBackend`] peer.
pub struct MemoryTransport {
    backend: Arc<MemoryBackend>,
}

impl MemoryTransport {
    /// Create a transport talking to the given peer.
    #[must_use]
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError> {
        Ok(Arc::new(MemoryConnection {
            id: ConnectionId::generate(),
            backend: self.backend.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryConnection {
    id: ConnectionId,
    backend: Arc<MemoryBackend>,
}

impl Connection for MemoryConnection {
    fn of(&self, name: &str) -> Arc<dyn Namespace> {
        Arc::new(MemoryNamespace {
            name: name.to_string(),
            channel: Mutex::new(None),
            backend: self.backend.clone(),
        })
    }

    fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        true
    }
}

struct MemoryNamespace {
    name: String,
    channel: Mutex<Option<String>>,
    backend: Arc<MemoryBackend>,
}

#[async_trait]
impl Namespace for MemoryNamespace {
    fn name(&self) -> &str {
        &self.name
    }

    async fn listen(&self, channel: Option<&str>) -> Result<BackendOptions, TransportError> {
        *self.channel.lock().unwrap() = channel.map(str::to_string);

        self.backend.listens.lock().unwrap().push(ListenRecord {
            namespace: self.name.clone(),
            channel: channel.map(str::to_string),
        });

        let parked_rx = {
            let mut parked = self.backend.parked_listens.lock().unwrap();
            parked.as_mut().map(|queue| {
                let (tx, rx) = oneshot::channel();
                queue.push((self.name.clone(), tx));
                rx
            })
        };

        match parked_rx {
            Some(rx) => rx.await.map_err(|_| TransportError::ConnectionClosed),
            None => Ok(self.backend.options_for(&self.name)),
        }
    }

    async fn sync(&self, request: SyncRequest) -> Result<SyncReply, TransportError> {
        let reply = self.backend.answer_sync(&request);

        self.backend.syncs.lock().unwrap().push(SyncRecord {
            namespace: self.name.clone(),
            channel: self.channel.lock().unwrap().clone(),
            request,
        });

        Ok(reply)
    }

    fn on_synced(&self, handler: SyncedHandler) {
        self.backend
            .handlers
            .entry(self.name.clone())
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_listen_returns_configured_options() {
        let backend = MemoryBackend::new();
        backend.set_options("todos", BackendOptions::new("sync"));

        let conn = MemoryTransport::new(backend.clone()).connect().await.unwrap();
        let ns = conn.of("todos");

        let options = ns.listen(Some("room-1")).await.unwrap();
        assert_eq!(options.event, "sync");
        assert_eq!(
            backend.listen_requests(),
            vec![ListenRecord {
                namespace: "todos".to_string(),
                channel: Some("room-1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_sync_echoes_model_by_default() {
        let backend = MemoryBackend::new();
        let conn = MemoryTransport::new(backend.clone()).connect().await.unwrap();
        let ns = conn.of("todos");
        ns.listen(None).await.unwrap();

        let request = SyncRequest::new(Method::Create, json!({"name": "a"}));
        let reply = ns.sync(request).await.unwrap();

        assert!(!reply.is_rejected());
        assert_eq!(reply.payload, json!({"name": "a"}));
        assert_eq!(backend.sync_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_sync_answer() {
        let backend = MemoryBackend::new();
        backend.on_sync(|request| {
            SyncReply::rejected(json!("denied"), request.model.clone())
        });

        let conn = MemoryTransport::new(backend.clone()).connect().await.unwrap();
        let ns = conn.of("todos");

        let reply = ns
            .sync(SyncRequest::new(Method::Delete, json!({"id": 1})))
            .await
            .unwrap();
        assert!(reply.is_rejected());
    }

    #[tokio::test]
    async fn test_held_listen_acks_park_the_handshake() {
        let backend = MemoryBackend::new();
        backend.hold_listen_acks();

        let conn = MemoryTransport::new(backend.clone()).connect().await.unwrap();
        let ns = conn.of("todos");

        let handshake = tokio::spawn(async move { ns.listen(None).await });

        // The handshake is recorded but not acknowledged.
        tokio::task::yield_now().await;
        assert_eq!(backend.listen_requests().len(), 1);
        assert!(!handshake.is_finished());

        backend.release_listen_acks();
        let options = handshake.await.unwrap().unwrap();
        assert_eq!(options.event, "backend");
    }

    #[tokio::test]
    async fn test_push_synced_reaches_handlers() {
        let backend = MemoryBackend::new();
        let conn = MemoryTransport::new(backend.clone()).connect().await.unwrap();
        let ns = conn.of("todos");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        ns.on_synced(Box::new(move |method, payload| {
            sink.lock().unwrap().push((method, payload.clone()));
        }));

        backend.push_synced("todos", Method::Create, json!({"id": 1}));
        backend.push_synced("other", Method::Create, json!({"id": 2}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (Method::Create, json!({"id": 1})));
    }
}
