//! Models.
//!
//! A model is a map of attributes with change events and a persistence
//! surface. Models are cheap to clone; clones share state.

use crate::backend::{Backend, BackendConfig};
use crate::client::Client;
use crate::events::Events;
use crate::sync::{Persistable, SyncDisposition, SyncError, SyncOptions};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tether_protocol::Method;
use tracing::warn;

/// Model construction options.
pub struct ModelConfig {
    /// Name of the identity attribute.
    pub id_attribute: String,
    /// Backend configuration, if this model syncs through a backend.
    pub backend: Option<BackendConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id_attribute: "id".to_string(),
            backend: None,
        }
    }
}

struct ModelInner {
    attributes: Mutex<Map<String, Value>>,
    events: Arc<Events>,
    id_attribute: String,
    /// Handle built from this model's own backend configuration.
    backend: Option<Arc<Backend>>,
    /// Handle explicitly delegated by the owning collection.
    delegate: Mutex<Option<Arc<Backend>>>,
    client: Arc<Client>,
}

/// A reactive model.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Create a model with default config.
    #[must_use]
    pub fn new(client: &Arc<Client>, attributes: Value) -> Self {
        Self::with_config(client, attributes, ModelConfig::default())
    }

    /// Create a model syncing through the given backend.
    ///
    /// Must be called within a tokio runtime; the backend handshake starts
    /// immediately in the background.
    #[must_use]
    pub fn with_backend(
        client: &Arc<Client>,
        attributes: Value,
        backend: impl Into<BackendConfig>,
    ) -> Self {
        Self::with_config(
            client,
            attributes,
            ModelConfig {
                backend: Some(backend.into()),
                ..ModelConfig::default()
            },
        )
    }

    /// Create a model with explicit config.
    #[must_use]
    pub fn with_config(client: &Arc<Client>, attributes: Value, config: ModelConfig) -> Self {
        let events = Arc::new(Events::new());
        let backend = config
            .backend
            .map(|cfg| Backend::build(client.clone(), events.clone(), cfg));

        Self {
            inner: Arc::new(ModelInner {
                attributes: Mutex::new(object_or_empty(attributes)),
                events,
                id_attribute: config.id_attribute,
                backend,
                delegate: Mutex::new(None),
                client: client.clone(),
            }),
        }
    }

    /// Name of the identity attribute.
    #[must_use]
    pub fn id_attribute(&self) -> &str {
        &self.inner.id_attribute
    }

    /// The identity value, if the model has one.
    #[must_use]
    pub fn id(&self) -> Option<Value> {
        let attributes = self.inner.attributes.lock().unwrap();
        match attributes.get(&self.inner.id_attribute) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }

    /// Whether the model has never been assigned an identity.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// Get one attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.attributes.lock().unwrap().get(key).cloned()
    }

    /// Merge attributes into the model and trigger `change`.
    ///
    /// Non-object values are ignored with a warning; `set` merges, it
    /// never replaces wholesale.
    pub fn set(&self, attributes: &Value) {
        let Some(incoming) = attributes.as_object() else {
            warn!("Ignoring non-object attributes in set");
            return;
        };

        {
            let mut current = self.inner.attributes.lock().unwrap();
            for (key, value) in incoming {
                current.insert(key.clone(), value.clone());
            }
        }

        self.trigger("change", &[self.to_json()]);
    }

    /// Serialize the attributes.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.inner.attributes.lock().unwrap().clone())
    }

    /// The model's event emitter.
    #[must_use]
    pub fn events(&self) -> &Arc<Events> {
        &self.inner.events
    }

    /// Register an event handler.
    pub fn bind<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.inner.events.bind(event, handler);
    }

    /// Trigger an event.
    pub fn trigger(&self, event: &str, args: &[Value]) {
        self.inner.events.trigger(event, args);
    }

    /// The model's own backend handle, if it carries one.
    #[must_use]
    pub fn own_backend(&self) -> Option<Arc<Backend>> {
        self.inner.backend.clone()
    }

    /// Explicitly delegate persistence to another object's backend handle.
    ///
    /// Collections delegate their backend to members this way; there is no
    /// implicit parent lookup at sync time.
    pub fn delegate_backend(&self, backend: Arc<Backend>) {
        *self.inner.delegate.lock().unwrap() = Some(backend);
    }

    /// Save the model.
    ///
    /// Uses `create` for a model without identity, `update` otherwise. On
    /// success the response payload is merged into the model before the
    /// caller's success callback runs.
    ///
    /// # Errors
    ///
    /// Returns the router's error; see [`Client::sync`].
    pub fn save(&self, mut options: SyncOptions) -> Result<SyncDisposition, SyncError> {
        let method = if self.is_new() {
            Method::Create
        } else {
            Method::Update
        };

        let model = self.clone();
        let caller_success = options.success.take();
        options.success = Some(Box::new(move |payload: Value| {
            if payload.is_object() {
                model.set(&payload);
            }
            if let Some(callback) = caller_success {
                callback(payload);
            }
        }));

        self.inner.client.sync(method, self, options)
    }

    /// Fetch the model's attributes from its backend.
    ///
    /// On success the response payload is merged into the model before the
    /// caller's success callback runs.
    ///
    /// # Errors
    ///
    /// Returns the router's error; see [`Client::sync`].
    pub fn fetch(&self, mut options: SyncOptions) -> Result<SyncDisposition, SyncError> {
        let model = self.clone();
        let caller_success = options.success.take();
        options.success = Some(Box::new(move |payload: Value| {
            if payload.is_object() {
                model.set(&payload);
            }
            if let Some(callback) = caller_success {
                callback(payload);
            }
        }));

        self.inner.client.sync(Method::Read, self, options)
    }

    /// Destroy the model.
    ///
    /// Triggers the local `destroy` event, then issues a `delete` sync for
    /// models that have an identity. A never-saved model has nothing to
    /// delete remotely.
    ///
    /// # Errors
    ///
    /// Returns the router's error; see [`Client::sync`].
    pub fn destroy(&self, options: SyncOptions) -> Result<SyncDisposition, SyncError> {
        self.trigger("destroy", &[self.to_json()]);

        if self.is_new() {
            return Ok(SyncDisposition::Skipped);
        }

        self.inner.client.sync(Method::Delete, self, options)
    }
}

impl Persistable for Model {
    fn backend(&self) -> Option<Arc<Backend>> {
        self.inner
            .backend
            .clone()
            .or_else(|| self.inner.delegate.lock().unwrap().clone())
    }

    fn to_json(&self) -> Value {
        Model::to_json(self)
    }
}

fn object_or_empty(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            warn!(value = %other, "Model attributes must be an object; starting empty");
            Map::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_transport::{MemoryBackend, MemoryTransport, SyncReply};
    use tokio::sync::oneshot;

    async fn connected_client(peer: &Arc<MemoryBackend>) -> Arc<Client> {
        let client = Client::new();
        client
            .connect(&MemoryTransport::new(peer.clone()))
            .await
            .expect("memory transport connects");
        client
    }

    #[tokio::test]
    async fn test_attributes_and_identity() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;

        let model = Model::new(&client, json!({"name": "a"}));
        assert!(model.is_new());
        assert_eq!(model.get("name"), Some(json!("a")));

        model.set(&json!({"id": 7, "done": true}));
        assert_eq!(model.id(), Some(json!(7)));
        assert!(!model.is_new());
        // Merge, not replace.
        assert_eq!(model.get("name"), Some(json!("a")));
    }

    #[tokio::test]
    async fn test_set_triggers_change() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;
        let model = Model::new(&client, json!({}));

        let changes = Arc::new(Mutex::new(0));
        let counter = changes.clone();
        model.bind("change", move |_| *counter.lock().unwrap() += 1);

        model.set(&json!({"name": "a"}));
        model.set(&json!(17)); // ignored, no change event
        assert_eq!(*changes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_new_model_creates_and_merges_response() {
        let peer = MemoryBackend::new();
        peer.on_sync(|request| {
            let mut attributes = request.model.as_object().cloned().unwrap_or_default();
            attributes.insert("id".to_string(), json!(41));
            SyncReply::ok(Value::Object(attributes))
        });
        let client = connected_client(&peer).await;

        let model = Model::with_backend(&client, json!({"name": "a"}), "todos");

        let (done_tx, done_rx) = oneshot::channel();
        model
            .save(SyncOptions::new().on_success(move |payload| {
                let _ = done_tx.send(payload);
            }))
            .unwrap();

        let payload = done_rx.await.unwrap();
        assert_eq!(payload.get("id"), Some(&json!(41)));

        // The ack payload was merged before the caller's callback ran.
        assert_eq!(model.id(), Some(json!(41)));
        assert!(!model.is_new());

        let syncs = peer.sync_requests();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].request.method, Method::Create);
    }

    #[tokio::test]
    async fn test_save_existing_model_updates() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;

        let model = Model::with_backend(&client, json!({"id": 3, "name": "a"}), "todos");

        let (done_tx, done_rx) = oneshot::channel();
        model
            .save(SyncOptions::new().on_success(move |_| {
                let _ = done_tx.send(());
            }))
            .unwrap();
        done_rx.await.unwrap();

        assert_eq!(peer.sync_requests()[0].request.method, Method::Update);
    }

    #[tokio::test]
    async fn test_destroy_skips_sync_for_new_models() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;
        let model = Model::with_backend(&client, json!({"name": "a"}), "todos");

        let destroyed = Arc::new(Mutex::new(false));
        let flag = destroyed.clone();
        model.bind("destroy", move |_| *flag.lock().unwrap() = true);

        let disposition = model.destroy(SyncOptions::new()).unwrap();
        assert!(matches!(disposition, SyncDisposition::Skipped));
        assert!(*destroyed.lock().unwrap());
        assert!(peer.sync_requests().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_syncs_delete_for_saved_models() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;
        let model = Model::with_backend(&client, json!({"id": 9}), "todos");

        let (done_tx, done_rx) = oneshot::channel();
        model
            .destroy(SyncOptions::new().on_success(move |_| {
                let _ = done_tx.send(());
            }))
            .unwrap();
        done_rx.await.unwrap();

        let syncs = peer.sync_requests();
        assert_eq!(syncs[0].request.method, Method::Delete);
        assert_eq!(syncs[0].request.model, json!({"id": 9}));
    }
}
