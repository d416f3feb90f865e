//! Collections.
//!
//! An ordered set of models with membership events and a persistence
//! surface. Collections are cheap to clone; clones share state.

use crate::backend::{Backend, BackendConfig};
use crate::client::Client;
use crate::events::Events;
use crate::model::{Model, ModelConfig};
use crate::sync::{Persistable, SyncDisposition, SyncError, SyncOptions};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tether_protocol::Method;
use tracing::warn;

/// Collection construction options.
pub struct CollectionConfig {
    /// Name of the identity attribute of member models.
    pub id_attribute: String,
    /// Backend configuration, if this collection syncs through a backend.
    pub backend: Option<BackendConfig>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            id_attribute: "id".to_string(),
            backend: None,
        }
    }
}

struct CollectionInner {
    models: Mutex<Vec<Model>>,
    events: Arc<Events>,
    id_attribute: String,
    backend: Option<Arc<Backend>>,
    client: Arc<Client>,
}

/// A reactive collection of models.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Create an empty collection with default config.
    #[must_use]
    pub fn new(client: &Arc<Client>) -> Self {
        Self::with_config(client, CollectionConfig::default())
    }

    /// Create a collection syncing through the given backend.
    ///
    /// Must be called within a tokio runtime; the backend handshake starts
    /// immediately in the background.
    #[must_use]
    pub fn with_backend(client: &Arc<Client>, backend: impl Into<BackendConfig>) -> Self {
        Self::with_config(
            client,
            CollectionConfig {
                backend: Some(backend.into()),
                ..CollectionConfig::default()
            },
        )
    }

    /// Create a collection with explicit config.
    #[must_use]
    pub fn with_config(client: &Arc<Client>, config: CollectionConfig) -> Self {
        let events = Arc::new(Events::new());
        let backend = config
            .backend
            .map(|cfg| Backend::build(client.clone(), events.clone(), cfg));

        Self {
            inner: Arc::new(CollectionInner {
                models: Mutex::new(Vec::new()),
                events,
                id_attribute: config.id_attribute,
                backend,
                client: client.clone(),
            }),
        }
    }

    /// Name of the identity attribute of member models.
    #[must_use]
    pub fn id_attribute(&self) -> &str {
        &self.inner.id_attribute
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.models.lock().unwrap().len()
    }

    /// Whether the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.models.lock().unwrap().is_empty()
    }

    /// Snapshot of the members.
    #[must_use]
    pub fn models(&self) -> Vec<Model> {
        self.inner.models.lock().unwrap().clone()
    }

    /// Find the member with the given identity value.
    #[must_use]
    pub fn get(&self, id: &Value) -> Option<Model> {
        self.inner
            .models
            .lock()
            .unwrap()
            .iter()
            .find(|model| model.id().as_ref() == Some(id))
            .cloned()
    }

    /// Build a model from attributes and add it as a member.
    ///
    /// The collection's backend handle, if any, is explicitly delegated to
    /// the model so its own saves route through the same channel.
    pub fn add(&self, attributes: Value) -> Model {
        let model = Model::with_config(
            &self.inner.client,
            attributes,
            ModelConfig {
                id_attribute: self.inner.id_attribute.clone(),
                backend: None,
            },
        );
        self.add_model(model.clone());
        model
    }

    /// Add an existing model as a member.
    pub fn add_model(&self, model: Model) {
        if let Some(backend) = self.inner.backend.clone() {
            model.delegate_backend(backend);
        }

        self.inner.models.lock().unwrap().push(model.clone());
        self.trigger("add", &[model.to_json()]);
    }

    /// Remove the member with the given identity value.
    pub fn remove(&self, id: &Value) -> Option<Model> {
        let removed = {
            let mut models = self.inner.models.lock().unwrap();
            models
                .iter()
                .position(|model| model.id().as_ref() == Some(id))
                .map(|index| models.remove(index))
        };

        if let Some(model) = &removed {
            self.trigger("remove", &[model.to_json()]);
        }
        removed
    }

    /// Replace the membership from an array of attribute objects.
    ///
    /// Triggers a single `reset` event instead of per-member `add` events.
    pub fn reset(&self, items: &Value) {
        let Some(items) = items.as_array() else {
            warn!("Ignoring non-array payload in reset");
            return;
        };

        {
            let mut models = self.inner.models.lock().unwrap();
            models.clear();
            for attributes in items {
                let model = Model::with_config(
                    &self.inner.client,
                    attributes.clone(),
                    ModelConfig {
                        id_attribute: self.inner.id_attribute.clone(),
                        backend: None,
                    },
                );
                if let Some(backend) = self.inner.backend.clone() {
                    model.delegate_backend(backend);
                }
                models.push(model);
            }
        }

        self.trigger("reset", &[self.to_json()]);
    }

    /// Build a member from attributes and persist it.
    ///
    /// The new model saves through the collection's backend (explicitly
    /// delegated by [`add`](Self::add)); the options carry a collection
    /// back-reference, which the router strips before transmission.
    pub fn create(&self, attributes: Value, mut options: SyncOptions) -> Model {
        let model = self.add(attributes);

        options.collection = Some(self.clone());
        if let Err(e) = model.save(options) {
            warn!(error = %e, "Create could not be routed");
        }

        model
    }

    /// Fetch the collection's contents from its backend.
    ///
    /// On success the collection is reset from the array payload before
    /// the caller's success callback runs.
    ///
    /// # Errors
    ///
    /// Returns the router's error; see [`Client::sync`].
    pub fn fetch(&self, mut options: SyncOptions) -> Result<SyncDisposition, SyncError> {
        let collection = self.clone();
        let caller_success = options.success.take();
        options.success = Some(Box::new(move |payload: Value| {
            collection.reset(&payload);
            if let Some(callback) = caller_success {
                callback(payload);
            }
        }));

        self.inner.client.sync(Method::Read, self, options)
    }

    /// Serialize the members.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.inner
                .models
                .lock()
                .unwrap()
                .iter()
                .map(Model::to_json)
                .collect(),
        )
    }

    /// The collection's event emitter.
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
}

impl Persistable for Collection {
    fn backend(&self) -> Option<Arc<Backend>> {
        self.inner.backend.clone()
    }

    fn to_json(&self) -> Value {
        Collection::to_json(self)
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
    async fn test_membership() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;
        let collection = Collection::new(&client);

        collection.add(json!({"id": 1, "name": "a"}));
        collection.add(json!({"id": 2, "name": "b"}));
        assert_eq!(collection.len(), 2);

        let member = collection.get(&json!(2)).unwrap();
        assert_eq!(member.get("name"), Some(json!("b")));
        assert!(collection.get(&json!(3)).is_none());

        let removed = collection.remove(&json!(1)).unwrap();
        assert_eq!(removed.get("name"), Some(json!("a")));
        assert_eq!(collection.len(), 1);
        assert!(collection.remove(&json!(1)).is_none());
    }

    #[tokio::test]
    async fn test_membership_events() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;
        let collection = Collection::new(&client);

        let log = Arc::new(Mutex::new(Vec::new()));
        for event in ["add", "remove", "reset"] {
            let sink = log.clone();
            collection.bind(event, move |_| sink.lock().unwrap().push(event));
        }

        collection.add(json!({"id": 1}));
        collection.remove(&json!(1));
        collection.reset(&json!([{"id": 2}, {"id": 3}]));

        assert_eq!(*log.lock().unwrap(), vec!["add", "remove", "reset"]);
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test]
    async fn test_create_routes_through_collection_backend() {
        let peer = MemoryBackend::new();
        let client = connected_client(&peer).await;
        let collection = Collection::with_backend(&client, "todos");

        let (done_tx, done_rx) = oneshot::channel();
        let model = collection.create(
            json!({"name": "a"}),
            SyncOptions::new().on_success(move |_| {
                let _ = done_tx.send(());
            }),
        );

        // Added immediately, persisted through the delegated backend.
        assert_eq!(collection.len(), 1);
        done_rx.await.unwrap();

        let syncs = peer.sync_requests();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].namespace, "todos");
        assert_eq!(syncs[0].request.method, Method::Create);
        // The collection back-reference stayed local.
        assert!(syncs[0].request.options.is_empty());

        assert_eq!(model.get("name"), Some(json!("a")));
    }

    #[tokio::test]
    async fn test_fetch_resets_from_payload() {
        let peer = MemoryBackend::new();
        peer.on_sync(|_| SyncReply::ok(json!([{"id": 1}, {"id": 2}, {"id": 3}])));
        let client = connected_client(&peer).await;
        let collection = Collection::with_backend(&client, "todos");

        let (done_tx, done_rx) = oneshot::channel();
        collection
            .fetch(SyncOptions::new().on_success(move |_| {
                let _ = done_tx.send(());
            }))
            .unwrap();
        done_rx.await.unwrap();

        assert_eq!(collection.len(), 3);
        assert!(collection.get(&json!(2)).is_some());
        assert_eq!(peer.sync_requests()[0].request.method, Method::Read);
    }
}
