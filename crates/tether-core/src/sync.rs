//! The persistence router.
//!
//! Single interception point for save/fetch/destroy operations. An object
//! with a backend handle syncs over that backend's channel; an object
//! without one delegates, untouched, to the injected default transport.
//! Backend presence is a hard routing decision: once a backend is found,
//! the operation never falls back to the default transport.

use crate::backend::Backend;
use crate::client::Client;
use crate::collection::Collection;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tether_protocol::{Method, SyncRequest};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Sync errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The object has no backend and the client has no default transport.
    #[error("No backend configured and no default transport installed")]
    NoTransport,

    /// The object has no backend handle to bind against.
    #[error("Object has no backend")]
    NoBackend,

    /// The default transport failed.
    #[error("Default transport failed: {0}")]
    DefaultTransport(String),
}

/// Completion callback for one sync operation.
pub type SyncCallback = Box<dyn FnOnce(Value) + Send + 'static>;

/// Caller options for one persistence operation.
///
/// `success`, `error` and `collection` are local-only: the router strips
/// them before anything crosses the channel boundary. Only `params` is
/// transmitted.
#[derive(Default)]
pub struct SyncOptions {
    /// Invoked with the response payload when the operation succeeds.
    pub success: Option<SyncCallback>,
    /// Invoked with the response payload when the operation fails.
    pub error: Option<SyncCallback>,
    /// Back-reference set by `Collection::create`; never transmitted.
    pub collection: Option<Collection>,
    /// Options transmitted with the sync request.
    pub params: Map<String, Value>,
}

impl SyncOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the success callback.
    #[must_use]
    pub fn on_success(mut self, callback: impl FnOnce(Value) + Send + 'static) -> Self {
        self.success = Some(Box::new(callback));
        self
    }

    /// Set the error callback.
    #[must_use]
    pub fn on_error(mut self, callback: impl FnOnce(Value) + Send + 'static) -> Self {
        self.error = Some(Box::new(callback));
        self
    }

    /// Attach a transmitted option.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// How the router disposed of an operation.
#[derive(Debug)]
pub enum SyncDisposition {
    /// Routed over a backend channel. The router returned before the
    /// operation completed; completion is observable only through the
    /// success/error callbacks.
    Queued,
    /// Completed by the default transport, with its result.
    Completed(Value),
    /// Nothing to transmit (e.g. destroying a never-saved model).
    Skipped,
}

/// The default persistence transport, used when no backend is configured.
///
/// Consumed at its interface boundary only; tether ships no
/// implementation. The options arrive untouched, callbacks included.
pub trait DefaultTransport: Send + Sync {
    /// Perform one persistence operation.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn sync(&self, method: Method, model: Value, options: SyncOptions)
        -> Result<Value, SyncError>;
}

/// An object the router can persist.
pub trait Persistable {
    /// The effective backend handle: the object's own, or the delegate
    /// handle it was explicitly given.
    fn backend(&self) -> Option<Arc<Backend>>;

    /// Serialize the object's attributes for transmission.
    fn to_json(&self) -> Value;
}

impl Client {
    /// Route one persistence operation.
    ///
    /// With a backend: strips local-only options, waits (in a background
    /// task) for the backend's readiness, emits the sync request, and
    /// dispatches the `(error, payload)` acknowledgment to the captured
    /// callbacks. Returns [`SyncDisposition::Queued`] immediately.
    ///
    /// Without a backend: delegates to the default transport with the
    /// options untouched and returns its result.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoTransport` when the object has no backend and
    /// no default transport is installed, or the default transport's error.
    pub fn sync(
        &self,
        method: Method,
        target: &dyn Persistable,
        options: SyncOptions,
    ) -> Result<SyncDisposition, SyncError> {
        let Some(backend) = target.backend() else {
            return match self.default_transport() {
                Some(transport) => transport
                    .sync(method, target.to_json(), options)
                    .map(SyncDisposition::Completed),
                None => Err(SyncError::NoTransport),
            };
        };

        // Local-only fields stay on this side of the channel.
        let SyncOptions {
            success,
            error,
            collection: _,
            params,
        } = options;

        let request = SyncRequest::with_options(method, target.to_json(), params);

        tokio::spawn(async move {
            let ready = backend.ready().await;

            trace!(backend = %backend.name(), method = %method, "Emitting sync");

            match ready.socket.sync(request).await {
                Ok(reply) => {
                    if let Some(rejection) = reply.error {
                        debug!(backend = %backend.name(), error = ?rejection, "Sync rejected");
                        if let Some(callback) = error {
                            callback(reply.payload);
                        }
                    } else if let Some(callback) = success {
                        callback(reply.payload);
                    }
                }
                Err(e) => {
                    warn!(backend = %backend.name(), error = %e, "Sync transport failure");
                    if let Some(callback) = error {
                        callback(json!({"error": e.to_string()}));
                    }
                }
            }
        });

        Ok(SyncDisposition::Queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendConfig;
    use crate::events::Events;
    use std::sync::Mutex;
    use tether_transport::{MemoryBackend, MemoryTransport, SyncReply};
    use tokio::sync::oneshot;

    struct Target {
        backend: Option<Arc<Backend>>,
        attributes: Value,
    }

    impl Persistable for Target {
        fn backend(&self) -> Option<Arc<Backend>> {
            self.backend.clone()
        }

        fn to_json(&self) -> Value {
            self.attributes.clone()
        }
    }

    #[derive(Default)]
    struct RecordingDefault {
        calls: Mutex<Vec<(Method, Value, Map<String, Value>, bool, bool)>>,
    }

    impl DefaultTransport for RecordingDefault {
        fn sync(
            &self,
            method: Method,
            model: Value,
            options: SyncOptions,
        ) -> Result<Value, SyncError> {
            self.calls.lock().unwrap().push((
                method,
                model,
                options.params.clone(),
                options.success.is_some(),
                options.error.is_some(),
            ));
            Ok(json!({"via": "default"}))
        }
    }

    async fn ready_backend(client: &Arc<Client>) -> Arc<Backend> {
        let backend = Backend::build(
            client.clone(),
            Arc::new(Events::new()),
            BackendConfig::named("todos"),
        );
        backend.ready().await;
        backend
    }

    #[tokio::test]
    async fn test_no_backend_delegates_untouched() {
        let default = Arc::new(RecordingDefault::default());
        let client = Client::with_default_transport(default.clone());

        let target = Target {
            backend: None,
            attributes: json!({"name": "a"}),
        };
        let options = SyncOptions::new()
            .on_success(|_| {})
            .on_error(|_| {})
            .with_param("silent", json!(true));

        let disposition = client.sync(Method::Create, &target, options).unwrap();
        match disposition {
            SyncDisposition::Completed(value) => assert_eq!(value, json!({"via": "default"})),
            other => panic!("Expected Completed, got {:?}", other),
        }

        // Same method, same model, same params, callbacks still attached.
        let calls = default.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (method, model, params, has_success, has_error) = &calls[0];
        assert_eq!(*method, Method::Create);
        assert_eq!(*model, json!({"name": "a"}));
        assert_eq!(params.get("silent"), Some(&json!(true)));
        assert!(*has_success);
        assert!(*has_error);
    }

    #[tokio::test]
    async fn test_no_backend_no_default_errors() {
        let client = Client::new();
        let target = Target {
            backend: None,
            attributes: json!({}),
        };

        match client.sync(Method::Read, &target, SyncOptions::new()) {
            Err(SyncError::NoTransport) => {}
            other => panic!("Expected NoTransport, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_backend_request_carries_only_params() {
        let peer = MemoryBackend::new();
        let client = Client::new();
        client.connect(&MemoryTransport::new(peer.clone())).await.unwrap();
        let backend = ready_backend(&client).await;

        let (done_tx, done_rx) = oneshot::channel();
        let options = SyncOptions::new()
            .on_success(move |payload| {
                let _ = done_tx.send(payload);
            })
            .on_error(|_| panic!("unexpected error callback"))
            .with_param("silent", json!(true));

        let target = Target {
            backend: Some(backend),
            attributes: json!({"name": "a"}),
        };

        let disposition = client.sync(Method::Create, &target, options).unwrap();
        assert!(matches!(disposition, SyncDisposition::Queued));

        done_rx.await.unwrap();

        let syncs = peer.sync_requests();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0].request.method, Method::Create);
        assert_eq!(syncs[0].request.model, json!({"name": "a"}));
        // The wire options hold exactly the params: nothing local crossed.
        assert_eq!(syncs[0].request.options, {
            let mut expected = Map::new();
            expected.insert("silent".to_string(), json!(true));
            expected
        });
    }

    #[tokio::test]
    async fn test_rejected_ack_routes_to_error_callback() {
        let peer = MemoryBackend::new();
        peer.on_sync(|request| SyncReply::rejected(json!("invalid"), request.model.clone()));
        let client = Client::new();
        client.connect(&MemoryTransport::new(peer.clone())).await.unwrap();
        let backend = ready_backend(&client).await;

        let (err_tx, err_rx) = oneshot::channel();
        let options = SyncOptions::new()
            .on_success(|_| panic!("unexpected success callback"))
            .on_error(move |payload| {
                let _ = err_tx.send(payload);
            });

        let target = Target {
            backend: Some(backend),
            attributes: json!({"name": ""}),
        };
        client.sync(Method::Create, &target, options).unwrap();

        // The error callback receives the response payload, not the error.
        assert_eq!(err_rx.await.unwrap(), json!({"name": ""}));
    }

    #[tokio::test]
    async fn test_sync_before_readiness_is_deferred_not_dropped() {
        let peer = MemoryBackend::new();
        peer.hold_listen_acks();
        let client = Client::new();
        client.connect(&MemoryTransport::new(peer.clone())).await.unwrap();

        let backend = Backend::build(
            client.clone(),
            Arc::new(Events::new()),
            BackendConfig::named("todos"),
        );

        let (done_tx, done_rx) = oneshot::channel();
        let target = Target {
            backend: Some(backend.clone()),
            attributes: json!({"name": "early"}),
        };
        let options = SyncOptions::new().on_success(move |_| {
            let _ = done_tx.send(());
        });
        client.sync(Method::Create, &target, options).unwrap();

        // Readiness has not resolved: nothing was transmitted.
        tokio::task::yield_now().await;
        assert!(!backend.is_ready());
        assert!(peer.sync_requests().is_empty());

        peer.release_listen_acks();
        done_rx.await.unwrap();

        // Transmitted exactly once, after readiness.
        assert_eq!(peer.sync_requests().len(), 1);
        assert_eq!(peer.sync_requests()[0].request.model, json!({"name": "early"}));
    }
}
