//! Backend handles.
//!
//! A backend handle is the per-object state behind a backend configuration:
//! it owns a namespace sub-connection, performs the listen handshake, keeps
//! the server-assigned options, and re-emits synced notifications as local
//! events on the owning object. Handles are never shared; two objects with
//! identical configuration perform two independent handshakes.

use crate::client::Client;
use crate::events::Events;
use crate::signal::Signal;
use serde_json::Value;
use std::sync::Arc;
use tether_protocol::BackendOptions;
use tether_transport::Namespace;
use tracing::{debug, error, warn};

/// Backend configuration attached to a model or collection.
///
/// Immutable once the handle is built. The bare-name form (`"todos"`) maps
/// a backend with no channel scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    name: String,
    channel: Option<String>,
}

impl BackendConfig {
    /// Configuration for a backend with no channel scope.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: None,
        }
    }

    /// Configuration scoped to a channel within the backend namespace.
    #[must_use]
    pub fn channeled(name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel: Some(channel.into()),
        }
    }

    /// The backend namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel scope, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }
}

impl From<&str> for BackendConfig {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for BackendConfig {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

/// Everything a ready backend exposes.
#[derive(Clone)]
pub struct BackendReady {
    /// The namespace sub-connection the handshake was performed on.
    pub socket: Arc<dyn Namespace>,
    /// Server-assigned options from the handshake.
    pub options: BackendOptions,
}

/// A per-object backend handle.
pub struct Backend {
    name: String,
    channel: Option<String>,
    readiness: Signal<BackendReady>,
}

impl Backend {
    /// Build a handle and start its handshake.
    ///
    /// The handshake runs in the background: it waits for the client's
    /// transport connection, derives the namespace sub-connection, emits
    /// the listen request and, on acknowledgment, registers the synced
    /// re-emission on `events` before resolving readiness. A handshake
    /// that fails or never acknowledges leaves the handle permanently
    /// pending; there are no retries.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn build(client: Arc<Client>, events: Arc<Events>, config: BackendConfig) -> Arc<Self> {
        let backend = Arc::new(Self {
            name: config.name,
            channel: config.channel,
            readiness: Signal::new(),
        });

        let handle = backend.clone();
        tokio::spawn(async move {
            let connection = client.connection().await;
            let socket = connection.of(&handle.name);

            debug!(backend = %handle.name, channel = ?handle.channel, "Listen handshake");

            match socket.listen(handle.channel.as_deref()).await {
                Ok(options) => {
                    let prefix = options.event.clone();
                    let synced_events = events.clone();
                    let synced_prefix = prefix.clone();
                    socket.on_synced(Box::new(move |method, payload| {
                        synced_events.trigger(
                            &synced_prefix,
                            &[Value::String(method.as_str().to_string()), payload.clone()],
                        );
                        synced_events.trigger(
                            &format!("{}:{}", synced_prefix, method),
                            &[payload.clone()],
                        );
                    }));

                    debug!(backend = %handle.name, event = %prefix, "Backend ready");

                    if let Err(e) = handle.readiness.resolve(BackendReady { socket, options }) {
                        error!(backend = %handle.name, error = %e, "Readiness resolved twice");
                    }
                }
                Err(e) => {
                    // No retry: anything waiting on this handle stays pending.
                    warn!(backend = %handle.name, error = %e, "Listen handshake failed");
                }
            }
        });

        backend
    }

    /// The backend namespace name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The channel scope, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Wait for the handshake to complete.
    pub async fn ready(&self) -> BackendReady {
        self.readiness.wait().await
    }

    /// The server-assigned options, once the handshake has completed.
    #[must_use]
    pub fn options(&self) -> Option<BackendOptions> {
        self.readiness.peek().map(|ready| ready.options)
    }

    /// Whether the handshake has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness.is_resolved()
    }
}
