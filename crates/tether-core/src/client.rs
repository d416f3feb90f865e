//! The tether client.
//!
//! One `Client` per application: it owns the process-wide transport
//! connection signal and the injected default transport, and is the
//! explicit routing context every model and collection is built against.
//! There is no global state; two clients are two isolated bridges.

use crate::signal::Signal;
use crate::sync::DefaultTransport;
use std::sync::Arc;
use tether_transport::{Connection, Transport, TransportError};
use thiserror::Error;
use tracing::info;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client already holds a connection.
    ///
    /// The connected signal resolves exactly once; connecting twice is a
    /// programming error.
    #[error("Client already connected")]
    AlreadyConnected,

    /// The transport failed to connect.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The process-wide bridge context.
pub struct Client {
    connected: Signal<Arc<dyn Connection>>,
    default_transport: Option<Arc<dyn DefaultTransport>>,
}

impl Client {
    /// Create a client with no default transport.
    ///
    /// Objects without a backend configuration will fail to sync until a
    /// default transport is provided via
    /// [`with_default_transport`](Self::with_default_transport).
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Signal::new(),
            default_transport: None,
        })
    }

    /// Create a client routing backend-less objects through `default`.
    #[must_use]
    pub fn with_default_transport(default: Arc<dyn DefaultTransport>) -> Arc<Self> {
        Arc::new(Self {
            connected: Signal::new(),
            default_transport: Some(default),
        })
    }

    /// Establish the base connection.
    ///
    /// Resolves the connected signal exactly once; every backend handle
    /// waiting on it proceeds with its handshake.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AlreadyConnected` on a second call, or the
    /// transport's error if connecting fails.
    pub async fn connect(
        &self,
        transport: &dyn Transport,
    ) -> Result<Arc<dyn Connection>, ClientError> {
        if self.connected.is_resolved() {
            return Err(ClientError::AlreadyConnected);
        }

        let connection = transport.connect().await?;

        self.connected
            .resolve(connection.clone())
            .map_err(|_| ClientError::AlreadyConnected)?;

        info!(transport = transport.name(), "Transport connected");
        Ok(connection)
    }

    /// Wait for the base connection.
    pub async fn connection(&self) -> Arc<dyn Connection> {
        self.connected.wait().await
    }

    /// Whether the base connection is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.is_resolved()
    }

    pub(crate) fn default_transport(&self) -> Option<&Arc<dyn DefaultTransport>> {
        self.default_transport.as_ref()
    }
}
