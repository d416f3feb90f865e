//! Transport abstraction traits for tether.
//!
//! These traits define the boundary the synchronization bridge consumes: a
//! base connection, namespace derivation, a request/acknowledgment
//! primitive, and a subscription primitive for unsolicited pushes. The
//! seams are typed to the wire protocol rather than raw event names.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tether_protocol::{BackendOptions, Method, SyncRequest};
use thiserror::Error;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        Self(format!("conn_{:x}", timestamp))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The `(error, payload)` pair a sync acknowledgment carries.
///
/// The payload is delivered in both outcomes; `error` decides which of the
/// caller's callbacks receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReply {
    /// Error value, present when the backend rejected the operation.
    pub error: Option<Value>,
    /// Response payload.
    pub payload: Value,
}

impl SyncReply {
    /// Create a successful reply.
    #[must_use]
    pub fn ok(payload: Value) -> Self {
        Self {
            error: None,
            payload,
        }
    }

    /// Create a rejected reply.
    #[must_use]
    pub fn rejected(error: Value, payload: Value) -> Self {
        Self {
            error: Some(error),
            payload,
        }
    }

    /// Whether the backend rejected the operation.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.error.is_some()
    }
}

/// Handler for unsolicited synced pushes on a namespace.
pub type SyncedHandler = Box<dyn Fn(Method, &Value) + Send + Sync>;

/// A transport that can establish the base connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the base connection, performing the connect handshake.
    async fn connect(&self) -> Result<Arc<dyn Connection>, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// An established base connection.
///
/// The connection is shared by every backend handle in the process; handles
/// only derive namespace sub-connections from it.
pub trait Connection: Send + Sync {
    /// Derive a namespace sub-connection.
    ///
    /// Every call returns a fresh handle, even for a name that was derived
    /// before: each backend handle performs its own sub-channel join.
    fn of(&self, name: &str) -> Arc<dyn Namespace>;

    /// Get the connection's unique identifier.
    fn connection_id(&self) -> &ConnectionId;

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// A namespace sub-connection.
///
/// Carries the handshake, the sync request/acknowledgment exchange, and the
/// subscription to unsolicited pushes for one backend namespace.
#[async_trait]
pub trait Namespace: Send + Sync {
    /// The namespace name this handle was derived for.
    fn name(&self) -> &str;

    /// Perform the listen handshake, scoped to `channel` when given.
    ///
    /// Resolves with the server-assigned backend options. There is no
    /// timeout: a handshake the server never acknowledges leaves the
    /// returned future pending forever.
    async fn listen(&self, channel: Option<&str>) -> Result<BackendOptions, TransportError>;

    /// Emit one sync request and await its acknowledgment.
    async fn sync(&self, request: SyncRequest) -> Result<SyncReply, TransportError>;

    /// Subscribe to unsolicited synced pushes on this namespace.
    ///
    /// Handlers run in transport delivery order; there is no reordering,
    /// batching or deduplication.
    fn on_synced(&self, handler: SyncedHandler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_sync_reply_outcomes() {
        let ok = SyncReply::ok(json!({"id": 1}));
        assert!(!ok.is_rejected());

        let rejected = SyncReply::rejected(json!("nope"), json!({"id": 1}));
        assert!(rejected.is_rejected());
        assert_eq!(rejected.payload, json!({"id": 1}));
    }
}
