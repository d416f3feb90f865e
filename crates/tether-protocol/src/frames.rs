//! Frame types for the tether protocol.
//!
//! Frames are the unit of communication between a tether client and a
//! backend. Each frame is serialized with MessagePack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Listen = 0x03,
    ListenAck = 0x04,
    Sync = 0x05,
    SyncAck = 0x06,
    Synced = 0x07,
    Ping = 0x08,
    Pong = 0x09,
    Error = 0x0A,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Listen),
            0x04 => Ok(FrameType::ListenAck),
            0x05 => Ok(FrameType::Sync),
            0x06 => Ok(FrameType::SyncAck),
            0x07 => Ok(FrameType::Synced),
            0x08 => Ok(FrameType::Ping),
            0x09 => Ok(FrameType::Pong),
            0x0A => Ok(FrameType::Error),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Persistence methods carried by sync requests and synced pushes.
///
/// `Read` only appears in sync requests; pushes describe mutations, so a
/// `Synced` frame carries `Create`, `Update` or `Delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Create,
    Read,
    Update,
    Delete,
}

impl Method {
    /// Get the method name as used in event suffixes.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "create",
            Method::Read => "read",
            Method::Update => "update",
            Method::Delete => "delete",
        }
    }

    /// Whether this method mutates backend state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Method::Read)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-assigned options delivered by the listen handshake.
///
/// `event` names the local event prefix under which synced notifications
/// are re-emitted on the bound object. Backends may attach further fields;
/// those are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Local event prefix for synced notifications.
    pub event: String,
    /// Additional backend-specific options.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BackendOptions {
    /// Create options with the given event prefix.
    #[must_use]
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            extra: Map::new(),
        }
    }

    /// Attach an extra option field.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A single persistence operation sent over a backend channel.
///
/// `options` holds only caller options that are safe to transmit; local
/// callbacks and collection back-references never reach this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// The persistence method.
    pub method: Method,
    /// Serialized attributes of the model being synced.
    pub model: Value,
    /// Caller options, minus local-only fields.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl SyncRequest {
    /// Create a request with empty options.
    #[must_use]
    pub fn new(method: Method, model: Value) -> Self {
        Self {
            method,
            model,
            options: Map::new(),
        }
    }

    /// Create a request carrying caller options.
    #[must_use]
    pub fn with_options(method: Method, model: Value, options: Map<String, Value>) -> Self {
        Self {
            method,
            model,
            options,
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Initial connection handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version.
        version: u8,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Per-backend handshake request.
    #[serde(rename = "listen")]
    Listen {
        /// Request ID for acknowledgment.
        id: u64,
        /// Backend namespace to listen on.
        namespace: String,
        /// Optional channel scope within the namespace.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },

    /// Handshake acknowledgment carrying server-assigned options.
    #[serde(rename = "listen_ack")]
    ListenAck {
        /// ID of the acknowledged listen request.
        id: u64,
        /// Server-assigned backend options.
        options: BackendOptions,
    },

    /// One persistence operation.
    #[serde(rename = "sync")]
    Sync {
        /// Request ID for acknowledgment.
        id: u64,
        /// Backend namespace.
        namespace: String,
        /// Channel scope the emitting handle joined, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        /// The operation payload.
        request: SyncRequest,
    },

    /// Acknowledgment of a sync request.
    #[serde(rename = "sync_ack")]
    SyncAck {
        /// ID of the acknowledged sync request.
        id: u64,
        /// Error value; present when the operation was rejected.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        /// Response payload, delivered on success and on rejection alike.
        payload: Value,
    },

    /// Unsolicited push describing a remote mutation.
    #[serde(rename = "synced")]
    Synced {
        /// Backend namespace the mutation happened in.
        namespace: String,
        /// The mutation method.
        method: Method,
        /// Mutated attributes.
        payload: Value,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Protocol-level error.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Listen { .. } => FrameType::Listen,
            Frame::ListenAck { .. } => FrameType::ListenAck,
            Frame::Sync { .. } => FrameType::Sync,
            Frame::SyncAck { .. } => FrameType::SyncAck,
            Frame::Synced { .. } => FrameType::Synced,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8) -> Self {
        Frame::Connect { version }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Listen frame.
    #[must_use]
    pub fn listen(id: u64, namespace: impl Into<String>, channel: Option<String>) -> Self {
        Frame::Listen {
            id,
            namespace: namespace.into(),
            channel,
        }
    }

    /// Create a new ListenAck frame.
    #[must_use]
    pub fn listen_ack(id: u64, options: BackendOptions) -> Self {
        Frame::ListenAck { id, options }
    }

    /// Create a new Sync frame.
    #[must_use]
    pub fn sync(
        id: u64,
        namespace: impl Into<String>,
        channel: Option<String>,
        request: SyncRequest,
    ) -> Self {
        Frame::Sync {
            id,
            namespace: namespace.into(),
            channel,
            request,
        }
    }

    /// Create a successful SyncAck frame.
    #[must_use]
    pub fn sync_ack(id: u64, payload: Value) -> Self {
        Frame::SyncAck {
            id,
            error: None,
            payload,
        }
    }

    /// Create a rejected SyncAck frame.
    #[must_use]
    pub fn sync_rejected(id: u64, error: Value, payload: Value) -> Self {
        Frame::SyncAck {
            id,
            error: Some(error),
            payload,
        }
    }

    /// Create a new Synced push frame.
    #[must_use]
    pub fn synced(namespace: impl Into<String>, method: Method, payload: Value) -> Self {
        Frame::Synced {
            namespace: namespace.into(),
            method,
            payload,
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Get the request ID this frame acknowledges, if it is an ack.
    #[must_use]
    pub fn ack_id(&self) -> Option<u64> {
        match self {
            Frame::ListenAck { id, .. } | Frame::SyncAck { id, .. } => Some(*id),
            Frame::Error { id, .. } if *id != 0 => Some(*id),
            _ => None,
        }
    }
}
