//! # tether-protocol
//!
//! Wire protocol for the tether realtime persistence bridge.
//!
//! This crate defines the binary protocol spoken between tether clients and
//! backends: frame types, the MessagePack codec, and protocol versioning.
//!
//! ## Frame Types
//!
//! - `Listen` / `ListenAck` - Per-backend handshake yielding server options
//! - `Sync` / `SyncAck` - One persistence operation and its acknowledgment
//! - `Synced` - Unsolicited push describing a remote mutation
//! - `Connect` / `Connected` - Connection establishment
//! - `Ping` / `Pong` / `Error` - Keepalive and protocol errors
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, Frame, Method, SyncRequest};
//!
//! let request = SyncRequest::new(Method::Create, serde_json::json!({"name": "a"}));
//! let frame = Frame::sync(1, "todos", None, request);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{BackendOptions, Frame, FrameType, Method, SyncRequest};
pub use version::{Version, PROTOCOL_VERSION};
