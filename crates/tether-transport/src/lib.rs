//! # tether-transport
//!
//! Client transport layer for the tether realtime persistence bridge.
//!
//! A transport establishes the single base connection an application shares,
//! and hands out per-backend namespace sub-connections:
//!
//! - **WebSocket** - network transport over tokio-tungstenite
//! - **Memory** - in-process transport with a scriptable peer, for tests
//!   and embedded use
//!
//! ## Transport Abstraction
//!
//! ```rust,ignore
//! use tether_transport::{Transport, Namespace};
//!
//! let connection = transport.connect().await?;
//! let namespace = connection.of("todos");
//! let options = namespace.listen(Some("room-1")).await?;
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryBackend, MemoryTransport};
pub use traits::{
    Connection, ConnectionId, Namespace, SyncReply, SyncedHandler, Transport, TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketTransport};
