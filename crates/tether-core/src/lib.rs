//! # tether-core
//!
//! Synchronization bridge between reactive models and realtime backends.
//!
//! Models and collections carrying a backend configuration persist through
//! a channel-based realtime transport instead of a conventional
//! request/response transport, and receive live remote mutations as local
//! events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Model /     │────▶│   Client    │────▶│  Backend    │
//! │ Collection  │     │ (sync path) │     │  (handle)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                                       │
//!        └────────── synced events ──────────────┘
//! ```
//!
//! - [`Signal`] - one-shot notification that replays its value to late
//!   subscribers
//! - [`Backend`] - per-object handle owning the listen handshake and the
//!   synced event re-emission
//! - [`Client`] - explicit persistence router: the process-wide connection
//!   plus the save/fetch/destroy interception point
//! - [`Model`] / [`Collection`] - the reactive objects, with
//!   `bind_backend` applying remote mutations locally
//!
//! ## Example
//!
//! ```rust,ignore
//! let client = Client::new();
//! client.connect(&WebSocketTransport::with_url("ws://localhost:8080/ws")).await?;
//!
//! let todos = Collection::with_backend(&client, "todos");
//! todos.bind_backend().await?;
//! todos.create(json!({"title": "learn tether"}), SyncOptions::default());
//! ```

pub mod backend;
pub mod binding;
pub mod client;
pub mod collection;
pub mod events;
pub mod model;
pub mod signal;
pub mod sync;

pub use backend::{Backend, BackendConfig, BackendReady};
pub use client::{Client, ClientError};
pub use collection::{Collection, CollectionConfig};
pub use events::Events;
pub use model::{Model, ModelConfig};
pub use signal::{Signal, SignalError};
pub use sync::{
    DefaultTransport, Persistable, SyncCallback, SyncDisposition, SyncError, SyncOptions,
};
