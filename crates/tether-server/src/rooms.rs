//! Room registry.
//!
//! Tracks which connections listen on which `(namespace, channel)` room,
//! and fans synced frames out to room members. Connections deliver through
//! per-connection mpsc senders; the WebSocket loop drains them.

use dashmap::{DashMap, DashSet};
use tether_protocol::Frame;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A `(namespace, channel)` room identifier.
pub type RoomKey = (String, Option<String>);

/// Connection and room membership registry.
#[derive(Default)]
pub struct Rooms {
    /// Outbound senders per connection.
    connections: DashMap<String, mpsc::UnboundedSender<Frame>>,
    /// Members per room.
    members: DashMap<RoomKey, DashSet<String>>,
    /// Rooms per connection, for disconnect cleanup.
    joined: DashMap<String, DashSet<RoomKey>>,
}

impl Rooms {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound sender.
    pub fn register(&self, connection_id: impl Into<String>, sender: mpsc::UnboundedSender<Frame>) {
        let conn_id = connection_id.into();
        debug!(connection = %conn_id, "Connection registered");
        self.connections.insert(conn_id, sender);
    }

    /// Join a connection to a room.
    pub fn join(&self, connection_id: &str, namespace: &str, channel: Option<&str>) {
        let key: RoomKey = (namespace.to_string(), channel.map(str::to_string));

        self.members
            .entry(key.clone())
            .or_default()
            .insert(connection_id.to_string());
        self.joined
            .entry(connection_id.to_string())
            .or_default()
            .insert(key);

        debug!(
            connection = %connection_id,
            namespace = %namespace,
            channel = ?channel,
            "Joined room"
        );
    }

    /// Number of rooms a connection has joined.
    #[must_use]
    pub fn joined_count(&self, connection_id: &str) -> usize {
        self.joined.get(connection_id).map_or(0, |rooms| rooms.len())
    }

    /// Number of members in a room.
    #[must_use]
    pub fn member_count(&self, namespace: &str, channel: Option<&str>) -> usize {
        let key: RoomKey = (namespace.to_string(), channel.map(str::to_string));
        self.members.get(&key).map_or(0, |members| members.len())
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.members.len()
    }

    /// Send a frame to every room member except `except`.
    ///
    /// Returns the number of connections the frame was delivered to.
    pub fn broadcast(
        &self,
        namespace: &str,
        channel: Option<&str>,
        frame: &Frame,
        except: &str,
    ) -> usize {
        let key: RoomKey = (namespace.to_string(), channel.map(str::to_string));

        let Some(members) = self.members.get(&key) else {
            return 0;
        };

        let mut delivered = 0;
        for member in members.iter() {
            if member.as_str() == except {
                continue;
            }
            if let Some(sender) = self.connections.get(member.as_str()) {
                if sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }

        trace!(
            namespace = %namespace,
            channel = ?channel,
            recipients = delivered,
            "Broadcast"
        );
        delivered
    }

    /// Drop a connection: leave every joined room and unregister.
    pub fn remove_connection(&self, connection_id: &str) {
        if let Some((_, rooms)) = self.joined.remove(connection_id) {
            for key in rooms.iter() {
                if let Some(members) = self.members.get(key.key()) {
                    members.remove(connection_id);
                    let emptied = members.is_empty();
                    drop(members);
                    if emptied {
                        self.members.remove(key.key());
                    }
                }
            }
        }

        self.connections.remove(connection_id);
        debug!(connection = %connection_id, "Connection removed");
    }
}
