//! WebSocket connection manager.
//!
//! Tracks active hub connections per collection and fans change sets out to
//! them.

use std::sync::Arc;

use dashmap::DashMap;
use keysync_engine::ServerFrame;
use tokio::sync::mpsc;

/// Sender for WebSocket frames.
pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Collection the connection is bound to
    pub collection: String,
    /// Channel to send frames to this connection
    pub sender: FrameSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Connection IDs per collection.
    by_collection: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, collection: &str, sender: FrameSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                collection: collection.to_string(),
                sender,
            },
        );
        self.by_collection
            .entry(collection.to_string())
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, collection = %collection, "Hub connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_collection.get_mut(&conn.collection) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_collection.remove(&conn.collection);
                }
            }

            tracing::info!(
                conn_id = %conn_id,
                collection = %conn.collection,
                "Hub connection unregistered"
            );
        }
    }

    fn members(&self, collection: &str) -> Vec<String> {
        self.by_collection
            .get(collection)
            .map(|ids| ids.value().clone())
            .unwrap_or_default()
    }

    /// Send a frame to every connection of `collection` except the sender.
    ///
    /// Returns the number of connections that received the frame.
    pub fn broadcast_except(&self, collection: &str, sender_conn_id: &str, frame: ServerFrame) -> usize {
        let mut sent_count = 0;

        for conn_id in self.members(collection) {
            if conn_id == sender_conn_id {
                continue;
            }
            if self.send_to(&conn_id, frame.clone()) {
                sent_count += 1;
            }
        }

        tracing::debug!(
            collection = %collection,
            sender = %sender_conn_id,
            recipients = sent_count,
            "Broadcast frame to connections"
        );

        sent_count
    }

    /// Send a frame to every connection of `collection`.
    ///
    /// Returns the number of connections that received the frame.
    pub fn broadcast_all(&self, collection: &str, frame: ServerFrame) -> usize {
        self.members(collection)
            .iter()
            .filter(|conn_id| self.send_to(conn_id, frame.clone()))
            .count()
    }

    /// Send a frame to a specific connection.
    pub fn send_to(&self, conn_id: &str, frame: ServerFrame) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(frame).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of collections with at least one connection.
    pub fn collection_count(&self) -> usize {
        self.by_collection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("people", tx);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.collection_count(), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.collection_count(), 0);
    }

    #[test]
    fn test_broadcast_except() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let conn1 = manager.register("people", tx1);
        let _conn2 = manager.register("people", tx2);
        let _conn3 = manager.register("pets", tx3);

        // Only the other member of the same collection hears it
        let sent = manager.broadcast_except("people", &conn1, ServerFrame::Pong);
        assert_eq!(sent, 1);

        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv().unwrap(), ServerFrame::Pong));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_all() {
        let manager = ConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        manager.register("people", tx1);
        manager.register("people", tx2);
        drop(rx2);

        assert_eq!(manager.broadcast_all("people", ServerFrame::Pong), 1);
        assert!(rx1.try_recv().is_ok());
        assert_eq!(manager.broadcast_all("nobody", ServerFrame::Pong), 0);
    }
}
