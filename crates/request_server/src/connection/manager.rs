//! Connection manager for tracking and managing client connections.
//!
//! This module provides the central management system for all client
//! connections: lifecycle, authenticated-identity assignment, and frame
//! delivery. It backs both the per-connection response path and the
//! process-wide notification fan-out (`authenticated_id → connections`).

use super::{ClientConnection, ConnectionHandle, ConnectionId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Central manager for all client connections.
///
/// The manager tracks active connections in a concurrent map and maintains
/// the `authenticated_id → connections` index used by notification fan-out.
/// Multiple connections may share one authenticated id (the same principal
/// logged in twice); each gets its own copy of every frame.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// Map of connection ID to client connection information
    connections: DashMap<ConnectionId, ClientConnection>,

    /// Authenticated identity to connection IDs, for fan-out
    authenticated: RwLock<HashMap<u64, Vec<ConnectionId>>>,

    /// Atomic counter for generating unique connection IDs
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Creates a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its outbound handle together
    /// with the receiving end the transport's writer task drains.
    pub fn open_connection(
        &self,
        remote_addr: Option<SocketAddr>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(id, sender);
        self.connections
            .insert(id, ClientConnection::new(handle.clone(), remote_addr));
        match remote_addr {
            Some(addr) => info!("🔗 connection {id} from {addr}"),
            None => info!("🔗 connection {id} (internal)"),
        }
        (handle, receiver)
    }

    /// Removes a connection, clearing its authenticated-index entry.
    ///
    /// Returns the authenticated id the connection held, if any. In-flight
    /// notifications for the connection are dropped silently.
    pub async fn close_connection(&self, id: ConnectionId) -> Option<u64> {
        let (_, connection) = self.connections.remove(&id)?;
        if connection.authenticated_id != 0 {
            self.unindex(connection.authenticated_id, id).await;
        }
        info!("❌ connection {id} closed");
        Some(connection.authenticated_id)
    }

    /// The authenticated id attached to a connection; 0 when unauthenticated
    /// or unknown.
    pub fn authenticated_id(&self, id: ConnectionId) -> u64 {
        self.connections
            .get(&id)
            .map(|c| c.authenticated_id)
            .unwrap_or(0)
    }

    /// Attaches an authenticated identity to a connection (login).
    pub async fn authenticate(&self, id: ConnectionId, user: u64) {
        if user == 0 {
            return;
        }
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.authenticated_id = user;
        } else {
            return;
        }
        let mut index = self.authenticated.write().await;
        let entries = index.entry(user).or_default();
        if !entries.contains(&id) {
            entries.push(id);
        }
        debug!("connection {id} authenticated as {user}");
    }

    /// Detaches an authenticated identity from a connection (logout).
    pub async fn deauthenticate(&self, id: ConnectionId, user: u64) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.authenticated_id = 0;
        }
        self.unindex(user, id).await;
        debug!("connection {id} deauthenticated from {user}");
    }

    async fn unindex(&self, user: u64, id: ConnectionId) {
        if user == 0 {
            return;
        }
        let mut index = self.authenticated.write().await;
        if let Some(entries) = index.get_mut(&user) {
            entries.retain(|entry| *entry != id);
            if entries.is_empty() {
                index.remove(&user);
            }
        }
    }

    /// Queues a frame on one connection; returns whether it was accepted.
    pub fn send_to_connection(&self, id: ConnectionId, frame: Vec<u8>) -> bool {
        match self.connections.get(&id) {
            Some(connection) => connection.handle.enqueue(frame),
            None => false,
        }
    }

    /// Queues a frame on every connection registered under the given
    /// authenticated id; returns how many connections accepted it.
    pub async fn send_to_user(&self, user: u64, frame: Vec<u8>) -> usize {
        let index = self.authenticated.read().await;
        let Some(entries) = index.get(&user) else {
            return 0;
        };
        let mut delivered = 0;
        for id in entries {
            if self.send_to_connection(*id, frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Whether any live connection holds the given authenticated id.
    pub async fn is_user_connected(&self, user: u64) -> bool {
        let index = self.authenticated.read().await;
        index.get(&user).is_some_and(|entries| !entries.is_empty())
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
