//! Client connection representation.
//!
//! This module defines the structure and behavior of individual client
//! connections, tracking their state and metadata.

use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Unique identifier for a connection, assigned at accept time.
pub type ConnectionId = u64;

/// A cheap, cloneable sender for one connection's outbound frames.
///
/// Frames enqueued here are drained by the connection's writer task in FIFO
/// order. Enqueueing onto a closed connection is not an error: the frame is
/// silently dropped, which is the contract for notifications racing a
/// disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { id, sender }
    }

    /// The connection this handle feeds.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame for delivery; returns whether the connection still
    /// accepts frames.
    pub fn enqueue(&self, frame: Vec<u8>) -> bool {
        self.sender.send(frame).is_ok()
    }
}

/// Represents an individual client connection to the server.
///
/// Tracks the outbound handle, the network address, the connection
/// timestamp, and the authenticated identity. An `authenticated_id` of zero
/// means the connection is unauthenticated; the value only changes through
/// handler execution (a login sets it nonzero, a logout clears it).
#[derive(Debug)]
pub struct ClientConnection {
    /// Outbound frame queue for this connection
    pub handle: ConnectionHandle,

    /// The remote network address, when the transport knows it
    pub remote_addr: Option<SocketAddr>,

    /// When this connection was established
    pub connected_at: SystemTime,

    /// The principal attached to this connection; 0 = unauthenticated
    pub authenticated_id: u64,
}

impl ClientConnection {
    /// Creates a new, unauthenticated connection record.
    pub fn new(handle: ConnectionHandle, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            handle,
            remote_addr,
            connected_at: SystemTime::now(),
            authenticated_id: 0,
        }
    }
}
