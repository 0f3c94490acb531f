//! The broker side of the two-tier topology.
//!
//! Processors own areas; the broker routes between them. A processor opens
//! one outbound connection to the broker at startup and announces itself
//! with a HELLO envelope (an empty frame suffixed with its area id). Every
//! envelope after that is a complete frame suffixed with a `u64` routing id:
//! the broker delivers the bare frame to whatever connections are registered
//! under that id, which for area ids means the owning processor's link.

use crate::connection::{ConnectionId, ConnectionManager};
use crate::error::ServerError;
use tracing::{debug, trace};
use warden_protocol::frame;

/// The distinguished connection a processor holds to its broker.
///
/// The original design marked the broker by pointing the connection's
/// untyped state at the area id; here the link is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerLink {
    pub connection_id: ConnectionId,
    pub area_id: u64,
}

impl BrokerLink {
    /// The registration envelope a processor sends right after connecting:
    /// an empty frame with the area id as the routing suffix.
    pub fn hello(area_id: u64) -> Vec<u8> {
        frame::append_target(vec![0, 0, 0, 0], area_id)
    }
}

/// Handles one suffixed envelope arriving from a peer node.
///
/// An empty frame registers the sending connection under the suffix id (the
/// processor announcing its area); any other frame is delivered, suffix
/// stripped, to the connections registered under the suffix id. Unroutable
/// envelopes are dropped.
pub async fn handle_envelope(
    manager: &ConnectionManager,
    from: ConnectionId,
    envelope: &[u8],
) -> Result<(), ServerError> {
    let (frame_bytes, target) =
        frame::split_target(envelope).map_err(|_| ServerError::MalformedEnvelope)?;

    if frame_bytes.len() <= frame::LENGTH_PREFIX {
        debug!(connection = from, area = target, "registering area owner");
        manager.authenticate(from, target).await;
        return Ok(());
    }

    let delivered = manager.send_to_user(target, frame_bytes.to_vec()).await;
    trace!(
        connection = from,
        target,
        delivered,
        "routed forwarded frame"
    );
    Ok(())
}
