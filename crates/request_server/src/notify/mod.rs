//! Notification fan-out.
//!
//! Handlers queue notifications in their outbox; after a successful commit
//! the dispatcher drains the outbox into the [`NotificationRouter`], which
//! delivers each one to every local connection registered under the target
//! id, or forwards it over the broker link when the target is outside the
//! node's area. Fire-and-forget throughout: no acknowledgment, no retry, no
//! persistence. Delivery to one connection is FIFO; nothing is promised
//! across connections.

mod broker;

pub use broker::{handle_envelope, BrokerLink};

use crate::connection::{ConnectionId, ConnectionManager};
use crate::error::ServerError;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use warden_protocol::frame;

/// One handler-originated notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// The authenticated id the notification is addressed to
    pub target: u64,
    /// Handler-defined notification type
    pub kind: u64,
    /// The object the notification concerns
    pub object_id: u64,
}

impl Notification {
    /// The notification's wire frame.
    pub fn encode(&self) -> Vec<u8> {
        frame::encode_notification(self.kind, self.object_id)
    }
}

/// Routes notifications to local connections or out through the broker.
pub struct NotificationRouter {
    manager: Arc<ConnectionManager>,
    broker: RwLock<Option<BrokerLink>>,
    area_id: u64,
}

impl NotificationRouter {
    /// Creates a router for a node owning `area_id` (0 for non-processors).
    pub fn new(manager: Arc<ConnectionManager>, area_id: u64) -> Self {
        Self {
            manager,
            broker: RwLock::new(None),
            area_id,
        }
    }

    /// The area this node owns; 0 when it is not a processor.
    pub fn area_id(&self) -> u64 {
        self.area_id
    }

    /// Attaches the broker link established at startup. The link is never
    /// replaced after loss; losing it tears the node down instead.
    pub async fn attach_broker(&self, link: BrokerLink) {
        debug!(
            connection = link.connection_id,
            area = link.area_id,
            "broker link attached"
        );
        *self.broker.write().await = Some(link);
    }

    /// Delivers one notification: locally when the target id has registered
    /// connections, otherwise forwarded to the broker with the target
    /// appended as the envelope suffix. Undeliverable notifications are
    /// dropped.
    pub async fn deliver(&self, notification: Notification) {
        let notification_frame = notification.encode();
        let delivered = self
            .manager
            .send_to_user(notification.target, notification_frame.clone())
            .await;
        if delivered > 0 {
            trace!(
                target = notification.target,
                kind = notification.kind,
                delivered,
                "notification delivered locally"
            );
            return;
        }

        let broker = self.broker.read().await;
        match &*broker {
            Some(link) => {
                let envelope = frame::append_target(notification_frame, notification.target);
                self.manager.send_to_connection(link.connection_id, envelope);
                trace!(
                    target = notification.target,
                    kind = notification.kind,
                    "notification forwarded to broker"
                );
            }
            None => debug!(
                target = notification.target,
                kind = notification.kind,
                "no recipient for notification; dropped"
            ),
        }
    }

    /// Handles a transport disconnect.
    ///
    /// Removing an ordinary client drops its in-flight notifications
    /// silently. Losing the broker connection on a processor is fatal: the
    /// node must tear down rather than run with an unreachable area graph.
    pub async fn on_disconnect(&self, connection_id: ConnectionId) -> Result<(), ServerError> {
        self.manager.close_connection(connection_id).await;
        let broker = self.broker.read().await;
        if let Some(link) = &*broker {
            if link.connection_id == connection_id {
                return Err(ServerError::BrokerDown);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_targets_receive_the_frame_in_order() {
        let manager = Arc::new(ConnectionManager::new());
        let router = NotificationRouter::new(manager.clone(), 0);

        let (handle, mut rx) = manager.open_connection(None);
        manager.authenticate(handle.id(), 42).await;

        let first = Notification {
            target: 42,
            kind: 1,
            object_id: 100,
        };
        let second = Notification {
            target: 42,
            kind: 2,
            object_id: 200,
        };
        router.deliver(first).await;
        router.deliver(second).await;

        assert_eq!(rx.recv().await, Some(first.encode()));
        assert_eq!(rx.recv().await, Some(second.encode()));
    }

    #[tokio::test]
    async fn unroutable_targets_forward_to_the_broker_with_a_suffix() {
        let manager = Arc::new(ConnectionManager::new());
        let router = NotificationRouter::new(manager.clone(), 9);

        let (broker_handle, mut broker_rx) = manager.open_connection(None);
        router
            .attach_broker(BrokerLink {
                connection_id: broker_handle.id(),
                area_id: 9,
            })
            .await;

        let notification = Notification {
            target: 555,
            kind: 3,
            object_id: 7,
        };
        router.deliver(notification).await;

        let envelope = broker_rx.recv().await.expect("forwarded envelope");
        let (frame_bytes, target) =
            warden_protocol::frame::split_target(&envelope).expect("suffixed");
        assert_eq!(frame_bytes, &notification.encode()[..]);
        assert_eq!(target, 555);
    }

    #[tokio::test]
    async fn broker_disconnect_is_fatal() {
        let manager = Arc::new(ConnectionManager::new());
        let router = NotificationRouter::new(manager.clone(), 9);

        let (client, _client_rx) = manager.open_connection(None);
        let (broker_handle, _broker_rx) = manager.open_connection(None);
        router
            .attach_broker(BrokerLink {
                connection_id: broker_handle.id(),
                area_id: 9,
            })
            .await;

        assert!(router.on_disconnect(client.id()).await.is_ok());
        assert!(matches!(
            router.on_disconnect(broker_handle.id()).await,
            Err(ServerError::BrokerDown)
        ));
    }
}
