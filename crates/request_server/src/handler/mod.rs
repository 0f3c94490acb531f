//! The request handler contract.
//!
//! A handler is a stateful object bound to a `(category, method)` key. One
//! instance exists per worker, so handlers keep per-worker mutable state
//! without synchronization; the dispatcher overwrites the instance's input
//! fields on every request, runs validation, and invokes [`RequestHandler::process`]
//! inside the worker's database transaction.

mod ping;

pub use ping::{PingHandler, PING_DESCRIPTOR};

use crate::cache::SpatialCache;
use crate::connection::ConnectionId;
use crate::db::{DatabaseContext, DbError};
use crate::notify::Notification;
use async_trait::async_trait;
use warden_protocol::{HandlerDescriptor, ParamSet, ResponseCode, SchemaError};

/// Errors a handler may let escape to the dispatcher.
///
/// Only the synchronization conflict has retry semantics; anything else is
/// rolled back and reported to the client as `SERVER_ERROR`. Handlers report
/// domain failures through response codes, not through this type.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl HandlerError {
    /// Whether this error should trigger a transport-level retry.
    pub fn is_synchronization_conflict(&self) -> bool {
        matches!(self, HandlerError::Db(DbError::SynchronizationConflict))
    }
}

/// Outcome of a handler's `process` call.
pub type HandlerResult = Result<ResponseCode, HandlerError>;

/// Everything a handler may touch while processing one request.
///
/// `authenticated_id` starts as the connection's identity and may be
/// rewritten by the handler: setting it nonzero on an unauthenticated
/// connection is a login, zeroing it is a logout. Dispatch applies the
/// transition to the connection directory after the handler returns.
pub struct RequestContext<'a> {
    /// The principal making the request; 0 = unauthenticated
    pub authenticated_id: u64,

    /// The connection the request arrived on
    pub connection_id: ConnectionId,

    /// The worker's transactional database handle
    pub db: &'a mut dyn DatabaseContext,

    /// The node's spatial object cache
    pub cache: &'a SpatialCache,

    /// Notifications to fan out after a successful commit
    pub outbox: &'a mut Vec<Notification>,
}

impl RequestContext<'_> {
    /// Queues a notification for delivery after the transaction commits.
    pub fn notify(&mut self, target: u64, kind: u64, object_id: u64) {
        self.outbox.push(Notification {
            target,
            kind,
            object_id,
        });
    }
}

/// A request handler bound to one `(category, method)` key.
///
/// Implementations own a [`ParamSet`] built from their descriptor; the
/// dispatcher deserializes into it, validates it, and serializes the output
/// parameters out of it after `process` succeeds.
#[async_trait]
pub trait RequestHandler: Send {
    /// The static declaration this instance was built from.
    fn descriptor(&self) -> &'static HandlerDescriptor;

    /// The instance's parameter fields.
    fn params(&self) -> &ParamSet;

    /// Mutable access to the instance's parameter fields.
    fn params_mut(&mut self) -> &mut ParamSet;

    /// Executes the request inside the worker's transaction and returns the
    /// response code.
    async fn process(&mut self, ctx: &mut RequestContext<'_>) -> HandlerResult;
}
