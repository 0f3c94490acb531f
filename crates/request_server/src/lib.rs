//! # Request Server - Worker-Pool RPC Runtime
//!
//! The dispatch core of a multi-node game request server. Framed requests
//! arrive from a transport, are routed to worker-local handler instances
//! keyed by `(category, method)`, run inside a per-worker database
//! transaction, and answer through a binary response frame. Handlers emit
//! asynchronous notifications that fan out to local subscribers or travel a
//! broker link toward the node owning the target's area.
//!
//! ## Design Philosophy
//!
//! The core contains **no game logic** — it only provides infrastructure:
//!
//! * **Request dispatch** — per-worker handler pools, transactional
//!   execution, retry on serialization conflicts
//! * **Connection management** — connection lifecycle and the
//!   `authenticated_id → connections` directory
//! * **Notification fan-out** — fire-and-forget delivery, broker forwarding
//! * **Spatial cache** — id/owner/location indices with line-of-sight
//!   queries, clone-on-return
//!
//! Game mechanics live in handler crates registered against the
//! [`registry::HandlerRegistry`]; this crate never inspects their payloads
//! beyond the declared parameter schemas.
//!
//! ## Request Flow
//!
//! 1. The transport frames a request and posts it as a [`node::TransportEvent`]
//! 2. The node routes it to worker `connection_id % workers`
//! 3. The worker deserializes into its handler instance, validates, and
//!    invokes `process` inside a transaction
//! 4. Commit, serialize the response, apply any login/logout transition
//! 5. The outbox drains into the notification router
//!
//! ## Concurrency Model
//!
//! Worker-owned state (handler instances, database contexts) is never
//! shared. Shared state is limited to the connection manager, the spatial
//! cache (one mutex, clone-on-return), and per-connection outbound queues.
//! A connection's requests all run on one worker, so its responses keep
//! arrival order.

pub mod cache;
pub mod config;
pub mod connection;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod node;
pub mod notify;
pub mod registry;
pub mod transport;

#[cfg(test)]
mod tests;

pub use cache::{CacheBounds, CacheObject, Footprint, SpatialCache};
pub use config::NodeConfig;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionManager};
pub use db::{DatabaseContext, DbError, PgDatabaseContext};
pub use dispatch::{DispatchOutcome, RequestEnvelope};
pub use error::ServerError;
pub use handler::{HandlerError, HandlerResult, RequestContext, RequestHandler};
pub use node::{ContextFactory, ProcessorNode, TransportEvent};
pub use notify::{BrokerLink, Notification, NotificationRouter};
pub use registry::HandlerRegistry;
