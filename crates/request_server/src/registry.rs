//! Handler registration and per-worker instance pools.
//!
//! The registry holds one entry per `(category, method)` key in two disjoint
//! keyspaces: handlers callable while unauthenticated and handlers callable
//! once authenticated. At node start each worker materializes its own
//! instance of every registered handler, so request processing never
//! synchronizes on handler state.

use crate::error::ServerError;
use crate::handler::RequestHandler;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use warden_protocol::{AuthScope, HandlerDescriptor, ParamTree};

/// Constructor for one worker's instance of a handler.
pub type HandlerFactory = fn() -> Box<dyn RequestHandler>;

/// One registered handler: its declaration, its prebuilt serialization
/// trees, and the factory workers use to build their instances.
pub struct Registration {
    pub descriptor: &'static HandlerDescriptor,
    pub tree: Arc<ParamTree>,
    factory: HandlerFactory,
}

/// The node-wide handler table.
///
/// `server_id` selects which node type's handlers are accepted: descriptors
/// carrying a different nonzero `server_id` are skipped, so one handler
/// library can serve several node types. Id 0 marks a handler as shared.
pub struct HandlerRegistry {
    server_id: u8,
    authenticated: HashMap<u16, Registration>,
    unauthenticated: HashMap<u16, Registration>,
}

impl HandlerRegistry {
    /// Creates an empty registry for the given node type.
    pub fn new(server_id: u8) -> Self {
        Self {
            server_id,
            authenticated: HashMap::new(),
            unauthenticated: HashMap::new(),
        }
    }

    /// Registers a handler under its descriptor's key and auth scope.
    ///
    /// Descriptors for other node types are skipped silently; a key
    /// collision within a keyspace is an error.
    pub fn register(
        &mut self,
        descriptor: &'static HandlerDescriptor,
        factory: HandlerFactory,
    ) -> Result<(), ServerError> {
        if descriptor.server_id != 0 && descriptor.server_id != self.server_id {
            debug!(
                category = descriptor.category,
                method = descriptor.method,
                server_id = descriptor.server_id,
                "skipping handler for another node type"
            );
            return Ok(());
        }

        let key = descriptor.key();
        let keyspace = match descriptor.auth {
            AuthScope::Authenticated => &mut self.authenticated,
            AuthScope::Unauthenticated => &mut self.unauthenticated,
        };
        if keyspace.contains_key(&key) {
            return Err(ServerError::DuplicateHandler {
                category: descriptor.category,
                method: descriptor.method,
            });
        }
        keyspace.insert(
            key,
            Registration {
                descriptor,
                tree: Arc::new(ParamTree::build(descriptor)),
                factory,
            },
        );
        Ok(())
    }

    /// Builds the instance pool for one worker.
    pub fn build_worker(&self) -> WorkerHandlers {
        WorkerHandlers {
            authenticated: Self::instantiate(&self.authenticated),
            unauthenticated: Self::instantiate(&self.unauthenticated),
        }
    }

    fn instantiate(keyspace: &HashMap<u16, Registration>) -> HashMap<u16, WorkerHandler> {
        keyspace
            .iter()
            .map(|(key, registration)| {
                (
                    *key,
                    WorkerHandler {
                        tree: registration.tree.clone(),
                        instance: (registration.factory)(),
                    },
                )
            })
            .collect()
    }
}

/// One worker's instance of a registered handler, with its serialization
/// trees.
pub struct WorkerHandler {
    pub tree: Arc<ParamTree>,
    pub instance: Box<dyn RequestHandler>,
}

/// The full instance pool owned by a single worker.
pub struct WorkerHandlers {
    authenticated: HashMap<u16, WorkerHandler>,
    unauthenticated: HashMap<u16, WorkerHandler>,
}

impl WorkerHandlers {
    /// The handler for a key in the keyspace matching the caller's
    /// authentication state, if registered.
    pub fn lookup(&mut self, key: u16, authenticated: bool) -> Option<&mut WorkerHandler> {
        if authenticated {
            self.authenticated.get_mut(&key)
        } else {
            self.unauthenticated.get_mut(&key)
        }
    }
}
