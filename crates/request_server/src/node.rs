//! Node assembly: workers, request routing, the update tick, and the broker
//! link.
//!
//! A node owns the shared pieces (connection manager, notification router,
//! spatial cache) and spawns one worker task per configured slot. Each
//! worker owns its handler instances and database context exclusively, so a
//! request runs with no synchronization beyond the shared structures it
//! explicitly touches.
//!
//! Requests are routed to worker `connection_id % workers`, which keeps all
//! of one connection's requests on a single worker and thereby preserves
//! response ordering per connection. A `RetryLater` outcome re-enters the
//! same worker's queue at the tail.

use crate::cache::SpatialCache;
use crate::config::NodeConfig;
use crate::connection::{ConnectionId, ConnectionManager};
use crate::db::DatabaseContext;
use crate::dispatch::{dispatch, DispatchOutcome, RequestEnvelope, WorkerState};
use crate::error::ServerError;
use crate::notify::{self, BrokerLink, NotificationRouter};
use crate::registry::HandlerRegistry;
use crate::transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_protocol::Codec;

/// Builds one worker's database context at node start.
pub type ContextFactory = Arc<dyn Fn() -> Box<dyn DatabaseContext> + Send + Sync>;

/// Everything the transport reports into the node.
#[derive(Debug)]
pub enum TransportEvent {
    /// A framed request arrived on a connection.
    Request(RequestEnvelope),
    /// A suffixed broker envelope arrived on a node-to-node link.
    Forwarded {
        connection_id: ConnectionId,
        envelope: Vec<u8>,
    },
    /// A connection went away.
    Disconnected { connection_id: ConnectionId },
}

/// One request-server node, processor or broker.
pub struct ProcessorNode {
    config: NodeConfig,
    registry: Arc<HandlerRegistry>,
    manager: Arc<ConnectionManager>,
    router: Arc<NotificationRouter>,
    cache: Arc<SpatialCache>,
    db_factory: ContextFactory,
}

impl ProcessorNode {
    /// Creates a node from its configuration, handler registry, and database
    /// context factory. Shared components live for the node's lifetime.
    pub fn new(config: NodeConfig, registry: HandlerRegistry, db_factory: ContextFactory) -> Self {
        let manager = Arc::new(ConnectionManager::new());
        let router = Arc::new(NotificationRouter::new(manager.clone(), config.area_id));
        let cache = Arc::new(SpatialCache::new(config.cache));
        Self {
            config,
            registry: Arc::new(registry),
            manager,
            router,
            cache,
            db_factory,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn cache(&self) -> &Arc<SpatialCache> {
        &self.cache
    }

    /// Establishes the broker link for a processor node: connect out,
    /// register the link under the node's area id, and announce the area
    /// with a HELLO envelope. Does nothing on non-processor nodes.
    ///
    /// The link is made once at startup; it is never re-established after
    /// loss.
    pub async fn connect_broker(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), ServerError> {
        let Some(address) = self.config.broker_address.clone() else {
            return Ok(());
        };
        if self.config.area_id == 0 {
            return Ok(());
        }

        let handle = transport::connect_peer(&address, &self.manager, events).await?;
        self.manager
            .authenticate(handle.id(), self.config.area_id)
            .await;
        self.router
            .attach_broker(BrokerLink {
                connection_id: handle.id(),
                area_id: self.config.area_id,
            })
            .await;
        handle.enqueue(BrokerLink::hello(self.config.area_id));
        info!(
            "📡 broker link to {address} established for area {}",
            self.config.area_id
        );
        Ok(())
    }

    /// Runs the node until the transport closes its event channel or a fatal
    /// error (broker loss) occurs.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<(), ServerError> {
        let worker_count = self.config.workers.max(1);
        let mut worker_queues = Vec::with_capacity(worker_count);
        let mut worker_tasks = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (queue, incoming) = mpsc::unbounded_channel();
            let state = WorkerState {
                index,
                handlers: self.registry.build_worker(),
                db: (self.db_factory)(),
                codec: Codec::default(),
            };
            worker_tasks.push(tokio::spawn(worker_loop(
                state,
                incoming,
                queue.clone(),
                self.manager.clone(),
                self.router.clone(),
                self.cache.clone(),
            )));
            worker_queues.push(queue);
        }

        let tick_task = (self.config.tick_interval_ms > 0).then(|| {
            tokio::spawn(tick_loop(
                self.cache.clone(),
                Duration::from_millis(self.config.tick_interval_ms),
            ))
        });

        info!(
            "🚀 node running: {worker_count} workers, area {}",
            self.config.area_id
        );

        let result = loop {
            let Some(event) = events.recv().await else {
                break Ok(());
            };
            match event {
                TransportEvent::Request(envelope) => {
                    let slot = (envelope.connection_id % worker_count as u64) as usize;
                    if worker_queues[slot].send(envelope).is_err() {
                        break Err(ServerError::Internal(format!("worker {slot} is gone")));
                    }
                }
                TransportEvent::Forwarded {
                    connection_id,
                    envelope,
                } => {
                    if let Err(err) =
                        notify::handle_envelope(&self.manager, connection_id, &envelope).await
                    {
                        warn!(connection = connection_id, error = %err, "bad peer envelope");
                    }
                }
                TransportEvent::Disconnected { connection_id } => {
                    if let Err(err) = self.router.on_disconnect(connection_id).await {
                        break Err(err);
                    }
                }
            }
        };

        for task in &worker_tasks {
            task.abort();
        }
        if let Some(task) = tick_task {
            task.abort();
        }
        result
    }
}

async fn worker_loop(
    mut state: WorkerState,
    mut incoming: mpsc::UnboundedReceiver<RequestEnvelope>,
    requeue: mpsc::UnboundedSender<RequestEnvelope>,
    manager: Arc<ConnectionManager>,
    router: Arc<NotificationRouter>,
    cache: Arc<SpatialCache>,
) {
    while let Some(envelope) = incoming.recv().await {
        match dispatch(&envelope, &mut state, &manager, &router, &cache).await {
            DispatchOutcome::Respond(response) => {
                manager.send_to_connection(envelope.connection_id, response);
            }
            DispatchOutcome::NoResponse => {}
            DispatchOutcome::RetryLater => {
                // Back to the tail of this worker's own queue; how often to
                // retry is the transport's policy.
                let _ = requeue.send(envelope);
            }
        }
    }
}

async fn tick_loop(cache: Arc<SpatialCache>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        run_update_pass(&cache);
    }
}

/// One full pass over the updatables, holding the cache lock throughout.
fn run_update_pass(cache: &SpatialCache) {
    let mut guard = cache.begin_update();
    let mut position = 0;
    while let Some(updatable) = guard.next_updatable(position) {
        updatable.update();
        position += 1;
    }
}

/// Returns a `JoinHandle` running the node over the given event stream.
///
/// Convenience for embedders and tests that drive the node with in-memory
/// channels instead of sockets.
pub fn spawn_node(
    node: Arc<ProcessorNode>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) -> JoinHandle<Result<(), ServerError>> {
    tokio::spawn(async move { node.run(events).await })
}
