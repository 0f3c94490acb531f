//! Main application logic and lifecycle management.
//!
//! The `Application` struct ties the pieces together: configuration, the
//! handler registry, the database pool, the node, and the two listeners. It
//! runs the node until a shutdown signal or a fatal error (broker loss)
//! stops it.

use crate::config::AppConfig;
use request_server::handler::{PingHandler, PING_DESCRIPTOR};
use request_server::node::spawn_node;
use request_server::transport::{self, Framing};
use request_server::{
    ContextFactory, DatabaseContext, HandlerRegistry, PgDatabaseContext, ProcessorNode,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

/// The assembled node and its configuration.
pub struct Application {
    config: AppConfig,
    node: Arc<ProcessorNode>,
}

impl Application {
    /// Builds the node: registry with the built-in handlers, a lazily
    /// connecting database pool, and the shared components.
    ///
    /// Game-rules handler crates register themselves here as they are added
    /// to the deployment; the core ships only the diagnostics ping.
    pub fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut registry = HandlerRegistry::new(config.server.server_id);
        registry.register(&PING_DESCRIPTOR, PingHandler::new)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.server.workers as u32 + 2)
            .connect_lazy(&config.database.url())?;
        let factory: ContextFactory = Arc::new(move || {
            Box::new(PgDatabaseContext::new(pool.clone())) as Box<dyn DatabaseContext>
        });

        let node = Arc::new(ProcessorNode::new(
            config.to_node_config(),
            registry,
            factory,
        ));
        Ok(Self { config, node })
    }

    /// Runs the node until shutdown.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let (events, event_rx) = mpsc::unbounded_channel();

        let tcp_listener = TcpListener::bind(&self.config.server.tcp_bind).await?;
        let ws_listener = TcpListener::bind(&self.config.server.ws_bind).await?;
        tokio::spawn(transport::serve_tcp(
            tcp_listener,
            self.node.manager().clone(),
            events.clone(),
            Framing::Plain,
        ));
        tokio::spawn(transport::serve_websocket(
            ws_listener,
            self.node.manager().clone(),
            events.clone(),
        ));

        self.node.connect_broker(events.clone()).await?;

        info!(
            "🚀 Warden node up: tcp {}, ws {}, {} workers",
            self.config.server.tcp_bind, self.config.server.ws_bind, self.config.server.workers
        );

        let node_task = spawn_node(self.node.clone(), event_rx);
        tokio::select! {
            result = node_task => {
                match result {
                    Ok(Ok(())) => info!("node stopped"),
                    Ok(Err(err)) => {
                        error!(error = %err, "node failed");
                        return Err(err.into());
                    }
                    Err(err) => {
                        error!(error = %err, "node task panicked");
                        return Err(err.into());
                    }
                }
            }
            result = crate::signals::wait_for_shutdown() => {
                result?;
                info!("shutting down");
            }
        }
        Ok(())
    }
}
