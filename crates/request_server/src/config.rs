//! Node configuration types and defaults.
//!
//! This module contains the node configuration structure and default values
//! used to initialize a processor or broker node. File parsing and CLI
//! overrides live in the binary crate; the library only consumes the merged
//! result.

use crate::cache::CacheBounds;
use serde::{Deserialize, Serialize};

/// Configuration for one request-server node.
///
/// A node with a nonzero `area_id` and a broker address acts as a processor
/// for that area: it connects out to the broker at startup and forwards
/// notifications it cannot deliver locally. A node with neither acts as a
/// standalone server, or as the broker itself when fed suffixed envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Number of worker tasks; each owns its handler pool and DB context
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Which node type's handlers to register; 0 accepts only shared ones
    #[serde(default)]
    pub server_id: u8,

    /// The area this node owns; 0 means the node is not a processor
    #[serde(default)]
    pub area_id: u64,

    /// Broker endpoint for processor nodes, e.g. "10.0.0.5:7601"
    #[serde(default)]
    pub broker_address: Option<String>,

    /// Cache updater tick interval in milliseconds (0 to disable)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Spatial bounds and LOS radius for this node's object cache
    pub cache: CacheBounds,
}

fn default_workers() -> usize {
    4
}

fn default_tick_interval() -> u64 {
    0
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            server_id: 0,
            area_id: 0,
            broker_address: None,
            tick_interval_ms: default_tick_interval(),
            cache: CacheBounds::default(),
        }
    }
}

impl NodeConfig {
    /// Whether this node owns an area and must hold a broker link.
    pub fn is_processor(&self) -> bool {
        self.area_id != 0 && self.broker_address.is_some()
    }
}
