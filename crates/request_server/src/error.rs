//! Error types and handling for the request server.
//!
//! This module defines the error types that can occur during server
//! operations, providing clear categorization of different failure modes.
//! Request-level failures never appear here: those travel back to clients
//! through the response-code channel.

/// Enumeration of possible server errors.
///
/// `BrokerDown` is the one fatal variant: a processor node that loses its
/// broker link must tear down rather than keep running with silently
/// undeliverable notifications.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or connection issues
    #[error("network error: {0}")]
    Network(String),

    /// A handler registration collided with an existing `(category, method)`
    /// key in the same keyspace
    #[error("duplicate handler registration for ({category}, {method})")]
    DuplicateHandler { category: u8, method: u8 },

    /// A broker envelope was too short to carry its target suffix
    #[error("malformed broker envelope")]
    MalformedEnvelope,

    /// The broker link was lost on a processor node; fatal
    #[error("broker link lost; tearing the node down")]
    BrokerDown,

    /// Internal server errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}
