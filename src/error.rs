/// Unified error handling for rumbo
///
/// Routing and pool failures are surfaced to the immediate caller with a
/// precise, typed reason. Nothing in this crate retries internally; the
/// caller decides whether to retry, refresh topology, or abort.
use std::io;
use thiserror::Error;

use crate::topology::NodeAddress;

/// Main error type for rumbo operations
#[derive(Debug, Error)]
pub enum RumboError {
    /// No node can be determined for the requested slot/intent
    #[error("no route: {reason}")]
    NoRoute { reason: String },

    /// Transport failed to establish or reuse a connection to an address
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: NodeAddress,
        #[source]
        source: io::Error,
    },

    /// The operation was in flight when the connection was reset
    #[error("command canceled by connection reset")]
    Canceled,

    /// The provider or connection was closed before or during the operation
    #[error("provider is closed")]
    Closed,

    /// A topology snapshot failed validation (zero or multiple upstreams)
    #[error("topology ambiguous: {reason}")]
    TopologyAmbiguous { reason: String },

    /// A topology source (CLUSTER NODES, ROLE) could not be parsed
    #[error("topology error: {reason}")]
    Topology { reason: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport I/O outside of connection establishment
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for rumbo operations
pub type RumboResult<T> = Result<T, RumboError>;

impl RumboError {
    /// Create a no-route error
    pub fn no_route<S: Into<String>>(reason: S) -> Self {
        RumboError::NoRoute {
            reason: reason.into(),
        }
    }

    /// Create a connect error for a specific address
    pub fn connect(address: NodeAddress, source: io::Error) -> Self {
        RumboError::Connect { address, source }
    }

    /// Create a topology-ambiguous error
    pub fn ambiguous<S: Into<String>>(reason: S) -> Self {
        RumboError::TopologyAmbiguous {
            reason: reason.into(),
        }
    }

    /// Create a topology parse error
    pub fn topology<S: Into<String>>(reason: S) -> Self {
        RumboError::Topology {
            reason: reason.into(),
        }
    }

    /// True when refreshing the topology snapshot may resolve the failure
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            RumboError::NoRoute { .. } | RumboError::TopologyAmbiguous { .. }
        )
    }

    /// True when the failure came from the transport and a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RumboError::Connect { .. } | RumboError::Transport(_) | RumboError::Canceled
        )
    }
}
