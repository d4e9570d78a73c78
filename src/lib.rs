//! Rumbo - routing and connection-management core for partitioned,
//! replicated Redis-compatible key-value stores
//!
//! Given an operation's intent (read or write) and a routing key (hash slot
//! or explicit node address), rumbo resolves a live pooled connection to the
//! correct node:
//! - a versioned, immutable topology snapshot maps slots to replication
//!   groups and is swapped atomically on refresh
//! - a pluggable read-from policy steers reads to replicas
//! - a connection pool creates at most one connection per node address, with
//!   single-flight creation
//! - per-connection command buffering enables pipelining, and a reset
//!   protocol recovers desynchronized request/response bookkeeping
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod provider;
pub mod topology;
pub mod transport;
pub mod utils;

pub use config::{AmbiguityPolicy, RoutingConfig};
pub use connection::{CommandFuture, NodeConnection};
pub use error::{ConfigError, RumboError, RumboResult};
pub use provider::{read_from, ConnectionProvider, Intent};
pub use topology::{NodeAddress, NodeDescriptor, Role, Shard, TopologySnapshot};
pub use transport::{Connector, TcpConnector, Transport};
pub use utils::slot_for_key;

/// Install a global tracing subscriber honoring `RUST_LOG`
///
/// Convenience for binaries and tests embedding the core; returns false if a
/// subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .is_ok()
}
