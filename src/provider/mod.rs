/// Connection provider façade
///
/// Resolves an operation's intent and routing key to a live pooled
/// connection using the installed topology snapshot and the configured
/// read-target policy, and exposes the provider-wide lifecycle operations
/// (topology swap, flush control, reset, close).
pub mod read_from;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{AmbiguityPolicy, RoutingConfig};
use crate::connection::NodeConnection;
use crate::error::{RumboError, RumboResult};
use crate::pool::ConnectionPool;
use crate::topology::{NodeAddress, NodeDescriptor, TopologySnapshot};
use crate::transport::{Connector, TcpConnector};

use read_from::ReadFrom;

/// Caller's declared purpose for a requested connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
}

pub struct ConnectionProvider {
    pool: ConnectionPool,
    read_from: RwLock<Arc<dyn ReadFrom>>,
    topology: RwLock<Option<Arc<TopologySnapshot>>>,
    ambiguity_policy: AmbiguityPolicy,
    closed: AtomicBool,
}

impl ConnectionProvider {
    pub fn new(connector: Arc<dyn Connector>, read_from: Arc<dyn ReadFrom>) -> Self {
        Self {
            pool: ConnectionPool::new(connector),
            read_from: RwLock::new(read_from),
            topology: RwLock::new(None),
            ambiguity_policy: AmbiguityPolicy::Fail,
            closed: AtomicBool::new(false),
        }
    }

    /// Build a provider over TCP from a validated configuration
    pub fn from_config(config: &RoutingConfig) -> RumboResult<Self> {
        config.validate()?;
        let connector = Arc::new(TcpConnector::new(Duration::from_millis(
            config.connect_timeout_ms,
        )));
        let read_from = read_from::from_name(&config.read_from)
            .expect("validated config names a built-in read-from policy");
        let mut provider = Self::new(connector, read_from);
        provider.ambiguity_policy = config.ambiguity_policy();
        provider.pool.set_auto_flush(config.auto_flush);
        Ok(provider)
    }

    /// Override how ambiguous master-replica snapshots are handled
    pub fn with_ambiguity_policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.ambiguity_policy = policy;
        self
    }

    /// Swap the read-target policy; takes effect on the next resolution
    pub async fn set_read_from(&self, read_from: Arc<dyn ReadFrom>) {
        info!(policy = read_from.name(), "read-from policy changed");
        *self.read_from.write().await = read_from;
    }

    /// The currently installed snapshot, if any
    pub async fn current_snapshot(&self) -> Option<Arc<TopologySnapshot>> {
        self.topology.read().await.clone()
    }

    /// Provide a connection for the intent and hash slot
    ///
    /// WRITE resolves the slot's upstream. READ runs the read-from policy
    /// over the slot's replication group and tries the selected candidates
    /// in order; the last connect error propagates if none is reachable.
    pub async fn get_connection(
        &self,
        intent: Intent,
        slot: u16,
    ) -> RumboResult<Arc<NodeConnection>> {
        self.ensure_open()?;
        let snapshot = self
            .current_snapshot()
            .await
            .ok_or_else(|| RumboError::no_route("no topology snapshot installed"))?;

        match intent {
            Intent::Write => {
                let upstream = snapshot.upstream_for_slot(slot).ok_or_else(|| {
                    RumboError::no_route(format!("slot {} has no upstream", slot))
                })?;
                self.checkout(upstream).await
            }
            Intent::Read => {
                let candidates = snapshot.read_candidates(slot);
                if candidates.is_empty() {
                    return Err(RumboError::no_route(format!(
                        "slot {} has no assigned nodes",
                        slot
                    )));
                }
                let selected = {
                    let read_from = self.read_from.read().await;
                    read_from.select(&candidates)
                };
                if selected.is_empty() {
                    return Err(RumboError::no_route(format!(
                        "read-from policy selected no nodes for slot {}",
                        slot
                    )));
                }

                let mut last_error = None;
                for candidate in selected {
                    match self.checkout(candidate).await {
                        Ok(connection) => return Ok(connection),
                        Err(e) => {
                            debug!(address = %candidate.address(), error = %e,
                                "read candidate unreachable, trying next");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error.expect("at least one candidate was attempted"))
            }
        }
    }

    /// Provide a connection for the intent and explicit address, bypassing
    /// topology resolution; READ connections are tagged read-only
    pub async fn get_connection_to(
        &self,
        intent: Intent,
        host: &str,
        port: u16,
    ) -> RumboResult<Arc<NodeConnection>> {
        self.ensure_open()?;
        let address = NodeAddress::new(host, port);
        let connection = self.pool.get_or_create(&address).await?;
        if intent == Intent::Read {
            connection.ensure_read_only().await?;
        }
        Ok(connection)
    }

    /// Atomically install a new topology snapshot
    ///
    /// Validation failures are handled per the ambiguity policy; in both
    /// cases the previous valid snapshot stays installed, so routing never
    /// sees a half-formed topology. After installation the pool drops
    /// entries for addresses that left the topology.
    pub async fn set_partitions(&self, snapshot: TopologySnapshot) -> RumboResult<()> {
        self.ensure_open()?;
        if let Err(e) = snapshot.validate() {
            match self.ambiguity_policy {
                AmbiguityPolicy::Fail => return Err(e),
                AmbiguityPolicy::KeepPrevious => {
                    warn!(error = %e, "rejected topology snapshot, keeping previous");
                    return Ok(());
                }
            }
        }

        let snapshot = Arc::new(snapshot);
        {
            let mut topology = self.topology.write().await;
            *topology = Some(Arc::clone(&snapshot));
        }
        info!(
            version = snapshot.version(),
            nodes = snapshot.nodes().len(),
            "topology snapshot installed"
        );
        self.pool.retain_in(&snapshot).await;
        Ok(())
    }

    /// Toggle command auto-flush for all pooled connections, current and
    /// future; enabling flushes any backlog
    ///
    /// The mode is a single flag shared with every connection and read at
    /// dispatch time, so connections whose creation straddles the toggle
    /// still observe it.
    pub async fn set_auto_flush_commands(&self, auto_flush: bool) -> RumboResult<()> {
        self.ensure_open()?;
        self.pool.set_auto_flush(auto_flush);
        if auto_flush {
            self.flush_commands().await?;
        }
        Ok(())
    }

    /// Transmit all buffered commands on all pooled connections
    pub async fn flush_commands(&self) -> RumboResult<()> {
        self.ensure_open()?;
        let results = join_all(
            self.pool
                .connections()
                .await
                .into_iter()
                .map(|c| async move { c.flush_commands().await }),
        )
        .await;
        results.into_iter().collect()
    }

    /// Cancel outstanding commands on every pooled connection and reset
    /// their write/read bookkeeping, keeping transports alive
    pub async fn reset(&self) -> RumboResult<()> {
        self.ensure_open()?;
        join_all(
            self.pool
                .connections()
                .await
                .into_iter()
                .map(|c| async move { c.reset().await }),
        )
        .await;
        Ok(())
    }

    /// Close all pooled connections and release the provider
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing connection provider");
        self.pool.close_all().await;
    }

    async fn checkout(&self, node: &NodeDescriptor) -> RumboResult<Arc<NodeConnection>> {
        let connection = self.pool.get_or_create(node.address()).await?;
        if node.role().is_replica() {
            connection.ensure_read_only().await?;
        }
        Ok(connection)
    }

    fn ensure_open(&self) -> RumboResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(RumboError::Closed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;

    use crate::topology::Shard;
    use crate::transport::Transport;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn write_all(&mut self, _payload: &[u8]) -> io::Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
        async fn set_read_only(&mut self, _read_only: bool) -> io::Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        async fn connect(&self, _address: &NodeAddress) -> io::Result<Box<dyn Transport>> {
            Ok(Box::new(NullTransport))
        }
    }

    fn provider() -> ConnectionProvider {
        ConnectionProvider::new(Arc::new(NullConnector), Arc::new(read_from::Upstream))
    }

    fn one_shard_snapshot(version: u64) -> TopologySnapshot {
        TopologySnapshot::cluster(
            version,
            vec![Shard {
                upstream: NodeDescriptor::upstream("10.0.0.1", 6379),
                replicas: vec![],
                slots: vec![(0, 16383)],
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_requires_installed_topology() {
        let provider = provider();
        let result = provider.get_connection(Intent::Write, 0).await;
        assert!(matches!(result, Err(RumboError::NoRoute { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_swap_is_atomic_per_resolution() {
        let provider = provider();
        provider.set_partitions(one_shard_snapshot(1)).await.unwrap();
        let before = provider.current_snapshot().await.unwrap();

        provider.set_partitions(one_shard_snapshot(2)).await.unwrap();
        let after = provider.current_snapshot().await.unwrap();

        // Holders of the previous snapshot keep a consistent view
        assert_eq!(before.version(), 1);
        assert_eq!(after.version(), 2);
    }

    #[tokio::test]
    async fn test_ambiguous_snapshot_fail_policy() {
        let provider = provider();
        provider.set_partitions(one_shard_snapshot(1)).await.unwrap();

        let ambiguous = TopologySnapshot::master_replica(
            2,
            vec![
                NodeDescriptor::upstream("10.0.0.1", 6379),
                NodeDescriptor::upstream("10.0.0.2", 6379),
            ],
        );
        let result = provider.set_partitions(ambiguous).await;
        assert!(matches!(result, Err(RumboError::TopologyAmbiguous { .. })));

        // Previous snapshot retained
        assert_eq!(provider.current_snapshot().await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_ambiguous_snapshot_keep_previous_policy() {
        let provider = provider().with_ambiguity_policy(AmbiguityPolicy::KeepPrevious);
        provider.set_partitions(one_shard_snapshot(1)).await.unwrap();

        let ambiguous =
            TopologySnapshot::master_replica(2, vec![NodeDescriptor::replica("10.0.0.2", 6379)]);
        assert!(provider.set_partitions(ambiguous).await.is_ok());
        assert_eq!(provider.current_snapshot().await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_closed() {
        let provider = provider();
        provider.set_partitions(one_shard_snapshot(1)).await.unwrap();
        provider.close().await;

        assert!(matches!(
            provider.get_connection(Intent::Write, 0).await,
            Err(RumboError::Closed)
        ));
        assert!(matches!(
            provider.get_connection_to(Intent::Read, "10.0.0.1", 6379).await,
            Err(RumboError::Closed)
        ));
        assert!(matches!(
            provider.flush_commands().await,
            Err(RumboError::Closed)
        ));
        assert!(matches!(
            provider.set_partitions(one_shard_snapshot(2)).await,
            Err(RumboError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_from_config_rejects_unknown_policy() {
        let mut config = RoutingConfig::default();
        config.read_from = "nearest".to_string();
        assert!(ConnectionProvider::from_config(&config).is_err());
    }
}
