/// Connection pool keyed by node address
///
/// One address maps to at most one live connection. Creation is guarded by a
/// per-address mutex so concurrent callers for the same node wait for a
/// single connect attempt instead of racing, while callers for different
/// nodes proceed independently.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::connection::NodeConnection;
use crate::error::{RumboError, RumboResult};
use crate::topology::{NodeAddress, TopologySnapshot};
use crate::transport::Connector;

#[derive(Default)]
struct SlotState {
    connection: Option<Arc<NodeConnection>>,
    /// Set under the cell lock when the slot leaves the map; creation into a
    /// detached slot must restart against the map
    retired: bool,
}

#[derive(Default)]
struct PoolSlot {
    /// Locked only while creating or replacing the entry
    cell: Mutex<SlotState>,
}

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    /// Auto-flush mode shared with every connection this pool creates
    auto_flush: Arc<AtomicBool>,
    slots: RwLock<FnvHashMap<NodeAddress, Arc<PoolSlot>>>,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            auto_flush: Arc::new(AtomicBool::new(true)),
            slots: RwLock::new(FnvHashMap::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Switch the auto-flush mode for current and future connections
    pub fn set_auto_flush(&self, auto_flush: bool) {
        self.auto_flush.store(auto_flush, Ordering::SeqCst);
    }

    pub fn auto_flush(&self) -> bool {
        self.auto_flush.load(Ordering::SeqCst)
    }

    /// Get the pooled connection for an address, creating it on first demand
    ///
    /// At most one connect attempt per address is in flight; a failed
    /// attempt leaves the slot empty so the next caller retries. A slot that
    /// was invalidated between the map lookup and the cell lock is retired;
    /// creation restarts so the new connection always lands in the slot the
    /// map registers, where `retain_in` and `close_all` can reach it.
    pub async fn get_or_create(&self, address: &NodeAddress) -> RumboResult<Arc<NodeConnection>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(RumboError::Closed);
            }
            let slot = {
                let slots = self.slots.read().await;
                slots.get(address).cloned()
            };
            let slot = match slot {
                Some(slot) => slot,
                None => {
                    let mut slots = self.slots.write().await;
                    slots.entry(address.clone()).or_default().clone()
                }
            };

            let mut cell = slot.cell.lock().await;
            if cell.retired {
                continue;
            }
            if let Some(connection) = cell.connection.as_ref() {
                if !connection.is_closed() {
                    return Ok(Arc::clone(connection));
                }
            }

            let transport = self
                .connector
                .connect(address)
                .await
                .map_err(|e| RumboError::connect(address.clone(), e))?;
            let connection = Arc::new(NodeConnection::new(
                address.clone(),
                transport,
                Arc::clone(&self.auto_flush),
            ));
            cell.connection = Some(Arc::clone(&connection));

            // close_all may have drained the map while this creation was in
            // flight; a connection it can no longer reach is torn down here
            if self.closed.load(Ordering::SeqCst) {
                cell.connection = None;
                cell.retired = true;
                drop(cell);
                connection.close().await;
                return Err(RumboError::Closed);
            }
            return Ok(connection);
        }
    }

    /// Close and remove the entry for an address, if any
    pub async fn invalidate(&self, address: &NodeAddress) {
        let slot = {
            let mut slots = self.slots.write().await;
            slots.remove(address)
        };
        if let Some(slot) = slot {
            let mut cell = slot.cell.lock().await;
            cell.retired = true;
            if let Some(connection) = cell.connection.take() {
                debug!(%address, "invalidating pooled connection");
                connection.close().await;
            }
        }
    }

    /// Drop every entry whose address is absent from the snapshot
    pub async fn retain_in(&self, snapshot: &TopologySnapshot) -> usize {
        let stale: Vec<NodeAddress> = {
            let slots = self.slots.read().await;
            slots
                .keys()
                .filter(|address| !snapshot.contains(address))
                .cloned()
                .collect()
        };
        for address in &stale {
            self.invalidate(address).await;
        }
        if !stale.is_empty() {
            info!(
                removed = stale.len(),
                version = snapshot.version(),
                "pool reconciled against new topology"
            );
        }
        stale.len()
    }

    /// Snapshot the live connections for provider-wide operations
    ///
    /// Slots whose cell is locked are mid-creation and hold nothing to
    /// operate on, so they are skipped instead of waited for.
    pub async fn connections(&self) -> Vec<Arc<NodeConnection>> {
        let slots: Vec<Arc<PoolSlot>> = {
            let slots = self.slots.read().await;
            slots.values().cloned().collect()
        };
        let mut connections = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Ok(cell) = slot.cell.try_lock() {
                if let Some(connection) = cell.connection.as_ref() {
                    if !connection.is_closed() {
                        connections.push(Arc::clone(connection));
                    }
                }
            }
        }
        connections
    }

    /// Tear down every pooled connection; the pool refuses creation from
    /// this point on
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let slots: Vec<Arc<PoolSlot>> = {
            let mut slots = self.slots.write().await;
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            let mut cell = slot.cell.lock().await;
            cell.retired = true;
            if let Some(connection) = cell.connection.take() {
                connection.close().await;
            }
        }
    }
}
