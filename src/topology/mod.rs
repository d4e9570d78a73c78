/// Topology model: node descriptors and immutable snapshots
///
/// A `TopologySnapshot` is a versioned, immutable view of the cluster at a
/// point in time. Snapshots are replaced wholesale via the provider's
/// `set_partitions`, never mutated in place, so concurrent readers always
/// observe a self-consistent slot table.
pub mod parse;

use std::fmt;

use fnv::FnvHashMap;

use crate::error::{RumboError, RumboResult};
use crate::utils::SLOT_COUNT;

/// Replication role of a node, driven by the most recent role probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Writable primary of a replication group
    Upstream,
    /// Read-only copy replicating from an upstream
    Replica,
    /// Role not yet probed
    Unknown,
}

impl Role {
    /// Resolve a role from a probe reply (first element of a ROLE response
    /// or a CLUSTER NODES flag)
    pub fn from_probe(probe: &str) -> Role {
        match probe {
            "master" | "upstream" => Role::Upstream,
            "slave" | "replica" => Role::Replica,
            _ => Role::Unknown,
        }
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, Role::Upstream)
    }

    pub fn is_replica(&self) -> bool {
        matches!(self, Role::Replica)
    }
}

/// Network identity of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable description of one known node
///
/// Replaced wholesale on topology refresh; a role change produces a new
/// descriptor via [`NodeDescriptor::with_role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    address: NodeAddress,
    role: Role,
    node_id: Option<String>,
}

impl NodeDescriptor {
    pub fn new(address: NodeAddress, role: Role) -> Self {
        Self {
            address,
            role,
            node_id: None,
        }
    }

    /// Shorthand for an upstream node descriptor
    pub fn upstream<S: Into<String>>(host: S, port: u16) -> Self {
        Self::new(NodeAddress::new(host, port), Role::Upstream)
    }

    /// Shorthand for a replica node descriptor
    pub fn replica<S: Into<String>>(host: S, port: u16) -> Self {
        Self::new(NodeAddress::new(host, port), Role::Replica)
    }

    /// Attach the stable cluster node id
    pub fn with_id<S: Into<String>>(mut self, node_id: S) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Derive a descriptor with an updated role (role probe transition)
    pub fn with_role(&self, role: Role) -> Self {
        Self {
            address: self.address.clone(),
            role,
            node_id: self.node_id.clone(),
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }
}

/// One replication group of a cluster layout: an upstream, its replicas and
/// the slot ranges it owns (inclusive bounds)
#[derive(Debug, Clone)]
pub struct Shard {
    pub upstream: NodeDescriptor,
    pub replicas: Vec<NodeDescriptor>,
    pub slots: Vec<(u16, u16)>,
}

#[derive(Debug)]
enum Layout {
    /// Slot index -> index of the owning upstream in `nodes`; replicas keyed
    /// by the same index
    Cluster {
        slot_owner: Box<[Option<u32>]>,
        replicas_of: FnvHashMap<u32, Vec<u32>>,
    },
    /// A single replication group over the whole node list
    MasterReplica,
}

/// Immutable, versioned aggregate of node descriptors
#[derive(Debug)]
pub struct TopologySnapshot {
    version: u64,
    nodes: Vec<NodeDescriptor>,
    layout: Layout,
}

impl TopologySnapshot {
    /// Build a cluster snapshot from replication groups
    ///
    /// Fails if a slot range is out of bounds or two shards claim the same
    /// slot: ownership must be non-overlapping within one snapshot version.
    pub fn cluster(version: u64, shards: Vec<Shard>) -> RumboResult<Self> {
        let mut nodes = Vec::new();
        let mut slot_owner: Box<[Option<u32>]> = vec![None; SLOT_COUNT as usize].into();
        let mut replicas_of: FnvHashMap<u32, Vec<u32>> = FnvHashMap::default();

        for shard in shards {
            let owner_idx = nodes.len() as u32;
            nodes.push(shard.upstream.with_role(Role::Upstream));

            let mut replica_idxs = Vec::with_capacity(shard.replicas.len());
            for replica in shard.replicas {
                replica_idxs.push(nodes.len() as u32);
                nodes.push(replica.with_role(Role::Replica));
            }
            replicas_of.insert(owner_idx, replica_idxs);

            for (start, end) in shard.slots {
                if start > end || end >= SLOT_COUNT {
                    return Err(RumboError::topology(format!(
                        "invalid slot range {}-{}",
                        start, end
                    )));
                }
                for slot in start..=end {
                    let entry = &mut slot_owner[slot as usize];
                    if let Some(previous) = entry {
                        return Err(RumboError::topology(format!(
                            "slot {} claimed by both {} and {}",
                            slot,
                            nodes[*previous as usize].address(),
                            nodes[owner_idx as usize].address()
                        )));
                    }
                    *entry = Some(owner_idx);
                }
            }
        }

        Ok(Self {
            version,
            nodes,
            layout: Layout::Cluster {
                slot_owner,
                replicas_of,
            },
        })
    }

    /// Build a master-replica snapshot over a flat node list
    ///
    /// Construction always succeeds; [`TopologySnapshot::validate`] reports
    /// upstream ambiguity before the snapshot is installed.
    pub fn master_replica(version: u64, nodes: Vec<NodeDescriptor>) -> Self {
        Self {
            version,
            nodes,
            layout: Layout::MasterReplica,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self.layout, Layout::Cluster { .. })
    }

    /// Check snapshot invariants that cannot be enforced structurally
    ///
    /// For the master-replica layout exactly one upstream must be present;
    /// zero or multiple upstreams is surfaced, never guessed around, because
    /// write safety outranks availability.
    pub fn validate(&self) -> RumboResult<()> {
        match self.layout {
            Layout::Cluster { .. } => Ok(()),
            Layout::MasterReplica => {
                let upstreams: Vec<&NodeDescriptor> = self
                    .nodes
                    .iter()
                    .filter(|n| n.role().is_upstream())
                    .collect();
                match upstreams.len() {
                    1 => Ok(()),
                    0 => Err(RumboError::ambiguous("no upstream node in topology")),
                    n => Err(RumboError::ambiguous(format!(
                        "{} upstream nodes in one replication group: {}",
                        n,
                        upstreams
                            .iter()
                            .map(|d| d.address().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ))),
                }
            }
        }
    }

    /// Resolve the writable owner of a slot
    pub fn upstream_for_slot(&self, slot: u16) -> Option<&NodeDescriptor> {
        match &self.layout {
            Layout::Cluster { slot_owner, .. } => {
                let idx = (*slot_owner.get(slot as usize)?)?;
                self.nodes.get(idx as usize)
            }
            Layout::MasterReplica => self.nodes.iter().find(|n| n.role().is_upstream()),
        }
    }

    /// Resolve the replication group serving a slot, upstream first
    ///
    /// This is the candidate list handed to a read-target selector; order is
    /// stable per snapshot version.
    pub fn read_candidates(&self, slot: u16) -> Vec<&NodeDescriptor> {
        match &self.layout {
            Layout::Cluster {
                slot_owner,
                replicas_of,
            } => {
                let owner = match slot_owner.get(slot as usize).copied().flatten() {
                    Some(idx) => idx,
                    None => return Vec::new(),
                };
                let mut candidates = vec![&self.nodes[owner as usize]];
                if let Some(replicas) = replicas_of.get(&owner) {
                    candidates.extend(replicas.iter().map(|&i| &self.nodes[i as usize]));
                }
                candidates
            }
            Layout::MasterReplica => {
                let mut candidates: Vec<&NodeDescriptor> = self
                    .nodes
                    .iter()
                    .filter(|n| n.role().is_upstream())
                    .collect();
                candidates.extend(self.nodes.iter().filter(|n| n.role().is_replica()));
                candidates
            }
        }
    }

    /// Whether any node in the snapshot lives at the given address
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.iter().any(|n| n.address() == address)
    }
}
