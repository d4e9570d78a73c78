/// Parsing of topology discovery responses
///
/// The discovery service polls `CLUSTER NODES` (cluster mode) or `ROLE`
/// (master-replica mode) and feeds the raw replies through these parsers to
/// obtain the snapshot it installs via `set_partitions`. The polling itself
/// lives outside this crate.
use fnv::FnvHashMap;
use tracing::debug;

use super::{NodeAddress, NodeDescriptor, Shard, TopologySnapshot};
use crate::error::{RumboError, RumboResult};

/// Parse a full `CLUSTER NODES` response into a cluster snapshot
///
/// Nodes flagged `fail`, `handshake` or `noaddr` are dropped, as are slot
/// entries still importing/migrating (`[...]` markers). Replicas are linked
/// to their upstream by node id; replicas of unknown upstreams are ignored.
pub fn parse_cluster_nodes(version: u64, response: &str) -> RumboResult<TopologySnapshot> {
    let mut upstreams: Vec<(NodeLine, Vec<NodeDescriptor>)> = Vec::new();
    let mut orphans = 0usize;
    let mut replicas: Vec<NodeLine> = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = match parse_node_line(line) {
            Some(parsed) => parsed,
            None => {
                return Err(RumboError::topology(format!(
                    "malformed CLUSTER NODES line: {:?}",
                    line
                )))
            }
        };
        if parsed.unusable {
            debug!(address = %parsed.descriptor.address(), "skipping unusable node");
            continue;
        }
        if parsed.primary_id.is_some() {
            replicas.push(parsed);
        } else {
            upstreams.push((parsed, Vec::new()));
        }
    }

    if upstreams.is_empty() {
        return Err(RumboError::topology("no usable upstream nodes in response"));
    }

    let by_id: FnvHashMap<String, usize> = upstreams
        .iter()
        .enumerate()
        .filter_map(|(i, (line, _))| line.descriptor.node_id().map(|id| (id.to_string(), i)))
        .collect();

    for replica in replicas {
        let primary_id = replica.primary_id.as_deref().unwrap_or_default();
        match by_id.get(primary_id) {
            Some(&i) => upstreams[i].1.push(replica.descriptor),
            None => orphans += 1,
        }
    }
    if orphans > 0 {
        debug!(orphans, "replicas referenced unknown upstreams");
    }

    let shards = upstreams
        .into_iter()
        .map(|(line, replicas)| Shard {
            upstream: line.descriptor,
            replicas,
            slots: line.slots,
        })
        .collect();

    TopologySnapshot::cluster(version, shards)
}

/// Parse the first line of a `ROLE` reply into a refreshed descriptor
pub fn parse_role_probe(descriptor: &NodeDescriptor, reply: &str) -> NodeDescriptor {
    let probe = reply.lines().next().unwrap_or_default().trim();
    descriptor.with_role(super::Role::from_probe(probe))
}

struct NodeLine {
    descriptor: NodeDescriptor,
    primary_id: Option<String>,
    slots: Vec<(u16, u16)>,
    unusable: bool,
}

/// Parse one `CLUSTER NODES` line:
/// `<id> <ip:port@cport> <flags> <primary|-> <ping> <pong> <epoch> <link> [slots...]`
fn parse_node_line(line: &str) -> Option<NodeLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }

    let node_id = parts[0];
    let (host, port) = parse_node_address(parts[1])?;
    let flags: Vec<&str> = parts[2].split(',').collect();

    let is_replica = flags.contains(&"slave") || flags.contains(&"replica");
    let role = if is_replica {
        super::Role::Replica
    } else if flags.contains(&"master") {
        super::Role::Upstream
    } else {
        super::Role::Unknown
    };

    let unusable = flags
        .iter()
        .any(|f| matches!(*f, "fail" | "handshake" | "noaddr"))
        || parts[7] != "connected";

    let primary_id = if is_replica && parts[3] != "-" {
        Some(parts[3].to_string())
    } else {
        None
    };

    let mut slots = Vec::new();
    for spec in &parts[8..] {
        if let Some(range) = parse_slot_range(spec) {
            slots.push(range);
        }
    }

    Some(NodeLine {
        descriptor: NodeDescriptor::new(NodeAddress::new(host, port), role).with_id(node_id),
        primary_id,
        slots,
        unusable,
    })
}

/// Parse `host:port@busport` (optionally with a `,hostname` suffix)
fn parse_node_address(addr: &str) -> Option<(String, u16)> {
    let addr = addr.split(',').next().unwrap_or(addr);
    let host_port = addr.split('@').next().unwrap_or(addr);

    let (host, port) = host_port.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

/// Parse `0-5460` or `42`; importing/migrating markers (`[...]`) are skipped
fn parse_slot_range(spec: &str) -> Option<(u16, u16)> {
    if spec.contains('[') {
        return None;
    }
    if let Some((start, end)) = spec.split_once('-') {
        Some((start.parse().ok()?, end.parse().ok()?))
    } else {
        let slot: u16 = spec.parse().ok()?;
        Some((slot, slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Role;

    const CLUSTER_NODES: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
";

    #[test]
    fn test_parse_cluster_nodes() {
        let snapshot = parse_cluster_nodes(7, CLUSTER_NODES).unwrap();
        assert_eq!(snapshot.version(), 7);
        assert_eq!(snapshot.nodes().len(), 5);

        assert_eq!(
            snapshot.upstream_for_slot(0).unwrap().address(),
            &NodeAddress::new("127.0.0.1", 30001)
        );
        assert_eq!(
            snapshot.upstream_for_slot(5461).unwrap().address(),
            &NodeAddress::new("127.0.0.1", 30002)
        );
        assert_eq!(
            snapshot.upstream_for_slot(16383).unwrap().address(),
            &NodeAddress::new("127.0.0.1", 30003)
        );

        // Replica linked to its upstream through the node id
        let candidates = snapshot.read_candidates(0);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].address(), &NodeAddress::new("127.0.0.1", 30004));
        assert_eq!(candidates[1].role(), Role::Replica);
    }

    #[test]
    fn test_failed_nodes_skipped() {
        let response = "\
aaa 127.0.0.1:7000@17000 master - 0 0 1 connected 0-16383
bbb 127.0.0.1:7001@17001 master,fail - 0 0 2 connected
ccc 127.0.0.1:7002@17002 slave aaa 0 0 1 disconnected
";
        let snapshot = parse_cluster_nodes(1, response).unwrap();
        assert_eq!(snapshot.nodes().len(), 1);
        assert!(snapshot.read_candidates(0).len() == 1);
    }

    #[test]
    fn test_importing_slot_markers_skipped() {
        let response =
            "aaa 127.0.0.1:7000@17000 master - 0 0 1 connected 0-10 [11->-bbb]\n";
        let snapshot = parse_cluster_nodes(1, response).unwrap();
        assert!(snapshot.upstream_for_slot(10).is_some());
        assert!(snapshot.upstream_for_slot(11).is_none());
    }

    #[test]
    fn test_no_upstreams_is_error() {
        let response = "aaa 127.0.0.1:7000@17000 slave bbb 0 0 1 connected\n";
        assert!(matches!(
            parse_cluster_nodes(1, response),
            Err(RumboError::Topology { .. })
        ));
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(parse_cluster_nodes(1, "garbage line\n").is_err());
    }

    #[test]
    fn test_parse_node_address_variants() {
        assert_eq!(
            parse_node_address("127.0.0.1:6379@16379"),
            Some(("127.0.0.1".to_string(), 6379))
        );
        assert_eq!(
            parse_node_address("127.0.0.1:6379"),
            Some(("127.0.0.1".to_string(), 6379))
        );
        // ElastiCache-style trailing hostname
        assert_eq!(
            parse_node_address("10.0.0.1:6379@16379,node.example.com"),
            Some(("10.0.0.1".to_string(), 6379))
        );
        assert_eq!(parse_node_address(":6379"), None);
    }

    #[test]
    fn test_parse_role_probe() {
        let node = NodeDescriptor::new(NodeAddress::new("h", 1), Role::Unknown);
        assert_eq!(parse_role_probe(&node, "master\n42").role(), Role::Upstream);
        assert_eq!(parse_role_probe(&node, "slave").role(), Role::Replica);
        assert_eq!(parse_role_probe(&node, "").role(), Role::Unknown);
    }
}
