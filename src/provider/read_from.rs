/// Read-target selection policies
///
/// A policy is a pure function over the replication group serving a slot:
/// it never consults connection health, only topology roles. Liveness is
/// discovered when the provider tries the returned candidates in order. An
/// empty selection is a hard no-route failure, never a silent upstream
/// fallback.
use std::sync::Arc;

use crate::topology::NodeDescriptor;

/// Strategy resolving the ordered read candidates for a replication group
///
/// `candidates` arrives upstream-first in snapshot order. Closures with the
/// matching signature implement the trait, so custom policies need no
/// dedicated type.
pub trait ReadFrom: Send + Sync {
    fn select<'a>(&self, candidates: &[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor>;

    /// Policy name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> ReadFrom for F
where
    F: for<'a> Fn(&[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor> + Send + Sync,
{
    fn select<'a>(&self, candidates: &[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor> {
        self(candidates)
    }
}

/// Read from the upstream only, disabling replica reads
pub struct Upstream;

impl ReadFrom for Upstream {
    fn select<'a>(&self, candidates: &[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor> {
        candidates
            .iter()
            .copied()
            .filter(|n| n.role().is_upstream())
            .collect()
    }

    fn name(&self) -> &'static str {
        "upstream"
    }
}

/// Read from replicas only, excluding the upstream
pub struct Replica;

impl ReadFrom for Replica {
    fn select<'a>(&self, candidates: &[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor> {
        candidates
            .iter()
            .copied()
            .filter(|n| n.role().is_replica())
            .collect()
    }

    fn name(&self) -> &'static str {
        "replica"
    }
}

/// Read from any node of the group, replicas first
pub struct Any;

impl ReadFrom for Any {
    fn select<'a>(&self, candidates: &[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor> {
        let mut selected: Vec<&NodeDescriptor> = candidates
            .iter()
            .copied()
            .filter(|n| n.role().is_replica())
            .collect();
        selected.extend(candidates.iter().copied().filter(|n| n.role().is_upstream()));
        selected
    }

    fn name(&self) -> &'static str {
        "any"
    }
}

/// Resolve a built-in policy by configuration name
pub fn from_name(name: &str) -> Option<Arc<dyn ReadFrom>> {
    match name {
        "upstream" | "master" => Some(Arc::new(Upstream)),
        "replica" => Some(Arc::new(Replica)),
        "any" => Some(Arc::new(Any)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Vec<NodeDescriptor> {
        vec![
            NodeDescriptor::upstream("10.0.0.1", 6379),
            NodeDescriptor::replica("10.0.0.2", 6379),
            NodeDescriptor::replica("10.0.0.3", 6379),
        ]
    }

    fn refs(nodes: &[NodeDescriptor]) -> Vec<&NodeDescriptor> {
        nodes.iter().collect()
    }

    #[test]
    fn test_upstream_only() {
        let nodes = group();
        let selected = Upstream.select(&refs(&nodes));
        assert_eq!(selected.len(), 1);
        assert!(selected[0].role().is_upstream());
    }

    #[test]
    fn test_replica_excludes_upstream() {
        let nodes = group();
        let selected = Replica.select(&refs(&nodes));
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|n| n.role().is_replica()));
    }

    #[test]
    fn test_any_orders_replicas_first() {
        let nodes = group();
        let selected = Any.select(&refs(&nodes));
        assert_eq!(selected.len(), 3);
        assert!(selected[0].role().is_replica());
        assert!(selected[1].role().is_replica());
        assert!(selected[2].role().is_upstream());
    }

    #[test]
    fn test_replica_with_no_replicas_is_empty() {
        let nodes = vec![NodeDescriptor::upstream("10.0.0.1", 6379)];
        assert!(Replica.select(&refs(&nodes)).is_empty());
    }

    #[test]
    fn test_function_policy() {
        fn reversed<'a>(candidates: &[&'a NodeDescriptor]) -> Vec<&'a NodeDescriptor> {
            let mut v = candidates.to_vec();
            v.reverse();
            v
        }

        let nodes = group();
        let selected = reversed.select(&refs(&nodes));
        assert!(selected[0].role().is_replica());
        assert!(selected[2].role().is_upstream());
        assert_eq!(ReadFrom::name(&reversed), "custom");
    }

    #[test]
    fn test_from_name() {
        assert!(from_name("upstream").is_some());
        assert!(from_name("master").is_some());
        assert!(from_name("replica").is_some());
        assert!(from_name("any").is_some());
        assert!(from_name("nearest").is_none());
    }
}
