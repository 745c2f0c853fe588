//! Topology - the authoritative routing view
//!
//! A [`Topology`] is an immutable snapshot: one primary, an ordered replica
//! list and the set of replica indices eligible for reads. Changes produce a
//! new snapshot which [`TopologyStore`] publishes with a single pointer swap,
//! so readers see either the old or the new view, never a mix.

use crate::domain::entities::{now_millis, ClusterStatus, HealthSnapshot, Node};
use crate::domain::value_objects::NodeRole;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Immutable primary/replica assignment.
#[derive(Debug, Clone)]
pub struct Topology {
    primary: Arc<Node>,
    replicas: Vec<Arc<Node>>,
    /// Invariant: every id indexes `replicas` and that replica is healthy
    healthy_replica_ids: BTreeSet<usize>,
}

impl Topology {
    /// Build a topology, seeding the healthy set from nodes already healthy.
    pub fn new(primary: Arc<Node>, replicas: Vec<Arc<Node>>) -> Self {
        let healthy_replica_ids = replicas
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_healthy())
            .map(|(i, _)| i)
            .collect();
        Self {
            primary,
            replicas,
            healthy_replica_ids,
        }
    }

    pub fn primary(&self) -> &Arc<Node> {
        &self.primary
    }

    pub fn replicas(&self) -> &[Arc<Node>] {
        &self.replicas
    }

    pub fn replica(&self, id: usize) -> Option<&Arc<Node>> {
        self.replicas.get(id)
    }

    pub fn healthy_replica_ids(&self) -> &BTreeSet<usize> {
        &self.healthy_replica_ids
    }

    pub fn healthy_count(&self) -> usize {
        self.healthy_replica_ids.len()
    }

    /// Index of `node` in the replica list, by identity.
    pub fn replica_index(&self, node: &Arc<Node>) -> Option<usize> {
        self.replicas.iter().position(|r| Arc::ptr_eq(r, node))
    }

    pub fn is_primary(&self, node: &Arc<Node>) -> bool {
        Arc::ptr_eq(&self.primary, node)
    }

    /// Snapshot with `node`'s read eligibility set to `healthy`.
    ///
    /// Returns `None` if `node` is not a replica here or nothing changes.
    pub fn with_replica_health(&self, node: &Arc<Node>, healthy: bool) -> Option<Topology> {
        let id = self.replica_index(node)?;
        if self.healthy_replica_ids.contains(&id) == healthy {
            return None;
        }

        let mut next = self.clone();
        if healthy {
            next.healthy_replica_ids.insert(id);
        } else {
            next.healthy_replica_ids.remove(&id);
        }
        Some(next)
    }

    /// Snapshot with replica `id` promoted to primary.
    ///
    /// The old primary leaves the topology; replicas after `id` shift down
    /// one index and the healthy set is re-indexed to match.
    pub fn promote(&self, id: usize) -> Option<Topology> {
        let promoted = self.replicas.get(id)?.clone();

        let mut replicas = self.replicas.clone();
        replicas.remove(id);

        let healthy_replica_ids = self
            .healthy_replica_ids
            .iter()
            .filter(|&&i| i != id)
            .map(|&i| if i > id { i - 1 } else { i })
            .collect();

        Some(Topology {
            primary: promoted,
            replicas,
            healthy_replica_ids,
        })
    }

    /// Health report for every node in this snapshot.
    pub fn status(&self) -> ClusterStatus {
        let replicas = self
            .replicas
            .iter()
            .enumerate()
            .map(|(i, node)| {
                HealthSnapshot::of(
                    node,
                    NodeRole::Replica,
                    Some(i),
                    self.healthy_replica_ids.contains(&i),
                )
            })
            .collect();

        ClusterStatus {
            primary: HealthSnapshot::of(&self.primary, NodeRole::Primary, None, true),
            replicas,
            healthy_replica_count: self.healthy_replica_ids.len(),
            total_replica_count: self.replicas.len(),
            timestamp: now_millis(),
        }
    }
}

/// Holder of the current topology snapshot.
///
/// Reads are lock-free; writers are serialized so that a health update and a
/// promotion can never both derive from the same stale snapshot.
pub struct TopologyStore {
    current: ArcSwap<Topology>,
    writer: Mutex<()>,
}

impl TopologyStore {
    pub fn new(initial: Topology) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<Topology> {
        self.current.load_full()
    }

    /// Derive and publish a new snapshot from the latest one.
    ///
    /// `f` returns `None` to leave the topology untouched. Returns whether a
    /// new snapshot was published.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&Topology) -> Option<Topology>,
    {
        let _writer = self.writer.lock();
        let current = self.current.load_full();
        match f(&current) {
            Some(next) => {
                self.current.store(Arc::new(next));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::entities::NodeConfig;

    fn node(name: &str, healthy: bool) -> Arc<Node> {
        let node = Node::new(
            name,
            NodeConfig {
                host: name.to_string(),
                ..Default::default()
            },
            None,
        );
        node.record_health(healthy, Some(1), None);
        Arc::new(node)
    }

    fn topology(healthy: &[bool]) -> Topology {
        let replicas = healthy
            .iter()
            .enumerate()
            .map(|(i, h)| node(&format!("r{}", i), *h))
            .collect();
        Topology::new(node("p", true), replicas)
    }

    #[test]
    fn test_new_seeds_healthy_set() {
        let t = topology(&[true, false, true]);
        assert_eq!(t.healthy_replica_ids().iter().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(t.healthy_count(), 2);
    }

    #[test]
    fn test_unknown_replicas_not_in_pool() {
        let replica = Arc::new(Node::new("r0", NodeConfig::default(), None));
        let t = Topology::new(node("p", true), vec![replica]);
        assert!(t.healthy_replica_ids().is_empty());
    }

    #[test]
    fn test_replica_index_by_identity() {
        let t = topology(&[true, true]);
        let r1 = t.replicas()[1].clone();
        assert_eq!(t.replica_index(&r1), Some(1));
        assert_eq!(t.replica_index(t.primary()), None);
        assert!(t.is_primary(&t.primary().clone()));
    }

    #[test]
    fn test_with_replica_health_add_and_remove() {
        let t = topology(&[true, false]);
        let r0 = t.replicas()[0].clone();
        let r1 = t.replicas()[1].clone();

        let t2 = t.with_replica_health(&r0, false).unwrap();
        assert!(t2.healthy_replica_ids().is_empty());

        let t3 = t2.with_replica_health(&r1, true).unwrap();
        assert_eq!(t3.healthy_replica_ids().iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_with_replica_health_no_change() {
        let t = topology(&[true]);
        let r0 = t.replicas()[0].clone();
        assert!(t.with_replica_health(&r0, true).is_none());
        assert!(t.with_replica_health(&t.primary().clone(), false).is_none());
    }

    #[test]
    fn test_promote_reindexes() {
        // r0 healthy, r1 healthy (promoted), r2 healthy, r3 unhealthy
        let t = topology(&[true, true, true, false]);
        let r1 = t.replicas()[1].clone();
        let r2 = t.replicas()[2].clone();
        let r3 = t.replicas()[3].clone();

        let next = t.promote(1).unwrap();
        assert!(next.is_primary(&r1));
        assert_eq!(next.replicas().len(), 3);
        assert_eq!(next.replica_index(&r2), Some(1));
        assert_eq!(next.replica_index(&r3), Some(2));
        assert_eq!(next.healthy_replica_ids().iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_promote_out_of_range() {
        let t = topology(&[true]);
        assert!(t.promote(3).is_none());
    }

    #[test]
    fn test_status() {
        let t = topology(&[true, false]);
        let status = t.status();
        assert!(status.primary.is_healthy);
        assert_eq!(status.primary.role, NodeRole::Primary);
        assert_eq!(status.total_replica_count, 2);
        assert_eq!(status.healthy_replica_count, 1);
        assert!(status.replicas[0].in_pool);
        assert!(!status.replicas[1].in_pool);
        assert_eq!(status.replicas[1].index, Some(1));
    }

    #[test]
    fn test_store_update_publishes() {
        let store = TopologyStore::new(topology(&[true]));
        let before = store.load();
        let r0 = before.replicas()[0].clone();

        assert!(store.update(|t| t.with_replica_health(&r0, false)));
        assert!(store.load().healthy_replica_ids().is_empty());
        // Old snapshot is untouched
        assert_eq!(before.healthy_count(), 1);
    }

    #[test]
    fn test_store_update_none_keeps_snapshot() {
        let store = TopologyStore::new(topology(&[true]));
        let before = store.load();
        assert!(!store.update(|_| None));
        assert!(Arc::ptr_eq(&before, &store.load()));
    }
}
