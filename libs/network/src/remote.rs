//! Remote Node Directory
//!
//! Everything this platform knows about its peers: one [`NodeRecord`] per
//! node address, the remote entity name → node(s) mapping populated by
//! propagation, the alias table used by `name@alias[:port]` addressing, and a
//! platform-id cache used by discovery to recognise peers it already knows.
//!
//! Written by the discovery listener, the TCP readers, the heartbeat task and
//! application threads (aliases, manual connects); read on every remote
//! routing decision. A `parking_lot::RwLock` covers the tables. Handshake
//! waiters block on a `Condvar` that is signalled after every change to a
//! node's propagation state.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use types::{NodeAddress, PlatformId};

/// Per-peer state
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node: NodeAddress,
    /// Unknown until the first frame from the peer arrives
    pub platform_id: Option<PlatformId>,
    /// Peer's directory snapshot received and handshake complete
    pub propagated: bool,
    pub alias: Option<String>,
    pub last_seen: Instant,
    pub names: BTreeSet<String>,
}

impl NodeRecord {
    fn pending(node: NodeAddress) -> Self {
        Self {
            node,
            platform_id: None,
            propagated: false,
            alias: None,
            last_seen: Instant::now(),
            names: BTreeSet::new(),
        }
    }
}

/// Inspection view of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub node: NodeAddress,
    pub platform_id: Option<PlatformId>,
    pub alias: Option<String>,
    pub propagated: bool,
    pub entity_count: usize,
}

/// Result of waiting for a handshake to complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Propagated,
    /// Record purged while waiting (connect failure, disconnect)
    Gone,
    TimedOut,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeAddress, NodeRecord>,
    entities: HashMap<String, Vec<NodeAddress>>,
    aliases: HashMap<String, NodeAddress>,
    platforms: HashMap<PlatformId, NodeAddress>,
}

impl Inner {
    fn unlink_names(&mut self, node: &NodeAddress, names: &BTreeSet<String>) {
        for name in names {
            if let Some(nodes) = self.entities.get_mut(name) {
                nodes.retain(|n| n != node);
                if nodes.is_empty() {
                    self.entities.remove(name);
                }
            }
        }
    }

    fn link_name(&mut self, node: NodeAddress, name: &str) {
        let nodes = self.entities.entry(name.to_string()).or_default();
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    }
}

/// Concurrent table of remote platforms and the entities they host
#[derive(Default)]
pub struct RemoteDirectory {
    inner: RwLock<Inner>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl RemoteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn signal(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Create a record awaiting handshake; returns `false` if one exists
    pub fn upsert_pending(&self, node: NodeAddress) -> bool {
        let mut inner = self.inner.write();
        if inner.nodes.contains_key(&node) {
            return false;
        }
        inner.nodes.insert(node, NodeRecord::pending(node));
        debug!(node = %node, "Remote node pending handshake");
        true
    }

    /// Attach the platform identifier announced by `node`
    ///
    /// A different identifier on a known node means the peer restarted: the
    /// old incarnation's names and propagation state are discarded. Returns
    /// `true` in that case.
    pub fn record_platform(&self, node: NodeAddress, platform_id: PlatformId) -> bool {
        let restarted = {
            let mut inner = self.inner.write();
            let previous = inner
                .nodes
                .entry(node)
                .or_insert_with(|| NodeRecord::pending(node))
                .platform_id;

            let restarted = matches!(previous, Some(old) if old != platform_id);
            if restarted {
                let names = inner
                    .nodes
                    .get_mut(&node)
                    .map(|record| {
                        record.propagated = false;
                        std::mem::take(&mut record.names)
                    })
                    .unwrap_or_default();
                inner.unlink_names(&node, &names);
                if let Some(old) = previous {
                    inner.platforms.remove(&old);
                }
            }

            if let Some(record) = inner.nodes.get_mut(&node) {
                record.platform_id = Some(platform_id);
            }
            inner.platforms.insert(platform_id, node);
            restarted
        };

        if restarted {
            info!(node = %node, platform_id = %platform_id, "Remote platform restarted, previous directory discarded");
            self.signal();
        }
        restarted
    }

    /// Replace the names hosted by `node` with a full snapshot
    pub fn replace_names(&self, node: NodeAddress, names: &[String]) {
        let mut inner = self.inner.write();
        let Some(record) = inner.nodes.get_mut(&node) else {
            return;
        };
        let old = std::mem::take(&mut record.names);
        record.names = names.iter().cloned().collect();
        inner.unlink_names(&node, &old);
        for name in names {
            inner.link_name(node, name);
        }
    }

    /// Add names hosted by `node`; `false` if the node is unknown
    pub fn add_names(&self, node: NodeAddress, names: &[String]) -> bool {
        let mut inner = self.inner.write();
        let Some(record) = inner.nodes.get_mut(&node) else {
            return false;
        };
        record.names.extend(names.iter().cloned());
        for name in names {
            inner.link_name(node, name);
        }
        true
    }

    /// Remove names no longer hosted by `node`
    pub fn remove_names(&self, node: NodeAddress, names: &[String]) {
        let mut inner = self.inner.write();
        let Some(record) = inner.nodes.get_mut(&node) else {
            return;
        };
        let removed: BTreeSet<String> = names
            .iter()
            .filter(|name| record.names.remove(*name))
            .cloned()
            .collect();
        inner.unlink_names(&node, &removed);
    }

    pub fn mark_propagated(&self, node: NodeAddress) {
        let changed = {
            let mut inner = self.inner.write();
            match inner.nodes.get_mut(&node) {
                Some(record) if !record.propagated => {
                    record.propagated = true;
                    record.last_seen = Instant::now();
                    true
                }
                _ => false,
            }
        };
        if changed {
            info!(node = %node, "Propagation complete");
            self.signal();
        }
    }

    pub fn is_propagated(&self, node: &NodeAddress) -> bool {
        self.inner
            .read()
            .nodes
            .get(node)
            .map(|r| r.propagated)
            .unwrap_or(false)
    }

    /// Remove every trace of `node`: record, hosted names, aliases and the
    /// platform-id cache entry
    pub fn purge(&self, node: &NodeAddress) -> Option<NodeRecord> {
        let removed = {
            let mut inner = self.inner.write();
            let record = inner.nodes.remove(node)?;
            inner.unlink_names(node, &record.names);
            inner.aliases.retain(|_, n| n != node);
            inner.platforms.retain(|_, n| n != node);
            record
        };
        debug!(node = %node, names = removed.names.len(), "Remote node purged");
        self.signal();
        Some(removed)
    }

    /// Node currently hosting `platform_id`
    pub fn node_of_platform(&self, platform_id: &PlatformId) -> Option<NodeAddress> {
        self.inner.read().platforms.get(platform_id).copied()
    }

    /// Nodes hosting `name`, in propagation order
    pub fn nodes_for(&self, name: &str) -> Vec<NodeAddress> {
        self.inner
            .read()
            .entities
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Distinct remote entity names, sorted
    pub fn remote_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().entities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Nodes whose handshake completed
    pub fn connected_nodes(&self) -> Vec<NodeAddress> {
        let mut nodes: Vec<NodeAddress> = self
            .inner
            .read()
            .nodes
            .values()
            .filter(|r| r.propagated)
            .map(|r| r.node)
            .collect();
        nodes.sort();
        nodes
    }

    pub fn connected_count(&self) -> usize {
        self.inner.read().nodes.values().filter(|r| r.propagated).count()
    }

    pub fn knows_node(&self, node: &NodeAddress) -> bool {
        self.inner.read().nodes.contains_key(node)
    }

    pub fn knows_platform(&self, platform_id: &PlatformId) -> bool {
        self.inner.read().platforms.contains_key(platform_id)
    }

    /// Bind `alias` to a known node; `false` if the node is unknown
    pub fn set_alias(&self, alias: &str, node: NodeAddress) -> bool {
        let mut inner = self.inner.write();
        let Some(record) = inner.nodes.get_mut(&node) else {
            return false;
        };
        record.alias = Some(alias.to_string());
        inner.aliases.insert(alias.to_string(), node);
        true
    }

    pub fn remove_alias(&self, alias: &str) -> Option<NodeAddress> {
        let mut inner = self.inner.write();
        let node = inner.aliases.remove(alias)?;
        if let Some(record) = inner.nodes.get_mut(&node) {
            if record.alias.as_deref() == Some(alias) {
                record.alias = None;
            }
        }
        Some(node)
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<NodeAddress> {
        self.inner.read().aliases.get(alias).copied()
    }

    /// Refresh the liveness timestamp of `node`
    pub fn touch(&self, node: &NodeAddress) {
        if let Some(record) = self.inner.write().nodes.get_mut(node) {
            record.last_seen = Instant::now();
        }
    }

    /// Connected nodes silent for longer than `timeout`
    pub fn stale_nodes(&self, timeout: Duration) -> Vec<NodeAddress> {
        self.inner
            .read()
            .nodes
            .values()
            .filter(|r| r.propagated && r.last_seen.elapsed() > timeout)
            .map(|r| r.node)
            .collect()
    }

    /// Block until `node` completes its handshake, disappears, or `timeout`
    /// elapses
    pub fn wait_for_propagation(&self, node: &NodeAddress, timeout: Duration) -> HandshakeOutcome {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        loop {
            match self.propagation_state(node) {
                Some(true) => return HandshakeOutcome::Propagated,
                None => return HandshakeOutcome::Gone,
                Some(false) => {}
            }
            if self.changed.wait_until(&mut generation, deadline).timed_out() {
                return match self.propagation_state(node) {
                    Some(true) => HandshakeOutcome::Propagated,
                    None => HandshakeOutcome::Gone,
                    Some(false) => HandshakeOutcome::TimedOut,
                };
            }
        }
    }

    fn propagation_state(&self, node: &NodeAddress) -> Option<bool> {
        self.inner.read().nodes.get(node).map(|r| r.propagated)
    }

    /// Inspection view of every known node
    pub fn snapshot(&self) -> Vec<NodeSummary> {
        let mut nodes: Vec<NodeSummary> = self
            .inner
            .read()
            .nodes
            .values()
            .map(|r| NodeSummary {
                node: r.node,
                platform_id: r.platform_id,
                alias: r.alias.clone(),
                propagated: r.propagated,
                entity_count: r.names.len(),
            })
            .collect();
        nodes.sort_by_key(|s| s.node);
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn node(port: u16) -> NodeAddress {
        NodeAddress::new("127.0.0.1".parse().unwrap(), port)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_snapshot_then_incremental_changes() {
        let dir = RemoteDirectory::new();
        let a = node(5001);
        assert!(dir.upsert_pending(a));
        assert!(!dir.upsert_pending(a));

        dir.replace_names(a, &names(&["alice", "bob"]));
        dir.add_names(a, &names(&["carol"]));
        dir.remove_names(a, &names(&["bob"]));

        assert_eq!(dir.remote_names(), names(&["alice", "carol"]));
        assert_eq!(dir.nodes_for("alice"), vec![a]);
        assert!(dir.nodes_for("bob").is_empty());
    }

    #[test]
    fn test_purge_clears_names_aliases_and_platform_cache() {
        let dir = RemoteDirectory::new();
        let a = node(5002);
        let pid = PlatformId::generate();
        dir.record_platform(a, pid);
        dir.replace_names(a, &names(&["alice"]));
        assert!(dir.set_alias("lab", a));

        dir.purge(&a);

        assert!(!dir.knows_node(&a));
        assert!(!dir.knows_platform(&pid));
        assert_eq!(dir.resolve_alias("lab"), None);
        assert!(dir.remote_names().is_empty());
    }

    #[test]
    fn test_restart_discards_previous_incarnation() {
        let dir = RemoteDirectory::new();
        let a = node(5003);
        let first = PlatformId::generate();
        dir.record_platform(a, first);
        dir.replace_names(a, &names(&["alice"]));
        dir.mark_propagated(a);

        let second = PlatformId::generate();
        assert!(dir.record_platform(a, second));
        assert!(!dir.is_propagated(&a));
        assert!(!dir.knows_platform(&first));
        assert!(dir.knows_platform(&second));
        assert!(dir.nodes_for("alice").is_empty());
    }

    #[test]
    fn test_alias_requires_known_node() {
        let dir = RemoteDirectory::new();
        assert!(!dir.set_alias("lab", node(5004)));
    }

    #[test]
    fn test_wait_wakes_on_propagation() {
        let dir = Arc::new(RemoteDirectory::new());
        let a = node(5005);
        dir.upsert_pending(a);

        let writer = {
            let dir = dir.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                dir.mark_propagated(a);
            })
        };

        let outcome = dir.wait_for_propagation(&a, Duration::from_secs(5));
        writer.join().unwrap();
        assert_eq!(outcome, HandshakeOutcome::Propagated);
        assert_eq!(dir.connected_count(), 1);
    }

    #[test]
    fn test_wait_reports_purge_and_timeout() {
        let dir = Arc::new(RemoteDirectory::new());
        let a = node(5006);
        assert_eq!(
            dir.wait_for_propagation(&a, Duration::from_millis(10)),
            HandshakeOutcome::Gone
        );

        dir.upsert_pending(a);
        let started = Instant::now();
        assert_eq!(
            dir.wait_for_propagation(&a, Duration::from_millis(100)),
            HandshakeOutcome::TimedOut
        );
        assert!(started.elapsed() >= Duration::from_millis(100));

        let purger = {
            let dir = dir.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                dir.purge(&a);
            })
        };
        assert_eq!(
            dir.wait_for_propagation(&a, Duration::from_secs(5)),
            HandshakeOutcome::Gone
        );
        purger.join().unwrap();
    }

    #[test]
    fn test_stale_nodes_only_counts_connected_peers() {
        let dir = RemoteDirectory::new();
        let a = node(5007);
        let b = node(5008);
        dir.upsert_pending(a);
        dir.upsert_pending(b);
        dir.mark_propagated(a);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(dir.stale_nodes(Duration::from_millis(5)), vec![a]);
        dir.touch(&a);
        assert!(dir.stale_nodes(Duration::from_secs(5)).is_empty());
    }
}
