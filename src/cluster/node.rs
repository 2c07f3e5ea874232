//! Cluster node registry
//!
//! Peer nodes keyed by the canonical string form of their address. Each
//! add or delete hands exactly one work item to the datapath; the node keeps
//! the completion receiver and folds the result into its status when polled.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::Serialize;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::debug;

use crate::datapath::{Datapath, DatapathError, DpStatus, DpWorkKind, PeerWork};

use super::error::{HaError, Result};

/// Snapshot of a cluster node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterNodeInfo {
    pub addr: IpAddr,
    pub status: DpStatus,
}

/// A registered peer node
#[derive(Debug)]
pub struct ClusterNode {
    addr: IpAddr,
    status: DpStatus,
    completion: Option<oneshot::Receiver<DpStatus>>,
}

impl ClusterNode {
    fn new(addr: IpAddr) -> Self {
        Self {
            addr,
            status: DpStatus::Pending,
            completion: None,
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Current datapath status, including any completion received so far
    pub fn status(&mut self) -> DpStatus {
        self.poll_completion();
        self.status
    }

    fn poll_completion(&mut self) {
        let Some(rx) = self.completion.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(status) => {
                self.status = status;
                self.completion = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => {
                self.status = DpStatus::Dropped;
                self.completion = None;
            }
        }
    }

    /// Hand one work item for this node to the datapath without waiting
    fn submit(
        &mut self,
        kind: DpWorkKind,
        datapath: &dyn Datapath,
    ) -> std::result::Result<(), DatapathError> {
        let (work, rx) = PeerWork::new(kind, self.addr);
        datapath.submit_peer_work(work)?;
        debug!(
            "Submitted datapath {} for cluster node {}",
            kind.as_str(),
            self.addr
        );
        self.status = DpStatus::Pending;
        self.completion = Some(rx);
        Ok(())
    }
}

/// Membership set of peer nodes
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, ClusterNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and submit its create work item
    pub fn add(&mut self, addr: IpAddr, datapath: &dyn Datapath) -> Result<()> {
        let addr = addr.to_canonical();
        let key = addr.to_string();
        if self.nodes.contains_key(&key) {
            return Err(HaError::Conflict(format!("cluster node {}", key)));
        }

        let mut node = ClusterNode::new(addr);
        node.submit(DpWorkKind::Create, datapath)?;
        self.nodes.insert(key, node);
        Ok(())
    }

    /// Unregister a node and submit its remove work item
    pub fn delete(&mut self, addr: IpAddr, datapath: &dyn Datapath) -> Result<()> {
        let key = addr.to_canonical().to_string();
        let Some(mut node) = self.nodes.remove(&key) else {
            return Err(HaError::NotFound(format!("cluster node {}", key)));
        };

        if let Err(e) = node.submit(DpWorkKind::Remove, datapath) {
            self.nodes.insert(key, node);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.nodes.contains_key(&addr.to_canonical().to_string())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Datapath status of one node
    pub fn status(&mut self, addr: IpAddr) -> Option<DpStatus> {
        self.nodes
            .get_mut(&addr.to_canonical().to_string())
            .map(|node| node.status())
    }

    /// Snapshot of every node, ordered by address
    pub fn snapshot(&mut self) -> Vec<ClusterNodeInfo> {
        let mut nodes: Vec<ClusterNodeInfo> = self
            .nodes
            .values_mut()
            .map(|node| ClusterNodeInfo {
                addr: node.addr(),
                status: node.status(),
            })
            .collect();
        nodes.sort_by_key(|n| n.addr);
        nodes
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::cluster::HaState;

    /// Keeps submitted work so tests can complete it by hand
    #[derive(Default)]
    struct HeldDatapath {
        held: Mutex<Vec<PeerWork>>,
        reject: Option<DatapathError>,
    }

    #[async_trait]
    impl Datapath for HeldDatapath {
        fn submit_peer_work(&self, work: PeerWork) -> std::result::Result<(), DatapathError> {
            if let Some(e) = &self.reject {
                return Err(e.clone());
            }
            self.held.lock().push(work);
            Ok(())
        }

        fn resync_vip_rules(&self, _states: Vec<HaState>) {}

        async fn wait_sync_ready(&self) {}
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_add_then_complete() {
        let dp = HeldDatapath::default();
        let mut registry = NodeRegistry::new();

        registry.add(addr("192.168.1.5"), &dp).unwrap();
        assert_eq!(registry.status(addr("192.168.1.5")), Some(DpStatus::Pending));

        let work = dp.held.lock().pop().unwrap();
        assert_eq!(work.kind, DpWorkKind::Create);
        assert_eq!(work.peer, addr("192.168.1.5"));
        work.complete(DpStatus::Synced);

        assert_eq!(registry.status(addr("192.168.1.5")), Some(DpStatus::Synced));
    }

    #[test]
    fn test_dropped_work_is_reported() {
        let dp = HeldDatapath::default();
        let mut registry = NodeRegistry::new();

        registry.add(addr("10.0.0.9"), &dp).unwrap();
        dp.held.lock().clear();
        assert_eq!(registry.status(addr("10.0.0.9")), Some(DpStatus::Dropped));
    }

    #[test]
    fn test_duplicate_add_conflicts() {
        let dp = HeldDatapath::default();
        let mut registry = NodeRegistry::new();

        registry.add(addr("10.0.0.9"), &dp).unwrap();
        let err = registry.add(addr("10.0.0.9"), &dp).unwrap_err();
        assert!(matches!(err, HaError::Conflict(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(dp.held.lock().len(), 1);
    }

    #[test]
    fn test_ipv6_keyed_canonically() {
        let dp = HeldDatapath::default();
        let mut registry = NodeRegistry::new();

        registry.add(addr("fd00:0:0::1"), &dp).unwrap();
        let err = registry.add(addr("fd00::1"), &dp).unwrap_err();
        assert!(matches!(err, HaError::Conflict(_)));
    }

    #[test]
    fn test_mapped_ipv4_is_same_node() {
        let dp = HeldDatapath::default();
        let mut registry = NodeRegistry::new();

        registry.add(addr("::ffff:192.168.1.5"), &dp).unwrap();
        let err = registry.add(addr("192.168.1.5"), &dp).unwrap_err();
        assert!(matches!(err, HaError::Conflict(_)));
        assert_eq!(registry.len(), 1);
        assert_eq!(dp.held.lock().len(), 1);
        assert_eq!(registry.snapshot()[0].addr, addr("192.168.1.5"));
        assert_eq!(registry.status(addr("::ffff:192.168.1.5")), Some(DpStatus::Pending));

        registry.delete(addr("192.168.1.5"), &dp).unwrap();
        assert!(registry.is_empty());
        assert!(!registry.contains(addr("::ffff:192.168.1.5")));
    }

    #[test]
    fn test_rejected_add_leaves_registry_unchanged() {
        let dp = HeldDatapath {
            reject: Some(DatapathError::QueueFull),
            ..Default::default()
        };
        let mut registry = NodeRegistry::new();

        let err = registry.add(addr("10.0.0.9"), &dp).unwrap_err();
        assert_eq!(err, HaError::Datapath(DatapathError::QueueFull));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejected_delete_keeps_node() {
        let mut registry = NodeRegistry::new();
        registry
            .add(addr("10.0.0.9"), &HeldDatapath::default())
            .unwrap();

        let closed = HeldDatapath {
            reject: Some(DatapathError::Closed),
            ..Default::default()
        };
        let err = registry.delete(addr("10.0.0.9"), &closed).unwrap_err();
        assert_eq!(err, HaError::Datapath(DatapathError::Closed));
        assert!(registry.contains(addr("10.0.0.9")));
    }

    #[test]
    fn test_snapshot_sorted() {
        let dp = HeldDatapath::default();
        let mut registry = NodeRegistry::new();
        registry.add(addr("10.0.0.3"), &dp).unwrap();
        registry.add(addr("10.0.0.1"), &dp).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].addr, addr("10.0.0.1"));
        assert_eq!(snapshot[1].addr, addr("10.0.0.3"));
    }
}
