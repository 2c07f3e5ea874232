//! Datapath Interface
//!
//! Contract between the coordinator and the forwarding datapath. The
//! coordinator hands over peer work items and VIP resync requests without
//! waiting for them to be programmed; completion of a work item comes back
//! through the item's own completion channel.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::cluster::{HaState, STATE_MASTER};

mod queue;

pub use queue::{DatapathQueue, DatapathWorker};

/// Error returned when a work item cannot be handed to the datapath
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatapathError {
    /// Work queue is at capacity
    QueueFull,
    /// Datapath intake is gone
    Closed,
}

impl fmt::Display for DatapathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatapathError::QueueFull => write!(f, "datapath work queue full"),
            DatapathError::Closed => write!(f, "datapath work queue closed"),
        }
    }
}

impl std::error::Error for DatapathError {}

/// Kind of peer work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DpWorkKind {
    Create,
    Remove,
}

impl DpWorkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DpWorkKind::Create => "create",
            DpWorkKind::Remove => "remove",
        }
    }
}

/// Datapath sync status of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DpStatus {
    /// Submitted, no completion seen yet
    Pending,
    /// Programmed in the datapath
    Synced,
    /// Datapath reported failure
    Failed,
    /// Work item was dropped without completion
    Dropped,
}

/// One unit of peer work handed to the datapath
#[derive(Debug)]
pub struct PeerWork {
    pub kind: DpWorkKind,
    pub peer: IpAddr,
    done: oneshot::Sender<DpStatus>,
}

impl PeerWork {
    /// Create a work item and the receiver that will observe its completion
    pub fn new(kind: DpWorkKind, peer: IpAddr) -> (Self, oneshot::Receiver<DpStatus>) {
        let (done, rx) = oneshot::channel();
        (Self { kind, peer, done }, rx)
    }

    /// Report completion. The submitter may already be gone.
    pub fn complete(self, status: DpStatus) {
        let _ = self.done.send(status);
    }
}

/// Forwarding datapath as seen by the coordinator.
///
/// `submit_peer_work` and `resync_vip_rules` are called with the coordinator
/// lock held and must not block.
#[async_trait]
pub trait Datapath: Send + Sync {
    /// Enqueue peer work without waiting for it to be programmed
    fn submit_peer_work(&self, work: PeerWork) -> Result<(), DatapathError>;

    /// Resynchronize VIP-dependent rules against the full cluster state
    fn resync_vip_rules(&self, states: Vec<HaState>);

    /// Resolve once the datapath sync channel is up
    async fn wait_sync_ready(&self);
}

/// VIPs that should currently be served: bound VIPs of MASTER instances
pub fn active_vips(states: &[HaState]) -> Vec<IpAddr> {
    let mut vips: Vec<IpAddr> = states
        .iter()
        .filter(|s| s.state == STATE_MASTER && !s.vip.is_unspecified())
        .map(|s| s.vip)
        .collect();
    vips.sort();
    vips.dedup();
    vips
}
