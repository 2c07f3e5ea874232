//! HA Coordinator
//!
//! Owns the instance table and the node registry behind a single lock and
//! applies the role-transition policy. Every accepted transition is fanned
//! out to the routing peer and to a datapath VIP resync before the lock is
//! released, so downstream consumers see changes in mutation order.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::datapath::{Datapath, DpStatus};
use crate::liveness::{LivenessError, LivenessLauncher, LivenessNotify};
use crate::metrics::Metrics;
use crate::process::ProcessControl;
use crate::routing::RoutingPeer;

use super::error::{HaError, Result};
use super::instance::{
    ClusterInstance, Role, StateLabelTable, DEFAULT_INSTANCE, STATE_FAULT, STATE_STOP,
    VIP_UNSPECIFIED,
};
use super::node::{ClusterNodeInfo, NodeRegistry};

/// State of one instance, as reported and as requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaState {
    pub instance: String,
    pub state: String,
    pub vip: IpAddr,
}

impl HaState {
    pub fn new(instance: impl Into<String>, state: impl Into<String>, vip: IpAddr) -> Self {
        Self {
            instance: instance.into(),
            state: state.into(),
            vip,
        }
    }
}

/// Startup arguments for self-managed liveness monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveArgs {
    /// Whether this node runs its own liveness session
    pub spawn_keepalive: bool,
    pub remote_ip: IpAddr,
    pub source_ip: IpAddr,
    /// Transmit interval in microseconds (0 = protocol default)
    pub interval_us: u64,
}

impl Default for KeepaliveArgs {
    fn default() -> Self {
        Self {
            spawn_keepalive: false,
            remote_ip: VIP_UNSPECIFIED,
            source_ip: VIP_UNSPECIFIED,
            interval_us: 0,
        }
    }
}

/// Downstream consumers of coordinator state
#[derive(Clone)]
pub struct Collaborators {
    pub routing: Arc<dyn RoutingPeer>,
    pub datapath: Arc<dyn Datapath>,
    pub process: Arc<dyn ProcessControl>,
}

/// Everything guarded by the coordinator lock
#[derive(Debug)]
struct CoordinatorState {
    instances: HashMap<String, ClusterInstance>,
    nodes: NodeRegistry,
}

impl CoordinatorState {
    fn snapshot(&self) -> Vec<HaState> {
        self.instances
            .iter()
            .map(|(name, ci)| HaState::new(name.clone(), ci.label(), ci.vip()))
            .collect()
    }
}

/// Authoritative HA state for this node
pub struct HaCoordinator {
    args: KeepaliveArgs,
    labels: StateLabelTable,
    state: Mutex<CoordinatorState>,
    collaborators: Collaborators,
    metrics: Option<Arc<Metrics>>,
}

impl HaCoordinator {
    /// Build the coordinator with only the default instance present
    pub fn new(args: KeepaliveArgs, collaborators: Collaborators) -> Self {
        let default = ClusterInstance::new();
        collaborators
            .routing
            .update_ha_state(DEFAULT_INSTANCE, default.role(), default.vip());

        let mut instances = HashMap::new();
        instances.insert(DEFAULT_INSTANCE.to_string(), default);

        Self {
            args,
            labels: StateLabelTable::new(),
            state: Mutex::new(CoordinatorState {
                instances,
                nodes: NodeRegistry::new(),
            }),
            collaborators,
            metrics: None,
        }
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        metrics.set_cluster_nodes(0);
        self.metrics = Some(metrics);
        self
    }

    pub fn args(&self) -> &KeepaliveArgs {
        &self.args
    }

    /// Current state label of an instance
    pub fn instance_state(&self, instance: &str) -> Result<&'static str> {
        let st = self.state.lock();
        st.instances
            .get(instance)
            .map(|ci| ci.label())
            .ok_or_else(|| HaError::NotFound(format!("instance {}", instance)))
    }

    /// Snapshot of every instance, in no particular order
    pub fn all_states(&self) -> Vec<HaState> {
        self.state.lock().snapshot()
    }

    /// Bound VIP of an instance.
    ///
    /// Unknown instances and instances without a VIP both report `NotFound`.
    pub fn vip(&self, instance: &str) -> Result<IpAddr> {
        let st = self.state.lock();
        st.instances
            .get(instance)
            .and_then(|ci| ci.bound_vip())
            .ok_or_else(|| HaError::NotFound(format!("vip for instance {}", instance)))
    }

    /// Apply a state change to an instance.
    ///
    /// Unseen instances are created first. Repeating the current label is a
    /// no-op that returns the current role without notifying anyone. An
    /// unknown label leaves the instance untouched.
    pub fn update_state(&self, update: HaState) -> Result<Role> {
        let mut st = self.state.lock();

        let ci = st
            .instances
            .entry(update.instance.clone())
            .or_insert_with(|| {
                debug!("Created HA instance {}", update.instance);
                ClusterInstance::new()
            });

        if ci.label() == update.state {
            return Ok(ci.role());
        }

        let Some(resolved) = self.labels.resolve(&update.state) else {
            error!("Rejected invalid state {} for instance {}", update.state, update.instance);
            if let Some(m) = &self.metrics {
                m.state_update_rejected();
            }
            return Err(HaError::InvalidState {
                state: update.state,
                current: ci.role(),
            });
        };

        info!(
            "HA instance {} state {} -> {} (vip {})",
            update.instance,
            ci.label(),
            update.state,
            update.vip
        );
        ci.transition(resolved, update.vip);
        let role = ci.role();
        let vip = ci.vip();

        if let Some(m) = &self.metrics {
            m.state_transition(resolved.0);
        }

        if self.args.spawn_keepalive && (resolved.0 == STATE_FAULT || resolved.0 == STATE_STOP) {
            self.collaborators.process.terminate_liveness_process();
        }
        self.collaborators
            .routing
            .update_ha_state(&update.instance, role, vip);
        self.collaborators.datapath.resync_vip_rules(st.snapshot());

        Ok(role)
    }

    /// Register a cluster node and hand a create work item to the datapath
    pub fn cluster_node_add(&self, addr: IpAddr) -> Result<()> {
        let mut st = self.state.lock();
        st.nodes.add(addr, self.collaborators.datapath.as_ref())?;
        info!("Cluster node {} added", addr);
        if let Some(m) = &self.metrics {
            m.set_cluster_nodes(st.nodes.len());
        }
        Ok(())
    }

    /// Unregister a cluster node and hand a remove work item to the datapath
    pub fn cluster_node_delete(&self, addr: IpAddr) -> Result<()> {
        let mut st = self.state.lock();
        st.nodes.delete(addr, self.collaborators.datapath.as_ref())?;
        info!("Cluster node {} deleted", addr);
        if let Some(m) = &self.metrics {
            m.set_cluster_nodes(st.nodes.len());
        }
        Ok(())
    }

    /// Snapshot of registered cluster nodes
    pub fn cluster_nodes(&self) -> Vec<ClusterNodeInfo> {
        self.state.lock().nodes.snapshot()
    }

    /// Datapath status of one cluster node
    pub fn node_status(&self, addr: IpAddr) -> Result<DpStatus> {
        self.state
            .lock()
            .nodes
            .status(addr)
            .ok_or_else(|| HaError::NotFound(format!("cluster node {}", addr)))
    }

    /// Start self-managed liveness monitoring in the background.
    ///
    /// Returns `None` when this node does not run its own liveness session.
    pub fn spawn_liveness(
        self: &Arc<Self>,
        launcher: LivenessLauncher,
    ) -> Option<JoinHandle<std::result::Result<(), LivenessError>>> {
        if !self.args.spawn_keepalive {
            return None;
        }
        Some(tokio::spawn(launcher.run(self.clone())))
    }
}

impl LivenessNotify for HaCoordinator {
    fn on_state_change(&self, instance: &str, remote: &str, state: &str) {
        info!(
            "Liveness change instance {} remote {} state {}",
            instance, remote, state
        );
        if let Some(m) = &self.metrics {
            m.liveness_event();
        }
        let update = HaState::new(instance, state, VIP_UNSPECIFIED);
        if let Err(e) = self.update_state(update) {
            error!("Liveness update for instance {} failed: {}", instance, e);
        }
    }
}
