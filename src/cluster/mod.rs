//! Cluster Module
//!
//! Authoritative HA state for this node.
//!
//! # Architecture
//!
//! - **Label table**: fixed mapping from role labels to roles
//! - **Instance table**: role, label and VIP per HA instance
//! - **Node registry**: peer nodes and their datapath sync status
//! - **Coordinator**: serializes every mutation behind one lock and fans
//!   accepted transitions out to the routing peer and the datapath
//!
//! Administrative commands and the liveness session callback both enter
//! through [`HaCoordinator::update_state`].

mod coordinator;
mod error;
mod instance;
mod node;

pub use coordinator::{Collaborators, HaCoordinator, HaState, KeepaliveArgs};
pub use error::{HaError, Result};
pub use instance::{
    ClusterInstance, Role, StateLabelTable, DEFAULT_INSTANCE, STATE_BACKUP, STATE_FAULT,
    STATE_MASTER, STATE_NOT_DEFINED, STATE_STOP, VIP_UNSPECIFIED,
};
pub use node::{ClusterNode, ClusterNodeInfo, NodeRegistry};
