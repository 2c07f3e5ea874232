//! vipha - HA cluster state coordinator
//!
//! Tracks the failover role (MASTER, BACKUP, FAULT, NOT_DEFINED) and bound
//! VIP of every HA instance on a load-balancer node, fans accepted changes
//! out to the routing peer and the datapath, and keeps the cluster node
//! registry. Optionally runs a self-managed liveness session against one
//! peer and feeds its verdicts back as state updates.

pub mod api;
pub mod cluster;
pub mod config;
pub mod datapath;
pub mod liveness;
pub mod metrics;
pub mod process;
pub mod routing;

pub use api::{ApiContext, ApiServer};
pub use cluster::{Collaborators, HaCoordinator, HaError, HaState, KeepaliveArgs, Role};
pub use config::Config;
pub use datapath::{Datapath, DatapathQueue, DatapathWorker};
pub use liveness::{GossipLiveness, HttpApiProbe, LivenessEngine, LivenessLauncher};
pub use metrics::Metrics;
pub use process::{CommandProcessControl, ProcessControl};
pub use routing::{LogRoutingPeer, RoutingPeer};
