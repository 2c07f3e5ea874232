//! Routing Peer Interface
//!
//! The routing peer advertises or withdraws VIP routes according to the HA
//! role of each instance. The coordinator calls it once per accepted state
//! change, with its lock held, so implementations must not block.

use std::net::IpAddr;

use tracing::info;

use crate::cluster::Role;

/// Routing-advertisement collaborator
pub trait RoutingPeer: Send + Sync {
    /// An instance moved to `role`, serving `vip` (unspecified when unbound)
    fn update_ha_state(&self, instance: &str, role: Role, vip: IpAddr);
}

/// Routing peer that only records changes in the log
#[derive(Debug, Default)]
pub struct LogRoutingPeer;

impl RoutingPeer for LogRoutingPeer {
    fn update_ha_state(&self, instance: &str, role: Role, vip: IpAddr) {
        info!("Routing: instance {} role {} vip {}", instance, role, vip);
    }
}
