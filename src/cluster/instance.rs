//! HA roles, the state label table and per-instance state.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Name of the instance that always exists
pub const DEFAULT_INSTANCE: &str = "default";

/// Role labels accepted by the coordinator
pub const STATE_MASTER: &str = "MASTER";
pub const STATE_BACKUP: &str = "BACKUP";
pub const STATE_FAULT: &str = "FAULT";
pub const STATE_STOP: &str = "STOP";
pub const STATE_NOT_DEFINED: &str = "NOT_DEFINED";

/// Sentinel meaning "no VIP bound"
pub const VIP_UNSPECIFIED: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// HA standing of an instance on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Master,
    Backup,
    Fault,
    NotDefined,
}

impl Role {
    /// Numeric role code handed to downstream consumers
    pub fn code(self) -> i32 {
        match self {
            Role::Master => 1,
            Role::Backup => 2,
            Role::Fault => 3,
            Role::NotDefined => 4,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Master => "master",
            Role::Backup => "backup",
            Role::Fault => "fault",
            Role::NotDefined => "not-defined",
        };
        write!(f, "{}({})", s, self.code())
    }
}

/// Fixed mapping from role labels to roles.
///
/// Built once when the coordinator is created and never mutated afterwards.
/// `STOP` and `NOT_DEFINED` deliberately share a role.
#[derive(Debug, Clone)]
pub struct StateLabelTable {
    labels: HashMap<&'static str, Role>,
}

impl StateLabelTable {
    pub fn new() -> Self {
        let labels = HashMap::from([
            (STATE_MASTER, Role::Master),
            (STATE_BACKUP, Role::Backup),
            (STATE_FAULT, Role::Fault),
            (STATE_STOP, Role::NotDefined),
            (STATE_NOT_DEFINED, Role::NotDefined),
        ]);
        Self { labels }
    }

    /// Look up the role for a label
    pub fn role(&self, label: &str) -> Option<Role> {
        self.labels.get(label).copied()
    }

    /// Resolve a label to its interned form and role
    pub fn resolve(&self, label: &str) -> Option<(&'static str, Role)> {
        self.labels
            .get_key_value(label)
            .map(|(label, role)| (*label, *role))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains_key(label)
    }
}

impl Default for StateLabelTable {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one HA instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInstance {
    /// Label as stored in the label table
    label: &'static str,
    role: Role,
    vip: IpAddr,
}

impl ClusterInstance {
    /// Fresh instance: not defined, no VIP
    pub fn new() -> Self {
        Self {
            label: STATE_NOT_DEFINED,
            role: Role::NotDefined,
            vip: VIP_UNSPECIFIED,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn vip(&self) -> IpAddr {
        self.vip
    }

    /// Bound VIP, if any
    pub fn bound_vip(&self) -> Option<IpAddr> {
        if self.vip.to_canonical().is_unspecified() {
            None
        } else {
            Some(self.vip)
        }
    }

    /// Move to a new label. Label and role always come from the same
    /// table entry so they cannot diverge.
    pub(crate) fn transition(&mut self, (label, role): (&'static str, Role), vip: IpAddr) {
        self.label = label;
        self.role = role;
        self.vip = vip.to_canonical();
    }
}

impl Default for ClusterInstance {
    fn default() -> Self {
        Self::new()
    }
}
