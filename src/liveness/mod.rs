//! Peer Liveness
//!
//! Interfaces to the peer-liveness (BFD-style) session engine and the
//! launcher that starts a session once the node is ready for failover
//! decisions.
//!
//! # Startup ordering
//!
//! 1. Poll the local API surface until it answers (no timeout)
//! 2. Wait for the datapath sync channel
//! 3. Cool off so the rest of the cluster can settle
//! 4. Start the session with the coordinator as its callback

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

mod gossip;
mod launcher;
mod probe;

pub use gossip::{elect_state, GossipLiveness};
pub use launcher::{LaunchSettings, LivenessLauncher};
pub use probe::HttpApiProbe;

/// Well-known liveness session port
pub const DEFAULT_PORT: u16 = 3784;

/// Detection multiplier used unless configured otherwise
pub const DEFAULT_MULTIPLIER: u32 = 3;

/// Transmit interval used when none (or one below the floor) is configured
pub const DEFAULT_TX_INTERVAL_US: u32 = 200_000;

/// Smallest transmit interval accepted from configuration
pub const MIN_TX_INTERVAL_US: u32 = 50_000;

/// Liveness session errors
#[derive(Debug)]
pub enum LivenessError {
    /// The session could not be created or started
    Session(String),
    /// Session arguments were rejected
    InvalidArgs(String),
}

impl fmt::Display for LivenessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessError::Session(msg) => write!(f, "liveness session error: {}", msg),
            LivenessError::InvalidArgs(msg) => write!(f, "invalid liveness arguments: {}", msg),
        }
    }
}

impl std::error::Error for LivenessError {}

/// Receives state changes detected by a liveness session
pub trait LivenessNotify: Send + Sync {
    /// `state` is the role label the session derived for this node
    fn on_state_change(&self, instance: &str, remote: &str, state: &str);
}

/// Parameters of one liveness session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionArgs {
    pub remote_ip: IpAddr,
    pub source_ip: IpAddr,
    pub port: u16,
    /// Transmit interval in microseconds
    pub interval_us: u32,
    pub multiplier: u32,
    /// HA instance the session reports on
    pub instance: String,
}

/// Peer-liveness session engine
#[async_trait]
pub trait LivenessEngine: Send + Sync {
    /// Create and start a session towards `args.remote_ip`, reporting
    /// state changes to `notify`
    async fn add_remote(
        &self,
        args: SessionArgs,
        notify: Arc<dyn LivenessNotify>,
    ) -> Result<(), LivenessError>;
}

/// Readiness of the local API surface
#[async_trait]
pub trait ApiProbe: Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// Transmit interval to use for a configured value in microseconds
pub fn effective_tx_interval(configured_us: u64) -> u32 {
    if configured_us != 0 && configured_us >= MIN_TX_INTERVAL_US as u64 {
        u32::try_from(configured_us).unwrap_or(u32::MAX)
    } else {
        DEFAULT_TX_INTERVAL_US
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_tx_interval() {
        assert_eq!(effective_tx_interval(0), DEFAULT_TX_INTERVAL_US);
        assert_eq!(effective_tx_interval(10_000), DEFAULT_TX_INTERVAL_US);
        assert_eq!(
            effective_tx_interval(MIN_TX_INTERVAL_US as u64 - 1),
            DEFAULT_TX_INTERVAL_US
        );
        assert_eq!(
            effective_tx_interval(MIN_TX_INTERVAL_US as u64),
            MIN_TX_INTERVAL_US
        );
        assert_eq!(effective_tx_interval(300_000), 300_000);
    }

    #[test]
    fn test_effective_tx_interval_saturates() {
        assert_eq!(effective_tx_interval(u64::MAX), u32::MAX);
    }
}
