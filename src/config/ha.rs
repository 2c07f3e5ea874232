//! HA and Liveness Configuration
//!
//! Configuration types for self-managed peer liveness monitoring.

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::cluster::{KeepaliveArgs, DEFAULT_INSTANCE, VIP_UNSPECIFIED};
use crate::liveness::{LaunchSettings, DEFAULT_MULTIPLIER, DEFAULT_PORT};

/// HA node configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HaConfig {
    /// Run and manage our own liveness session
    pub spawn_keepalive: bool,

    /// Peer node monitored by the liveness session
    pub remote_ip: Option<IpAddr>,

    /// Local address the liveness session runs from
    pub source_ip: Option<IpAddr>,

    /// Liveness transmit interval in microseconds
    /// Default: 0 (protocol default)
    pub interval: u64,

    /// Process terminated when an instance goes FAULT or STOP
    /// Default: keepalived
    #[serde(default = "default_keepalive_process")]
    pub keepalive_process: String,
}

fn default_keepalive_process() -> String {
    "keepalived".to_string()
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            spawn_keepalive: false,
            remote_ip: None,
            source_ip: None,
            interval: 0,
            keepalive_process: default_keepalive_process(),
        }
    }
}

impl HaConfig {
    /// Startup arguments for the coordinator
    pub fn keepalive_args(&self) -> KeepaliveArgs {
        KeepaliveArgs {
            spawn_keepalive: self.spawn_keepalive,
            remote_ip: self.remote_ip.unwrap_or(VIP_UNSPECIFIED),
            source_ip: self.source_ip.unwrap_or(VIP_UNSPECIFIED),
            interval_us: self.interval,
        }
    }
}

/// Liveness session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Session UDP port
    /// Default: 3784
    pub port: u16,

    /// Detection multiplier
    /// Default: 3
    pub multiplier: u32,

    /// HA instance the session reports on
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Settling time before liveness may trigger failover (e.g., "35s")
    #[serde(with = "humantime_serde")]
    pub cool_off: Duration,

    /// Delay between API readiness probes (e.g., "1s")
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,
}

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_string()
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            multiplier: DEFAULT_MULTIPLIER,
            instance: default_instance(),
            cool_off: Duration::from_secs(35),
            probe_interval: Duration::from_secs(1),
        }
    }
}

impl LivenessConfig {
    /// Launcher settings
    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            port: self.port,
            multiplier: self.multiplier,
            instance: self.instance.clone(),
            probe_interval: self.probe_interval,
            cool_off: self.cool_off,
        }
    }
}
