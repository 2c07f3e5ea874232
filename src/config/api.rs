//! API surface configuration

use serde::Deserialize;
use std::net::SocketAddr;

/// Local API surface configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// HTTP bind address
    pub bind: SocketAddr,
    /// Whether `/metrics` is served
    pub metrics: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:11111".parse().unwrap(),
            metrics: true,
        }
    }
}
