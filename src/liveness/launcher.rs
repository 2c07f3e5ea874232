//! Liveness session launcher

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::cluster::{HaCoordinator, DEFAULT_INSTANCE};
use crate::datapath::Datapath;

use super::{
    effective_tx_interval, ApiProbe, LivenessEngine, LivenessError, SessionArgs,
    DEFAULT_MULTIPLIER, DEFAULT_PORT,
};

/// Timing and session parameters for the launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    pub port: u16,
    pub multiplier: u32,
    pub instance: String,
    /// Delay between API readiness probes
    pub probe_interval: Duration,
    /// Settling time after the datapath is ready
    pub cool_off: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            multiplier: DEFAULT_MULTIPLIER,
            instance: DEFAULT_INSTANCE.to_string(),
            probe_interval: Duration::from_secs(1),
            cool_off: Duration::from_secs(35),
        }
    }
}

/// Starts a liveness session once the node is ready for failover decisions
pub struct LivenessLauncher {
    probe: Arc<dyn ApiProbe>,
    datapath: Arc<dyn Datapath>,
    engine: Arc<dyn LivenessEngine>,
    settings: LaunchSettings,
}

impl LivenessLauncher {
    pub fn new(
        probe: Arc<dyn ApiProbe>,
        datapath: Arc<dyn Datapath>,
        engine: Arc<dyn LivenessEngine>,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            probe,
            datapath,
            engine,
            settings,
        }
    }

    /// Wait for readiness, then start the session.
    ///
    /// Probing the API surface never gives up. An error from the engine is
    /// fatal for self-managed deployments and is returned as is.
    pub async fn run(self, coordinator: Arc<HaCoordinator>) -> Result<(), LivenessError> {
        while !self.probe.is_ready().await {
            debug!("Waiting for API server before starting liveness");
            tokio::time::sleep(self.settings.probe_interval).await;
        }

        self.datapath.wait_sync_ready().await;
        debug!(
            "Datapath ready, cooling off for {:?}",
            self.settings.cool_off
        );
        tokio::time::sleep(self.settings.cool_off).await;

        let ka = coordinator.args();
        let args = SessionArgs {
            remote_ip: ka.remote_ip,
            source_ip: ka.source_ip,
            port: self.settings.port,
            interval_us: effective_tx_interval(ka.interval_us),
            multiplier: self.settings.multiplier,
            instance: self.settings.instance.clone(),
        };

        if let Err(e) = self.engine.add_remote(args.clone(), coordinator).await {
            error!("Failed to add liveness remote {}: {}", args.remote_ip, e);
            return Err(e);
        }

        info!(
            "Added liveness remote {} from {} ({}us)",
            args.remote_ip, args.source_ip, args.interval_us
        );
        Ok(())
    }
}
