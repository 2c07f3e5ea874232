//! Gossip-based liveness engine
//!
//! Runs one chitchat node bound to the session's source address and seeded
//! with the remote. The remote counts as down once it has been missing from
//! the live set for `multiplier` consecutive transmit intervals.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chitchat::transport::UdpTransport;
use chitchat::{spawn_chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::cluster::{STATE_BACKUP, STATE_MASTER};

use super::{LivenessEngine, LivenessError, LivenessNotify, SessionArgs};

/// Role label this node should take given the peer's liveness.
///
/// With the peer down this node takes over. With both up, the lower source
/// address is master.
pub fn elect_state(source: IpAddr, remote: IpAddr, peer_up: bool) -> &'static str {
    if !peer_up || source < remote {
        STATE_MASTER
    } else {
        STATE_BACKUP
    }
}

/// Tracks consecutive misses of the remote in the live set
#[derive(Debug)]
struct PeerTracker {
    multiplier: u32,
    misses: u32,
    peer_up: Option<bool>,
}

impl PeerTracker {
    fn new(multiplier: u32) -> Self {
        Self {
            multiplier: multiplier.max(1),
            misses: 0,
            peer_up: None,
        }
    }

    /// Feed one observation; returns the peer's current state once known
    fn observe(&mut self, seen: bool) -> Option<bool> {
        if seen {
            self.misses = 0;
            self.peer_up = Some(true);
        } else {
            self.misses = self.misses.saturating_add(1);
            if self.misses >= self.multiplier {
                self.peer_up = Some(false);
            }
        }
        self.peer_up
    }
}

/// Liveness engine backed by chitchat's failure detector
#[derive(Default)]
pub struct GossipLiveness {
    handles: Mutex<Vec<ChitchatHandle>>,
}

impl GossipLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.handles.lock().len()
    }

    async fn watch_peer(
        chitchat: Arc<tokio::sync::Mutex<chitchat::Chitchat>>,
        args: SessionArgs,
        notify: Arc<dyn LivenessNotify>,
    ) {
        let interval = Duration::from_micros(args.interval_us as u64);
        let remote = args.remote_ip.to_string();
        let mut tracker = PeerTracker::new(args.multiplier);
        let mut reported: Option<&'static str> = None;

        loop {
            tokio::time::sleep(interval).await;

            let seen = {
                let cc = chitchat.lock().await;
                let seen = cc
                    .live_nodes()
                    .any(|id| id.gossip_advertise_addr.ip() == args.remote_ip);
                seen
            };

            let Some(peer_up) = tracker.observe(seen) else {
                continue;
            };

            let state = elect_state(args.source_ip, args.remote_ip, peer_up);
            if reported != Some(state) {
                debug!(
                    "Liveness: peer {} {} -> {}",
                    remote,
                    if peer_up { "up" } else { "down" },
                    state
                );
                notify.on_state_change(&args.instance, &remote, state);
                reported = Some(state);
            }
        }
    }
}

#[async_trait]
impl LivenessEngine for GossipLiveness {
    async fn add_remote(
        &self,
        args: SessionArgs,
        notify: Arc<dyn LivenessNotify>,
    ) -> Result<(), LivenessError> {
        if args.remote_ip == args.source_ip {
            return Err(LivenessError::InvalidArgs(
                "remote and source address must differ".to_string(),
            ));
        }

        let listen_addr = SocketAddr::new(args.source_ip, args.port);
        let seed = SocketAddr::new(args.remote_ip, args.port);
        let interval = Duration::from_micros(args.interval_us as u64);

        let chitchat_id = ChitchatId::new(args.source_ip.to_string(), 0, listen_addr);
        let failure_detector_config = FailureDetectorConfig {
            phi_threshold: 8.0,
            initial_interval: interval,
            ..Default::default()
        };
        let chitchat_config = ChitchatConfig {
            chitchat_id,
            cluster_id: format!("vipha-{}", args.instance),
            gossip_interval: interval,
            listen_addr,
            seed_nodes: vec![seed.to_string()],
            failure_detector_config,
            marked_for_deletion_grace_period: interval * args.multiplier.max(1) * 10,
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let handle = spawn_chitchat(chitchat_config, Vec::new(), &UdpTransport)
            .await
            .map_err(|e| LivenessError::Session(e.to_string()))?;

        info!(
            "Liveness session {} -> {} on port {} ({}us x{})",
            args.source_ip, args.remote_ip, args.port, args.interval_us, args.multiplier
        );

        tokio::spawn(Self::watch_peer(handle.chitchat(), args, notify));
        self.handles.lock().push(handle);
        Ok(())
    }
}
