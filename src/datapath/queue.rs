//! Bounded in-process datapath intake
//!
//! `DatapathQueue` is the coordinator-facing side; `DatapathWorker` drains it.
//! Peer work goes through a bounded channel and is rejected when full. VIP
//! resync requests carry the whole cluster state, so only the latest one
//! matters and they are coalesced through a watch channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::cluster::HaState;
use crate::metrics::Metrics;

use super::{active_vips, Datapath, DatapathError, DpStatus, PeerWork};

/// Coordinator-facing handle to the datapath work queue
pub struct DatapathQueue {
    work_tx: mpsc::Sender<PeerWork>,
    resync_tx: watch::Sender<Vec<HaState>>,
    ready_rx: watch::Receiver<bool>,
    metrics: Option<Arc<Metrics>>,
}

/// Consumer side of the datapath queue
pub struct DatapathWorker {
    work_rx: mpsc::Receiver<PeerWork>,
    resync_rx: watch::Receiver<Vec<HaState>>,
    ready_tx: watch::Sender<bool>,
}

impl DatapathQueue {
    /// Create a queue holding at most `capacity` pending work items
    pub fn new(capacity: usize) -> (Self, DatapathWorker) {
        let (work_tx, work_rx) = mpsc::channel(capacity.max(1));
        let (resync_tx, resync_rx) = watch::channel(Vec::new());
        let (ready_tx, ready_rx) = watch::channel(false);

        let queue = Self {
            work_tx,
            resync_tx,
            ready_rx,
            metrics: None,
        };
        let worker = DatapathWorker {
            work_rx,
            resync_rx,
            ready_tx,
        };
        (queue, worker)
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether the worker has reported the sync channel up
    pub fn is_sync_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }
}

#[async_trait]
impl Datapath for DatapathQueue {
    fn submit_peer_work(&self, work: PeerWork) -> Result<(), DatapathError> {
        let kind = work.kind;
        match self.work_tx.try_send(work) {
            Ok(()) => {
                if let Some(m) = &self.metrics {
                    m.datapath_work_total
                        .with_label_values(&[kind.as_str()])
                        .inc();
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(work)) => {
                warn!("Datapath queue full, rejecting {} for {}", kind.as_str(), work.peer);
                Err(DatapathError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DatapathError::Closed),
        }
    }

    fn resync_vip_rules(&self, states: Vec<HaState>) {
        if let Some(m) = &self.metrics {
            m.vip_resyncs_total.inc();
        }
        // send_replace never fails, even with the worker gone
        self.resync_tx.send_replace(states);
    }

    async fn wait_sync_ready(&self) {
        let mut ready_rx = self.ready_rx.clone();
        if ready_rx.wait_for(|ready| *ready).await.is_err() {
            warn!("Datapath worker exited before sync became ready");
        }
    }
}

impl DatapathWorker {
    /// Drain work and resync requests until every queue handle is dropped
    pub async fn run(mut self) {
        self.ready_tx.send_replace(true);
        info!("Datapath sync channel ready");

        loop {
            tokio::select! {
                work = self.work_rx.recv() => {
                    match work {
                        Some(work) => Self::program_peer(work),
                        None => break,
                    }
                }
                changed = self.resync_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let states = self.resync_rx.borrow_and_update().clone();
                    Self::apply_vip_rules(&states);
                }
            }
        }

        self.ready_tx.send_replace(false);
        debug!("Datapath worker stopped");
    }

    fn program_peer(work: PeerWork) {
        info!("Datapath: {} cluster peer {}", work.kind.as_str(), work.peer);
        work.complete(DpStatus::Synced);
    }

    fn apply_vip_rules(states: &[HaState]) {
        let vips = active_vips(states);
        info!(
            "Datapath: VIP rules resynced ({} instances, {} active VIPs {:?})",
            states.len(),
            vips.len(),
            vips
        );
    }
}
