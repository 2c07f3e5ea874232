//! Prometheus metrics for vipha
//!
//! Exposed at `/metrics` on the local API surface.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// All vipha metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // HA state metrics
    pub state_transitions_total: IntCounterVec,
    pub state_updates_rejected_total: IntCounter,
    pub liveness_events_total: IntCounter,

    // Cluster node metrics
    pub cluster_nodes_current: IntGauge,

    // Datapath metrics
    pub datapath_work_total: IntCounterVec,
    pub vip_resyncs_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let state_transitions_total = IntCounterVec::new(
            Opts::new(
                "vipha_state_transitions_total",
                "Accepted HA state transitions by new state",
            ),
            &["state"],
        )
        .unwrap();

        let state_updates_rejected_total = IntCounter::with_opts(Opts::new(
            "vipha_state_updates_rejected_total",
            "HA state updates rejected for an unknown state label",
        ))
        .unwrap();

        let liveness_events_total = IntCounter::with_opts(Opts::new(
            "vipha_liveness_events_total",
            "State changes reported by the liveness session",
        ))
        .unwrap();

        let cluster_nodes_current = IntGauge::with_opts(Opts::new(
            "vipha_cluster_nodes_current",
            "Current number of registered cluster nodes",
        ))
        .unwrap();

        let datapath_work_total = IntCounterVec::new(
            Opts::new(
                "vipha_datapath_work_total",
                "Peer work items handed to the datapath by kind",
            ),
            &["kind"],
        )
        .unwrap();

        let vip_resyncs_total = IntCounter::with_opts(Opts::new(
            "vipha_vip_resyncs_total",
            "VIP rule resynchronizations requested",
        ))
        .unwrap();

        registry
            .register(Box::new(state_transitions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(state_updates_rejected_total.clone()))
            .unwrap();
        registry
            .register(Box::new(liveness_events_total.clone()))
            .unwrap();
        registry
            .register(Box::new(cluster_nodes_current.clone()))
            .unwrap();
        registry
            .register(Box::new(datapath_work_total.clone()))
            .unwrap();
        registry
            .register(Box::new(vip_resyncs_total.clone()))
            .unwrap();

        Metrics {
            registry,
            state_transitions_total,
            state_updates_rejected_total,
            liveness_events_total,
            cluster_nodes_current,
            datapath_work_total,
            vip_resyncs_total,
        }
    }

    pub fn state_transition(&self, state: &str) {
        self.state_transitions_total
            .with_label_values(&[state])
            .inc();
    }

    pub fn state_update_rejected(&self) {
        self.state_updates_rejected_total.inc();
    }

    pub fn liveness_event(&self) {
        self.liveness_events_total.inc();
    }

    pub fn set_cluster_nodes(&self, count: usize) {
        self.cluster_nodes_current.set(count as i64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
