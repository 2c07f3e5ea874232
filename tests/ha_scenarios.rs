//! End-to-end tests for the HA coordinator
//!
//! These drive the public API the way the daemon wires it: coordinator,
//! datapath queue and worker, local API server and liveness launcher.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::time::timeout;

use vipha::api::{ApiContext, ApiServer};
use vipha::cluster::{Collaborators, HaCoordinator, HaError, HaState, KeepaliveArgs, Role};
use vipha::datapath::{Datapath, DatapathError, DatapathQueue, DpStatus, DpWorkKind, PeerWork};
use vipha::liveness::{
    HttpApiProbe, LaunchSettings, LivenessEngine, LivenessError, LivenessLauncher,
    LivenessNotify, SessionArgs,
};
use vipha::metrics::Metrics;
use vipha::process::ProcessControl;
use vipha::routing::RoutingPeer;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Records every collaborator call
#[derive(Default)]
struct Recorder {
    routing: Mutex<Vec<(String, Role, IpAddr)>>,
    work: Mutex<Vec<(DpWorkKind, IpAddr)>>,
    resyncs: Mutex<Vec<Vec<HaState>>>,
    terminations: Mutex<usize>,
}

impl Recorder {
    fn clear(&self) {
        self.routing.lock().clear();
        self.work.lock().clear();
        self.resyncs.lock().clear();
        *self.terminations.lock() = 0;
    }
}

impl RoutingPeer for Recorder {
    fn update_ha_state(&self, instance: &str, role: Role, vip: IpAddr) {
        self.routing.lock().push((instance.to_string(), role, vip));
    }
}

#[async_trait]
impl Datapath for Recorder {
    fn submit_peer_work(&self, work: PeerWork) -> Result<(), DatapathError> {
        self.work.lock().push((work.kind, work.peer));
        Ok(())
    }

    fn resync_vip_rules(&self, states: Vec<HaState>) {
        self.resyncs.lock().push(states);
    }

    async fn wait_sync_ready(&self) {}
}

impl ProcessControl for Recorder {
    fn terminate_liveness_process(&self) {
        *self.terminations.lock() += 1;
    }
}

fn keepalive_args(spawn_keepalive: bool) -> KeepaliveArgs {
    KeepaliveArgs {
        spawn_keepalive,
        remote_ip: ip("10.10.10.2"),
        source_ip: ip("10.10.10.1"),
        interval_us: 0,
    }
}

fn recorded_coordinator(spawn_keepalive: bool) -> (HaCoordinator, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let coordinator = HaCoordinator::new(
        keepalive_args(spawn_keepalive),
        Collaborators {
            routing: recorder.clone(),
            datapath: recorder.clone(),
            process: recorder.clone(),
        },
    );
    (coordinator, recorder)
}

#[test]
fn test_master_then_bogus_label() {
    let (coordinator, _recorder) = recorded_coordinator(false);

    let role = coordinator
        .update_state(HaState::new("default", "MASTER", ip("10.0.0.1")))
        .unwrap();
    assert_eq!(role, Role::Master);
    assert_eq!(role.code(), 1);
    assert_eq!(coordinator.instance_state("default").unwrap(), "MASTER");
    assert_eq!(coordinator.vip("default").unwrap(), ip("10.0.0.1"));

    let err = coordinator
        .update_state(HaState::new("default", "BOGUS", ip("10.0.0.1")))
        .unwrap_err();
    assert!(matches!(err, HaError::InvalidState { .. }));
    assert_eq!(coordinator.instance_state("default").unwrap(), "MASTER");
}

#[test]
fn test_master_to_fault_fanout() {
    for spawn_keepalive in [false, true] {
        let (coordinator, recorder) = recorded_coordinator(spawn_keepalive);
        coordinator
            .update_state(HaState::new("default", "MASTER", ip("10.0.0.1")))
            .unwrap();
        recorder.clear();

        let role = coordinator
            .update_state(HaState::new("default", "FAULT", ip("0.0.0.0")))
            .unwrap();
        assert_eq!(role.code(), 3);

        assert_eq!(
            *recorder.routing.lock(),
            vec![("default".to_string(), Role::Fault, ip("0.0.0.0"))]
        );
        assert_eq!(recorder.resyncs.lock().len(), 1);
        let expected = if spawn_keepalive { 1 } else { 0 };
        assert_eq!(*recorder.terminations.lock(), expected);
    }
}

#[test]
fn test_cluster_node_lifecycle() {
    let (coordinator, recorder) = recorded_coordinator(false);
    let node = ip("192.168.1.5");

    coordinator.cluster_node_add(node).unwrap();
    assert_eq!(*recorder.work.lock(), vec![(DpWorkKind::Create, node)]);

    coordinator.cluster_node_delete(node).unwrap();
    assert_eq!(
        *recorder.work.lock(),
        vec![(DpWorkKind::Create, node), (DpWorkKind::Remove, node)]
    );

    let err = coordinator.cluster_node_delete(node).unwrap_err();
    assert!(matches!(err, HaError::NotFound(_)));
    assert_eq!(recorder.work.lock().len(), 2);
}

#[derive(Default)]
struct NullPeer;

impl RoutingPeer for NullPeer {
    fn update_ha_state(&self, _instance: &str, _role: Role, _vip: IpAddr) {}
}

impl ProcessControl for NullPeer {
    fn terminate_liveness_process(&self) {}
}

#[tokio::test]
async fn test_node_synced_through_worker() {
    let (queue, worker) = DatapathQueue::new(8);
    let queue = Arc::new(queue);
    tokio::spawn(worker.run());

    let coordinator = HaCoordinator::new(
        KeepaliveArgs::default(),
        Collaborators {
            routing: Arc::new(NullPeer),
            datapath: queue.clone(),
            process: Arc::new(NullPeer),
        },
    );

    let node = ip("192.168.1.5");
    coordinator.cluster_node_add(node).unwrap();

    let synced = timeout(Duration::from_secs(2), async {
        loop {
            if coordinator.node_status(node).unwrap() == DpStatus::Synced {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(synced.is_ok(), "node never reported synced");
    assert!(queue.is_sync_ready());
}

/// Engine that reports the peer up as soon as the session is added
#[derive(Default)]
struct InstantEngine {
    sessions: Mutex<Vec<SessionArgs>>,
}

#[async_trait]
impl LivenessEngine for InstantEngine {
    async fn add_remote(
        &self,
        args: SessionArgs,
        notify: Arc<dyn LivenessNotify>,
    ) -> Result<(), LivenessError> {
        notify.on_state_change(&args.instance, &args.remote_ip.to_string(), "MASTER");
        self.sessions.lock().push(args);
        Ok(())
    }
}

#[tokio::test]
async fn test_self_managed_liveness_startup() {
    let (queue, worker) = DatapathQueue::new(8);
    let queue = Arc::new(queue);
    tokio::spawn(worker.run());

    let metrics = Arc::new(Metrics::new());
    let coordinator = Arc::new(
        HaCoordinator::new(
            keepalive_args(true),
            Collaborators {
                routing: Arc::new(NullPeer),
                datapath: queue.clone(),
                process: Arc::new(NullPeer),
            },
        )
        .with_metrics(metrics.clone()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = ApiServer::new(
        ApiContext {
            coordinator: coordinator.clone(),
            metrics: Some(metrics.clone()),
        },
        addr,
    );
    tokio::spawn(server.serve(listener));

    let engine = Arc::new(InstantEngine::default());
    let launcher = LivenessLauncher::new(
        Arc::new(HttpApiProbe::new(addr)),
        queue,
        engine.clone(),
        LaunchSettings {
            probe_interval: Duration::from_millis(10),
            cool_off: Duration::from_millis(10),
            ..LaunchSettings::default()
        },
    );

    let handle = coordinator.spawn_liveness(launcher).unwrap();
    let result = timeout(Duration::from_secs(5), handle).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));

    let sessions = engine.sessions.lock().clone();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].remote_ip, ip("10.10.10.2"));
    assert_eq!(sessions[0].source_ip, ip("10.10.10.1"));
    assert_eq!(sessions[0].interval_us, 200_000);
    assert_eq!(sessions[0].port, 3784);

    assert_eq!(coordinator.instance_state("default").unwrap(), "MASTER");
    assert_eq!(coordinator.vip("default").unwrap(), ip("0.0.0.0"));
    assert_eq!(metrics.liveness_events_total.get(), 1);
}

#[tokio::test]
async fn test_liveness_disabled_spawns_nothing() {
    let (coordinator, recorder) = recorded_coordinator(false);
    let launcher = LivenessLauncher::new(
        Arc::new(HttpApiProbe::new("127.0.0.1:9".parse().unwrap())),
        recorder,
        Arc::new(InstantEngine::default()),
        LaunchSettings::default(),
    );
    assert!(Arc::new(coordinator).spawn_liveness(launcher).is_none());
}
