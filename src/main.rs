//! vipha - HA cluster state coordinator
//!
//! Usage:
//!   vipha [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -a, --api-bind <ADDR>  Local API bind address (default: 127.0.0.1:11111)
//!   --ka                   Run a self-managed liveness session
//!   --remote <IP>          Liveness peer address
//!   --source <IP>          Liveness source address
//!   --interval <US>        Liveness transmit interval in microseconds
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vipha::api::{ApiContext, ApiServer};
use vipha::cluster::{Collaborators, HaCoordinator};
use vipha::config::Config;
use vipha::datapath::DatapathQueue;
use vipha::liveness::{GossipLiveness, HttpApiProbe, LivenessLauncher};
use vipha::metrics::Metrics;
use vipha::process::CommandProcessControl;
use vipha::routing::LogRoutingPeer;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// vipha - HA cluster state coordinator
#[derive(Parser, Debug)]
#[command(name = "vipha")]
#[command(version = "0.1.0")]
#[command(about = "HA cluster state coordinator for load-balancer nodes")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local API bind address
    #[arg(short, long)]
    api_bind: Option<SocketAddr>,

    /// Run a self-managed liveness session against the remote peer
    #[arg(long)]
    ka: bool,

    /// Liveness peer address
    #[arg(long)]
    remote: Option<IpAddr>,

    /// Liveness source address
    #[arg(long)]
    source: Option<IpAddr>,

    /// Liveness transmit interval in microseconds
    #[arg(long)]
    interval: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut file_config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(bind) = args.api_bind {
        file_config.api.bind = bind;
    }
    if args.ka {
        file_config.ha.spawn_keepalive = true;
    }
    if let Some(remote) = args.remote {
        file_config.ha.remote_ip = Some(remote);
    }
    if let Some(source) = args.source {
        file_config.ha.source_ip = Some(source);
    }
    if let Some(interval) = args.interval {
        file_config.ha.interval = interval;
    }
    if let Err(e) = file_config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let ka_args = file_config.ha.keepalive_args();

    info!("Starting vipha HA coordinator");
    info!("  API address: {}", file_config.api.bind);
    if ka_args.spawn_keepalive {
        info!(
            "  Liveness: self-managed (source={}, remote={}, interval={}us)",
            ka_args.source_ip, ka_args.remote_ip, ka_args.interval_us
        );
    } else {
        info!("  Liveness: external");
    }

    let metrics = if file_config.api.metrics {
        info!("  Metrics: enabled (http://{}/metrics)", file_config.api.bind);
        Some(Arc::new(Metrics::new()))
    } else {
        info!("  Metrics: disabled");
        None
    };

    // Datapath intake and its worker
    let (queue, worker) = DatapathQueue::new(file_config.datapath.queue_capacity);
    let queue = match &metrics {
        Some(m) => queue.with_metrics(m.clone()),
        None => queue,
    };
    let datapath = Arc::new(queue);
    tokio::spawn(worker.run());

    let collaborators = Collaborators {
        routing: Arc::new(LogRoutingPeer),
        datapath: datapath.clone(),
        process: Arc::new(CommandProcessControl::new(
            file_config.ha.keepalive_process.clone(),
        )),
    };
    let coordinator = HaCoordinator::new(ka_args, collaborators);
    let coordinator = Arc::new(match &metrics {
        Some(m) => coordinator.with_metrics(m.clone()),
        None => coordinator,
    });

    // Local API surface
    let api_server = ApiServer::new(
        ApiContext {
            coordinator: coordinator.clone(),
            metrics,
        },
        file_config.api.bind,
    );
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            error!("API server error: {}", e);
        }
    });

    // Self-managed liveness session
    let launcher = LivenessLauncher::new(
        Arc::new(HttpApiProbe::for_bind(file_config.api.bind)),
        datapath,
        Arc::new(GossipLiveness::new()),
        file_config.liveness.launch_settings(),
    );
    let liveness = coordinator.spawn_liveness(launcher);

    let liveness_done = async move {
        match liveness {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
        res = liveness_done => match res {
            Ok(Ok(())) => {
                // Sessions run in their own tasks; keep serving until signalled
                tokio::signal::ctrl_c().await?;
                info!("Shutting down");
            }
            Ok(Err(e)) => {
                error!("Liveness session failed: {}", e);
                return Err(e.into());
            }
            Err(e) => {
                warn!("Liveness task ended unexpectedly: {}", e);
                return Err(e.into());
            }
        },
    }

    Ok(())
}
