//! ARP daemon entry point.
//!
//! Loads the topology from asicd, then applies the JSON-lines notification
//! stream until SIGINT. Outbound ARP cache requests are logged.

use anyhow::Context;
use clap::Parser;
use sonic_arpd::config::DEFAULT_CONFIG_PATH;
use sonic_arpd::{
    ArpDaemon, ArpdConfig, AsicdNotification, DisabledCapture, SnapshotPlane, TopologyHandle,
    TopologyOrch, TopologyOrchConfig, TopologyReceivers, TopologySinks,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// SONiC ARP daemon
#[derive(Parser, Debug)]
#[command(name = "arpd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter (trace, debug, info, warn, error); overrides RUST_LOG
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ArpdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate()?;

    if args.dump_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(args.log_level.as_deref(), &config.log.level)?;
    info!(config = %args.config.display(), "arpd: Starting ARP daemon");

    let plane = match &config.asicd.snapshot_path {
        Some(path) => SnapshotPlane::from_path(path)
            .with_context(|| format!("loading topology snapshot {}", path.display()))?,
        None => {
            warn!("arpd: No asicd snapshot configured, starting with an empty topology");
            SnapshotPlane::default()
        }
    };

    let (sinks, receivers) = TopologySinks::channel(&config.channels);
    spawn_sink_loggers(receivers);

    let orch = TopologyOrch::new(
        TopologyOrchConfig::from(&config),
        Arc::new(DisabledCapture),
        sinks,
    );
    let (daemon, handle) = ArpDaemon::new(orch, config.channels.event_queue_depth);

    let reader_handle = handle.clone();
    let notification_path = config.asicd.notification_path.clone();
    tokio::spawn(async move {
        if let Err(e) = read_notifications(notification_path.as_deref(), reader_handle).await {
            error!(error = %e, "arpd: Notification reader failed");
        }
    });

    let orch = daemon
        .run(&plane, async {
            match signal::ctrl_c().await {
                Ok(()) => info!("arpd: Received SIGINT"),
                Err(e) => error!(error = %e, "arpd: Failed to listen for SIGINT"),
            }
        })
        .await;
    drop(handle);

    info!(stats = ?orch.stats(), "arpd: Graceful shutdown complete");
    Ok(())
}

fn init_logging(cli_level: Option<&str>, config_level: &str) -> anyhow::Result<()> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config_level))?,
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("installing tracing subscriber")?;
    Ok(())
}

/// Feeds JSON-lines notifications from `path` (stdin when unset) to the
/// topology owner. Malformed lines are logged and skipped.
async fn read_notifications(path: Option<&Path>, handle: TopologyHandle) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            forward_lines(BufReader::new(file), &handle).await
        }
        None => forward_lines(BufReader::new(tokio::io::stdin()), &handle).await,
    }
}

async fn forward_lines<R>(reader: R, handle: &TopologyHandle) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match AsicdNotification::from_json(line) {
            Ok(msg) => handle.notify(msg).await?,
            Err(e) => warn!(error = %e, "arpd: Dropping malformed notification"),
        }
    }
    info!("arpd: Notification stream ended");
    Ok(())
}

/// Stand-in consumers for the ARP cache side of the outbound channels.
fn spawn_sink_loggers(receivers: TopologyReceivers) {
    let TopologyReceivers {
        mut arp_delete,
        mut mac_move,
        mut rx,
        mut probe,
    } = receivers;

    tokio::spawn(async move {
        while let Some(request) = arp_delete.recv().await {
            info!(?request, "arpd: ARP cache invalidation");
        }
    });
    tokio::spawn(async move {
        while let Some(msg) = mac_move.recv().await {
            info!(ip = %msg.ip_addr, ifindex = %msg.ifindex, vlan_id = msg.vlan_id, "arpd: MAC move");
        }
    });
    tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            debug!(port = %packet.port, len = packet.data.len(), "arpd: Received frame");
        }
    });
    tokio::spawn(async move {
        while let Some(request) = probe.recv().await {
            info!(l3 = %request.l3_ifindex, ip = %request.ip, mac = ?request.mac, "arpd: Probe requested");
        }
    });
}
