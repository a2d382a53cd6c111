//! harbor-config-operator: keeps Harbor registries, projects and replication
//! policies in line with declared `HarborConfiguration` objects.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harbor_config_operator::{
    ClientConfig, Controller, ControllerConfig, FileStore, HarborClientFactory, MemoryStore,
    ObjectStore, OperatorAuditLogger, SpecTargetResolver,
};

/// Harbor configuration operator
#[derive(Parser, Debug)]
#[command(name = "harbor-config-operator", version, about)]
struct Args {
    /// Directory holding one HarborConfiguration JSON manifest per object
    #[arg(long, required_unless_present = "dev")]
    manifest_dir: Option<PathBuf>,

    /// Keep objects in memory; manifests from --manifest-dir are only read once
    #[arg(long)]
    dev: bool,

    /// Instance name used in audit events (defaults to hostname)
    #[arg(long)]
    instance: Option<String>,

    /// Objects reconciled concurrently
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Seconds between object store polls
    #[arg(long, default_value = "2")]
    poll_interval: u64,

    /// Seconds after which a synced object is reconciled again
    #[arg(long, default_value = "36000")]
    resync_interval: u64,

    /// Initial retry delay in seconds
    #[arg(long, default_value = "5")]
    backoff_base: u64,

    /// Maximum retry delay in seconds
    #[arg(long, default_value = "300")]
    backoff_max: u64,

    /// Deadline for one reconciliation pass in seconds (0 disables it)
    #[arg(long, default_value = "120")]
    reconcile_timeout: u64,

    /// Timeout for a single Harbor API request in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,

    /// Accept invalid TLS certificates from Harbor
    #[arg(long)]
    insecure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "harbor_config_operator=info,audit=info,reqwest=warn,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let instance = args.instance.unwrap_or_else(|| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string())
    });

    info!("Starting harbor-config-operator: {}", instance);

    let store: Arc<dyn ObjectStore> = match (&args.manifest_dir, args.dev) {
        (dir, true) => {
            let memory = MemoryStore::new();
            if let Some(dir) = dir {
                // Seed from the manifests; nothing is written back.
                let objects = FileStore::new(dir)
                    .list()
                    .await
                    .with_context(|| format!("Failed to read manifests from {}", dir.display()))?;
                for obj in objects {
                    memory.apply(obj).await;
                }
            }
            info!("Dev mode: {} object(s) kept in memory", memory.len().await);
            Arc::new(memory)
        }
        (Some(dir), false) => {
            if !dir.is_dir() {
                bail!("manifest directory {} does not exist", dir.display());
            }
            info!("Manifest directory: {}", dir.display());
            Arc::new(FileStore::new(dir))
        }
        (None, false) => bail!("--manifest-dir is required unless --dev is set"),
    };

    let clients = HarborClientFactory::new(&ClientConfig {
        request_timeout: Duration::from_secs(args.request_timeout),
        accept_invalid_certs: args.insecure,
        ..Default::default()
    })
    .context("Failed to build HTTP client")?;

    let config = ControllerConfig {
        workers: args.workers.max(1),
        poll_interval: Duration::from_secs(args.poll_interval.max(1)),
        resync_interval: Duration::from_secs(args.resync_interval),
        backoff_base: Duration::from_secs(args.backoff_base),
        backoff_max: Duration::from_secs(args.backoff_max),
        reconcile_timeout: (args.reconcile_timeout > 0)
            .then(|| Duration::from_secs(args.reconcile_timeout)),
    };

    let controller = Arc::new(Controller::new(
        store,
        Arc::new(SpecTargetResolver),
        Arc::new(clients),
        Arc::new(OperatorAuditLogger::new(&instance)),
        config,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    let ctrl_c = signal::ctrl_c();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    let _ = shutdown_tx.send(true);
    controller_handle
        .await
        .context("Controller task failed")?;

    info!("Shutdown complete");
    Ok(())
}
