//! TaskRun Controller
//!
//! Seeds an in-memory cluster from a JSON manifest and reconciles its runs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskrun_controller::config::{
    DEFAULT_BASH_NOOP_IMAGE, DEFAULT_ENTRYPOINT_IMAGE, DEFAULT_GIT_IMAGE, DEFAULT_STORAGE_IMAGE,
};
use taskrun_controller::metrics::collect_metrics;
use taskrun_controller::{Clients, Config, Controller, InMemoryCluster, Manifest, Reconciler};

/// Reconciles TaskRuns against an in-memory cluster.
#[derive(Parser, Debug)]
#[command(name = "taskrun-controller", about = "Reconcile TaskRuns from a manifest")]
struct Args {
    /// JSON manifest with tasks, cluster tasks, resources and task runs
    manifest: PathBuf,

    /// Reconcile every run once and exit instead of running until Ctrl-C
    #[arg(long)]
    once: bool,

    /// Image providing the entrypoint binary
    #[arg(long, default_value = DEFAULT_ENTRYPOINT_IMAGE)]
    entrypoint_image: String,

    /// Image for git fetch steps
    #[arg(long, default_value = DEFAULT_GIT_IMAGE)]
    git_image: String,

    /// Image for create-dir and copy steps
    #[arg(long, default_value = DEFAULT_BASH_NOOP_IMAGE)]
    bash_noop_image: String,

    /// Image for storage fetch steps
    #[arg(long, default_value = DEFAULT_STORAGE_IMAGE)]
    storage_image: String,

    /// Seconds between full resyncs
    #[arg(long, default_value = "30")]
    resync_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = Config {
        entrypoint_image: args.entrypoint_image,
        git_image: args.git_image,
        bash_noop_image: args.bash_noop_image,
        storage_image: args.storage_image,
        resync_interval_secs: args.resync_interval_secs,
        ..Config::default()
    };

    let raw = std::fs::read_to_string(&args.manifest).map_err(|e| {
        format!(
            "Failed to read manifest from '{}': {}",
            args.manifest.display(),
            e
        )
    })?;
    let manifest: Manifest = serde_json::from_str(&raw)?;
    let cluster = Arc::new(InMemoryCluster::from_manifest(manifest));

    let runs = cluster.task_runs.read().await.len();
    info!(manifest = %args.manifest.display(), runs, "Loaded manifest");

    let controller = Controller::new(Reconciler::new(
        Clients::from_shared(cluster.clone()),
        config,
    ));

    if args.once {
        let failed = controller.sync_once().await?;
        if failed > 0 {
            warn!(failed, "Some TaskRuns failed to reconcile");
        }
    } else {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(controller.run(shutdown_rx));
        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(true);
        handle.await?;
    }

    for run in cluster.task_runs.read().await.values() {
        let (status, reason) = run
            .status
            .succeeded()
            .map(|c| (format!("{:?}", c.status), c.reason.clone()))
            .unwrap_or_else(|| ("Unknown".to_string(), String::new()));
        println!(
            "{}\t{}\t{}\t{}",
            run.key(),
            status,
            reason,
            run.status.pod_name.as_deref().unwrap_or("-")
        );
    }
    print!("{}", collect_metrics(cluster.as_ref()).await?);

    Ok(())
}
