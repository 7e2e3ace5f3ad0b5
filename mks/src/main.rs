use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use mks::api::{self, AppState};
use mks::controllers::ReplicaSetController;
use mks::listwatch::{ListWatch, ListWatchOptions};
use mks::registry::{NodeRegistry, PodRegistry, ReplicaSetRegistry};
use mks::scheduler::Scheduler;
use mks::storage::{EtcdStorage, Storage};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "mks", version, about = "mk8s control-plane daemons")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API backed by the cluster store
    Apiserver {
        /// Address to bind, host:port
        #[arg(long, default_value = "127.0.0.1:8080")]
        address: String,
        #[arg(long = "etcd-endpoints", value_delimiter = ',', default_value = "localhost:2379")]
        etcd_endpoints: Vec<String>,
    },
    /// Run the replica-set reconciliation loop
    Controller {
        #[arg(long = "etcd-endpoints", value_delimiter = ',', default_value = "localhost:2379")]
        etcd_endpoints: Vec<String>,
        /// Seconds between reconciliation ticks
        #[arg(long, default_value_t = 1)]
        interval: u64,
    },
    /// Run the pod scheduler loop
    Scheduler {
        #[arg(long = "etcd-endpoints", value_delimiter = ',', default_value = "localhost:2379")]
        etcd_endpoints: Vec<String>,
        /// Seconds between scheduling ticks
        #[arg(long, default_value_t = 10)]
        interval: u64,
    },
    /// Stream change events for a key prefix to stdout
    Watch {
        #[arg(long = "etcd-endpoints", value_delimiter = ',', default_value = "localhost:2379")]
        etcd_endpoints: Vec<String>,
        #[arg(long)]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Apiserver {
            address,
            etcd_endpoints,
        } => run_apiserver(address, etcd_endpoints).await,
        Commands::Controller {
            etcd_endpoints,
            interval,
        } => run_controller(etcd_endpoints, interval).await,
        Commands::Scheduler {
            etcd_endpoints,
            interval,
        } => run_scheduler(etcd_endpoints, interval).await,
        Commands::Watch {
            etcd_endpoints,
            prefix,
        } => run_watch(etcd_endpoints, prefix).await,
    }
}

async fn connect(endpoints: &[String]) -> anyhow::Result<Arc<dyn Storage>> {
    let storage = EtcdStorage::connect(endpoints, DIAL_TIMEOUT)
        .await
        .context("failed to connect to the cluster store")?;
    Ok(Arc::new(storage))
}

/// Flips the stop signal on the first interrupt.
fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!(target: "mks", "received interrupt, shutting down");
        let _ = stop_tx.send(true);
    });
    stop_rx
}

async fn run_apiserver(address: String, endpoints: Vec<String>) -> anyhow::Result<()> {
    let storage = connect(&endpoints).await?;
    api::serve(&address, AppState::new(storage)).await
}

async fn run_controller(endpoints: Vec<String>, interval: u64) -> anyhow::Result<()> {
    let storage = connect(&endpoints).await?;
    let controller = ReplicaSetController::new(
        Arc::new(ReplicaSetRegistry::new(storage.clone())),
        Arc::new(PodRegistry::new(storage)),
    )
    .with_interval(Duration::from_secs(interval));
    log::info!(target: "mks::controller", "replicaset controller started");
    controller.run(stop_on_ctrl_c()).await;
    Ok(())
}

async fn run_scheduler(endpoints: Vec<String>, interval: u64) -> anyhow::Result<()> {
    let storage = connect(&endpoints).await?;
    let scheduler = Scheduler::new(
        Arc::new(PodRegistry::new(storage.clone())),
        Arc::new(NodeRegistry::new(storage)),
        Duration::from_secs(interval),
    );
    log::info!(target: "mks::scheduler", "scheduler started");
    scheduler.run(stop_on_ctrl_c()).await;
    Ok(())
}

async fn run_watch(endpoints: Vec<String>, prefix: String) -> anyhow::Result<()> {
    let lw = ListWatch::new(endpoints, prefix, ListWatchOptions::default())?;
    let (mut events, mut handle) = lw.list_and_watch();
    let mut stop = stop_on_ctrl_c();
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => println!(
                    "{:?}\t{}\t{}",
                    event.event_type,
                    event.key,
                    String::from_utf8_lossy(&event.value)
                ),
                None => break,
            }
        }
    }
    handle.cancel().await;
    Ok(())
}
