use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use common::names;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use mkl::kubelet::Kubelet;
use mkl::runtime::DockerCli;

#[derive(Parser)]
#[command(name = "mkl", version, about = "mk8s node agent")]
struct Cli {
    /// API server address, host:port
    #[arg(long, default_value = "127.0.0.1:8080")]
    api_server: String,
    /// Name to register this node under; generated when omitted
    #[arg(long)]
    node_name: Option<String>,
    /// Seconds between pod polls
    #[arg(long, default_value_t = 10)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let node_name = cli
        .node_name
        .unwrap_or_else(|| names::generate_name("mkl"));
    let kubelet = Kubelet::new(node_name, cli.api_server, Arc::new(DockerCli::new()))
        .with_poll_interval(Duration::from_secs(cli.poll_interval));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received interrupt, shutting down");
        let _ = stop_tx.send(true);
    });

    kubelet.run(stop_rx).await
}
