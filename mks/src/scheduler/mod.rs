//! Assigns pending pods to schedulable nodes.

use std::sync::Arc;
use std::time::Duration;

use common::PodStatus;
use rand::Rng;
use tokio::sync::watch;

use crate::registry::{NodeRegistry, PodRegistry};

pub const DEFAULT_SCHEDULE_INTERVAL: Duration = Duration::from_secs(10);

/// Ticker-driven scheduling loop. Node choice is uniformly random across
/// schedulable nodes; the only contract is that some schedulable node is
/// chosen. Pods are bound in list order, independently of one another.
pub struct Scheduler {
    pods: Arc<PodRegistry>,
    nodes: Arc<NodeRegistry>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(pods: Arc<PodRegistry>, nodes: Arc<NodeRegistry>, interval: Duration) -> Self {
        Self {
            pods,
            nodes,
            interval,
        }
    }

    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    log::info!(target: "mks::scheduler", "scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.schedule_pending().await {
                log::error!(target: "mks::scheduler", "scheduling pass failed: {e}");
            }
        }
    }

    /// Binds every pending pod to some schedulable node. A single failed
    /// binding is logged and skipped; the pod stays pending for the next
    /// tick.
    pub async fn schedule_pending(&self) -> anyhow::Result<()> {
        let pending = self.pods.list_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }
        let nodes = self.nodes.list().await?;
        let available: Vec<_> = nodes.iter().filter(|n| n.is_schedulable()).collect();
        if available.is_empty() {
            anyhow::bail!(
                "no nodes available to schedule {} pending pods",
                pending.len()
            );
        }

        for mut pod in pending {
            let choice = rand::thread_rng().gen_range(0..available.len());
            let node = available[choice];
            pod.node_name = Some(node.metadata.name.clone());
            pod.status = PodStatus::Scheduled;
            match self.pods.update(&pod).await {
                Ok(()) => log::info!(
                    target: "mks::scheduler",
                    "scheduled pod {} onto node {}",
                    pod.metadata.name,
                    node.metadata.name
                ),
                Err(e) => log::error!(
                    target: "mks::scheduler",
                    "failed to bind pod {}: {e}",
                    pod.metadata.name
                ),
            }
        }
        Ok(())
    }
}
