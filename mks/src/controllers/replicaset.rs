use std::sync::Arc;
use std::time::Duration;

use common::{ObjectMeta, Pod, PodSpec, ReplicaSet, names};
use tokio::sync::watch;

use crate::registry::{PodRegistry, RegistryError, ReplicaSetRegistry};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Level-triggered replica-set reconciliation.
///
/// Every tick the controller compares the pods a replica set owns against
/// its desired count and creates the shortfall. Ticks over an unchanged
/// world are no-ops, so repeated or duplicate observations are harmless.
/// Surplus pods are deliberately left alone.
pub struct ReplicaSetController {
    replicasets: Arc<ReplicaSetRegistry>,
    pods: Arc<PodRegistry>,
    interval: Duration,
}

impl ReplicaSetController {
    pub fn new(replicasets: Arc<ReplicaSetRegistry>, pods: Arc<PodRegistry>) -> Self {
        Self {
            replicasets,
            pods,
            interval: DEFAULT_RECONCILE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs reconciliation ticks until the stop signal fires. Failures are
    /// logged; the next tick retries from current state.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    log::info!(target: "mks::controller", "replicaset controller stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.reconcile_all().await {
                log::error!(target: "mks::controller", "reconcile pass failed: {e}");
            }
        }
    }

    pub async fn reconcile_all(&self) -> Result<(), RegistryError> {
        let replicasets = self.replicasets.list().await?;
        for rs in &replicasets {
            if let Err(e) = self.reconcile(rs).await {
                log::error!(
                    target: "mks::controller",
                    "failed to reconcile replicaset {}: {e}",
                    rs.metadata.name
                );
            }
        }
        Ok(())
    }

    /// Brings one replica set's pod count up to its desired replicas and
    /// records the observed count in its status.
    pub async fn reconcile(&self, rs: &ReplicaSet) -> Result<(), RegistryError> {
        // Work from a fresh read; the listed copy may already be stale.
        let mut current = self.replicasets.get(&rs.metadata.name).await?;
        let pods = self.pods.list().await?;
        let active_owned = pods
            .iter()
            .filter(|pod| pod.is_owned_by(&current.metadata) && pod.is_active())
            .count() as i32;
        let desired = current.spec.replicas;

        let mut observed = active_owned;
        if active_owned < desired {
            for _ in active_owned..desired {
                for container in &current.spec.template.spec.containers {
                    let pod = Pod {
                        metadata: ObjectMeta {
                            name: names::generate_name(&current.metadata.name),
                            namespace: current.spec.template.metadata.namespace.clone(),
                            ..Default::default()
                        },
                        spec: PodSpec {
                            containers: vec![container.clone()],
                            replicas: current.spec.template.spec.replicas,
                        },
                        node_name: None,
                        status: Default::default(),
                    };
                    let created = self.pods.create(pod).await?;
                    log::info!(
                        target: "mks::controller",
                        "replicaset {} created pod {}",
                        current.metadata.name,
                        created.metadata.name
                    );
                }
            }
            observed = desired;
        } else if active_owned > desired {
            // Scale-down is out of scope; surplus pods stay, the status
            // reports the desired count the set converged to.
            observed = desired;
        }

        current.status.replicas = observed;
        self.replicasets.update(&current).await
    }
}
