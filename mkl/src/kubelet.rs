//! The node agent: registers its node with the API server, polls for pods
//! bound to it, and drives the local container runtime.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use common::retry::{self, RetryOptions};
use common::{Node, NodeStatus, ObjectMeta, Pod};
use reqwest::StatusCode;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::runtime::ContainerRuntime;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const LABEL_POD_NAME: &str = "mk8s.pod.name";
pub const LABEL_POD_NAMESPACE: &str = "mk8s.pod.namespace";
pub const LABEL_CONTAINER_NAME: &str = "mk8s.container.name";

/// Runtime-side view of one container the kubelet started, joined back to
/// the pod that owns it.
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub pod_name: String,
    pub container_name: String,
    pub container_id: String,
    pub state: String,
}

pub struct Kubelet {
    node_name: String,
    api_server: String,
    poll_interval: Duration,
    client: reqwest::Client,
    runtime: Arc<dyn ContainerRuntime>,
    /// Pods this kubelet has accepted. Only the poll loop writes it;
    /// launch failures come back over `failed_rx` so the pod is retried on
    /// a later poll.
    pods: HashMap<String, Pod>,
    failed_tx: mpsc::UnboundedSender<String>,
    failed_rx: mpsc::UnboundedReceiver<String>,
}

impl Kubelet {
    pub fn new(
        node_name: impl Into<String>,
        api_server: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        Self {
            node_name: node_name.into(),
            api_server: api_server.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            client: reqwest::Client::new(),
            runtime,
            pods: HashMap::new(),
            failed_tx,
            failed_rx,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Registers the node, then polls for assigned pods until stopped.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.register_node(&mut stop).await?;
        info!(node = %self.node_name, "node registered");

        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    info!(node = %self.node_name, "kubelet stopped");
                    return Ok(());
                }
                Some(pod_name) = self.failed_rx.recv() => {
                    // Forget the pod so the next poll retries it.
                    self.pods.remove(&pod_name);
                }
                _ = ticker.tick() => {
                    match self.fetch_assigned_pods().await {
                        Ok(pods) => self.sync_pods(pods),
                        Err(e) => warn!("failed to fetch pod assignments: {e:#}"),
                    }
                }
            }
        }
    }

    /// Announces this node to the API server, retrying with backoff on
    /// transient errors until registration succeeds or shutdown begins.
    async fn register_node(&self, stop: &mut watch::Receiver<bool>) -> anyhow::Result<()> {
        let node = Node {
            metadata: ObjectMeta {
                name: self.node_name.clone(),
                ..Default::default()
            },
            spec: Default::default(),
            status: NodeStatus::Ready,
        };
        let url = format!("http://{}/api/v1/nodes", self.api_server);

        let registered =
            retry::with_exponential_backoff(&RetryOptions::default(), stop, || {
                let client = self.client.clone();
                let url = url.clone();
                let node = node.clone();
                async move {
                    if let Err(e) = try_register(&client, &url, &node).await {
                        warn!("node registration failed, will retry: {e:#}");
                        return Err(e);
                    }
                    Ok(())
                }
            })
            .await;
        match registered {
            Some(()) => Ok(()),
            None => bail!("shutdown requested before the node could register"),
        }
    }

    async fn fetch_assigned_pods(&self) -> anyhow::Result<Vec<Pod>> {
        let url = format!("http://{}/api/v1/pods", self.api_server);
        let pods: Vec<Pod> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(pods
            .into_iter()
            .filter(|pod| pod.node_name.as_deref() == Some(self.node_name.as_str()))
            .collect())
    }

    /// Records unseen pods and launches their containers in the
    /// background. Pods already seen are left alone.
    fn sync_pods(&mut self, pods: Vec<Pod>) {
        for pod in pods {
            if self.pods.contains_key(&pod.metadata.name) {
                continue;
            }
            info!(pod = %pod.metadata.name, "new pod assigned");
            self.pods.insert(pod.metadata.name.clone(), pod.clone());
            let runtime = self.runtime.clone();
            let failed = self.failed_tx.clone();
            tokio::spawn(async move {
                let name = pod.metadata.name.clone();
                if let Err(e) = run_pod(runtime.as_ref(), &pod).await {
                    warn!(pod = %name, "failed to run pod, will retry on a later poll: {e:#}");
                    let _ = failed.send(name);
                }
            });
        }
    }

    /// Reads container state back from the runtime, filtered by the
    /// pod-name label, and joins it to the pods this kubelet knows.
    pub async fn container_statuses(&self) -> anyhow::Result<Vec<ContainerStatus>> {
        let containers = self.runtime.list_containers(LABEL_POD_NAME).await?;
        let mut statuses = Vec::new();
        for container in containers {
            let Some(pod_name) = container.labels.get(LABEL_POD_NAME) else {
                continue;
            };
            let Some(pod) = self.pods.get(pod_name) else {
                continue;
            };
            if pod.node_name.as_deref() != Some(self.node_name.as_str()) {
                continue;
            }
            let Some(container_name) = container.labels.get(LABEL_CONTAINER_NAME) else {
                continue;
            };
            if pod
                .spec
                .containers
                .iter()
                .any(|spec| spec.name == *container_name)
            {
                statuses.push(ContainerStatus {
                    pod_name: pod_name.clone(),
                    container_name: container_name.clone(),
                    container_id: container.id,
                    state: container.state,
                });
            }
        }
        Ok(statuses)
    }
}

async fn try_register(
    client: &reqwest::Client,
    url: &str,
    node: &Node,
) -> anyhow::Result<()> {
    let resp = client
        .post(url)
        .json(node)
        .send()
        .await
        .context("registration request failed")?;
    match resp.status() {
        StatusCode::CREATED => Ok(()),
        // A restarted kubelet finds its earlier registration still there.
        StatusCode::CONFLICT => Ok(()),
        status => bail!("api server rejected registration: {status}"),
    }
}

/// Pulls and starts every container of a pod. Containers are named
/// `<pod>-<container>` and labelled so their state can be found again.
/// Containers that already exist from an earlier partial attempt are
/// skipped, keeping retries idempotent.
async fn run_pod(runtime: &dyn ContainerRuntime, pod: &Pod) -> anyhow::Result<()> {
    info!(pod = %pod.metadata.name, "running pod");
    let existing: HashSet<String> = runtime
        .list_containers(LABEL_POD_NAME)
        .await?
        .into_iter()
        .filter(|c| c.labels.get(LABEL_POD_NAME) == Some(&pod.metadata.name))
        .filter_map(|c| c.labels.get(LABEL_CONTAINER_NAME).cloned())
        .collect();

    for container in &pod.spec.containers {
        if existing.contains(&container.name) {
            continue;
        }
        let labels = HashMap::from([
            (LABEL_POD_NAME.to_string(), pod.metadata.name.clone()),
            (LABEL_POD_NAMESPACE.to_string(), pod.metadata.namespace.clone()),
            (LABEL_CONTAINER_NAME.to_string(), container.name.clone()),
        ]);
        runtime
            .pull_image(&container.image)
            .await
            .with_context(|| format!("pulling {}", container.image))?;
        let container_name = format!("{}-{}", pod.metadata.name, container.name);
        let id = runtime
            .create_container(&container_name, &container.image, &labels)
            .await
            .with_context(|| format!("creating container {container_name}"))?;
        runtime
            .start_container(&id)
            .await
            .with_context(|| format!("starting container {container_name}"))?;
        info!(container = %container_name, id = %id, "container started");
    }
    Ok(())
}
