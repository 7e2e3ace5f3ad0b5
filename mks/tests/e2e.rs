//! End-to-end control-plane test: API server, replica-set controller and
//! scheduler sharing one etcd, driven over HTTP the way clients and node
//! agents drive the real thing. Skips (and passes) when no etcd is
//! reachable; point `MK8S_ETCD_ENDPOINTS` at a cluster to enable it.

use std::sync::Arc;
use std::time::Duration;

use etcd_client::{Client, ConnectOptions};
use mks::api::{self, AppState};
use mks::controllers::ReplicaSetController;
use mks::registry::{NodeRegistry, PodRegistry, ReplicaSetRegistry};
use mks::scheduler::Scheduler;
use mks::storage::{EtcdStorage, Storage};
use serial_test::serial;
use tokio::net::TcpListener;
use tokio::sync::watch;

use common::{Node, NodeStatus, ObjectMeta, Pod, PodStatus};

fn endpoints() -> Vec<String> {
    std::env::var("MK8S_ETCD_ENDPOINTS")
        .unwrap_or_else(|_| "localhost:2379".to_string())
        .split(',')
        .map(str::to_string)
        .collect()
}

struct TestCluster {
    base_url: String,
    stop: watch::Sender<bool>,
}

async fn cluster_or_skip() -> Option<TestCluster> {
    let _ = env_logger::builder().is_test(true).try_init();

    let probe = Client::connect(
        endpoints(),
        Some(ConnectOptions::new().with_connect_timeout(Duration::from_secs(1))),
    )
    .await;
    if probe.is_err() {
        eprintln!("skipping: etcd not reachable at {:?}", endpoints());
        return None;
    }

    let storage: Arc<dyn Storage> = Arc::new(
        EtcdStorage::connect(&endpoints(), Duration::from_secs(5))
            .await
            .expect("probe succeeded but storage connect failed"),
    );
    // Fresh world for every run.
    for prefix in ["/pods/", "/registry/nodes/", "/replicasets/"] {
        storage.delete_prefix(prefix).await.unwrap();
    }

    let state = AppState::new(storage.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let (stop_tx, stop_rx) = watch::channel(false);

    let controller = ReplicaSetController::new(
        Arc::new(ReplicaSetRegistry::new(storage.clone())),
        Arc::new(PodRegistry::new(storage.clone())),
    )
    .with_interval(Duration::from_millis(100));
    let controller_stop = stop_rx.clone();
    tokio::spawn(async move { controller.run(controller_stop).await });

    let scheduler = Scheduler::new(
        Arc::new(PodRegistry::new(storage.clone())),
        Arc::new(NodeRegistry::new(storage)),
        Duration::from_millis(100),
    );
    tokio::spawn(async move { scheduler.run(stop_rx).await });

    Some(TestCluster {
        base_url: format!("http://{addr}/api/v1"),
        stop: stop_tx,
    })
}

fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: name.to_string(),
            ..Default::default()
        },
        status: NodeStatus::Ready,
        ..Default::default()
    }
}

#[tokio::test]
#[serial]
async fn declared_replicasets_become_scheduled_pods() {
    let Some(cluster) = cluster_or_skip().await else {
        return;
    };
    let base = &cluster.base_url;
    let client = reqwest::Client::new();

    // Two "kubelets" register their nodes.
    for name in ["node-0", "node-1"] {
        let resp = client
            .post(format!("{base}/nodes"))
            .json(&node(name))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    }

    // A client declares three replicas of nginx.
    let rs = serde_json::json!({
        "metadata": { "name": "rs1" },
        "spec": {
            "replicas": 3,
            "template": {
                "spec": { "containers": [{ "name": "web", "image": "nginx:latest" }] }
            }
        }
    });
    let resp = client
        .post(format!("{base}/replicasets"))
        .json(&rs)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    // The controller creates the pods and the scheduler binds them.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let pods = loop {
        let pods: Vec<Pod> = client
            .get(format!("{base}/pods"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let scheduled = pods
            .iter()
            .filter(|p| p.status == PodStatus::Scheduled && p.node_name.is_some())
            .count();
        if pods.len() == 3 && scheduled == 3 {
            break pods;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "cluster did not converge: {pods:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    for pod in &pods {
        assert!(pod.metadata.name.starts_with("rs1"));
        let bound = pod.node_name.as_deref().unwrap();
        assert!(bound == "node-0" || bound == "node-1");
    }

    // Observed replicas catch up in the replica-set status.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let rs: serde_json::Value = client
            .get(format!("{base}/replicasets/rs1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if rs["status"]["replicas"] == 3 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "status.replicas never reached 3: {rs}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let _ = cluster.stop.send(true);
}

#[tokio::test]
#[serial]
async fn pods_stay_pending_without_nodes() {
    let Some(cluster) = cluster_or_skip().await else {
        return;
    };
    let base = &cluster.base_url;
    let client = reqwest::Client::new();

    let pod = serde_json::json!({
        "metadata": { "name": "stranded" },
        "spec": { "containers": [{ "name": "web", "image": "nginx:latest" }] }
    });
    let resp = client
        .post(format!("{base}/pods"))
        .json(&pod)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

    // Give the scheduler several ticks; with no nodes the pod must not
    // move out of Pending.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let fetched: Pod = client
        .get(format!("{base}/pods/stranded"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched.status, PodStatus::Pending);
    assert!(fetched.node_name.is_none());

    let _ = cluster.stop.send(true);
}
