use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::net::TcpListener;

use super::handlers::{node, pod, replicaset};
use crate::registry::{NodeRegistry, PodRegistry, ReplicaSetRegistry};
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub pods: Arc<PodRegistry>,
    pub nodes: Arc<NodeRegistry>,
    pub replicasets: Arc<ReplicaSetRegistry>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            pods: Arc::new(PodRegistry::new(storage.clone())),
            nodes: Arc::new(NodeRegistry::new(storage.clone())),
            replicasets: Arc::new(ReplicaSetRegistry::new(storage)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/pods", post(pod::create_pod).get(pod::list_pods))
        .route("/api/v1/pods/unassigned", get(pod::list_unassigned_pods))
        .route(
            "/api/v1/pods/{name}",
            get(pod::get_pod)
                .put(pod::update_pod)
                .delete(pod::delete_pod),
        )
        .route(
            "/api/v1/nodes",
            post(node::create_node).get(node::list_nodes),
        )
        .route(
            "/api/v1/nodes/{name}",
            get(node::get_node)
                .put(node::update_node)
                .delete(node::delete_node),
        )
        .route(
            "/api/v1/replicasets",
            post(replicaset::create_replicaset).get(replicaset::list_replicasets),
        )
        .route(
            "/api/v1/replicasets/{name}",
            get(replicaset::get_replicaset)
                .put(replicaset::update_replicaset)
                .delete(replicaset::delete_replicaset),
        )
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Binds `address` and serves the API until the process exits.
pub async fn serve(address: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    log::info!(target: "mks::api", "api server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
