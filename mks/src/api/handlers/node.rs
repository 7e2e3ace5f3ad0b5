use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::Node;

use crate::api::response::ApiError;
use crate::api::server::AppState;

pub async fn create_node(
    State(state): State<AppState>,
    Json(node): Json<Node>,
) -> Result<(StatusCode, Json<Node>), ApiError> {
    let created = state.nodes.create(node).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_nodes(State(state): State<AppState>) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(state.nodes.list().await?))
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Node>, ApiError> {
    Ok(Json(state.nodes.get(&name).await?))
}

pub async fn update_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(node): Json<Node>,
) -> Result<Json<Node>, ApiError> {
    if name != node.metadata.name {
        return Err(ApiError::NameMismatch {
            path: name,
            body: node.metadata.name,
        });
    }
    state.nodes.update(&node).await?;
    Ok(Json(node))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.nodes.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
