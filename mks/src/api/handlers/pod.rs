use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::Pod;

use crate::api::response::ApiError;
use crate::api::server::AppState;

pub async fn create_pod(
    State(state): State<AppState>,
    Json(pod): Json<Pod>,
) -> Result<(StatusCode, Json<Pod>), ApiError> {
    let created = state.pods.create(pod).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_pods(State(state): State<AppState>) -> Result<Json<Vec<Pod>>, ApiError> {
    Ok(Json(state.pods.list().await?))
}

pub async fn get_pod(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Pod>, ApiError> {
    Ok(Json(state.pods.get(&name).await?))
}

pub async fn update_pod(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(pod): Json<Pod>,
) -> Result<Json<Pod>, ApiError> {
    if name != pod.metadata.name {
        return Err(ApiError::NameMismatch {
            path: name,
            body: pod.metadata.name,
        });
    }
    state.pods.update(&pod).await?;
    Ok(Json(pod))
}

pub async fn delete_pod(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.pods.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_unassigned_pods(
    State(state): State<AppState>,
) -> Result<Json<Vec<Pod>>, ApiError> {
    Ok(Json(state.pods.list_unassigned().await?))
}
