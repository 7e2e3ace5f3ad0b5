use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::ReplicaSet;

use crate::api::response::ApiError;
use crate::api::server::AppState;

pub async fn create_replicaset(
    State(state): State<AppState>,
    Json(rs): Json<ReplicaSet>,
) -> Result<(StatusCode, Json<ReplicaSet>), ApiError> {
    let created = state.replicasets.create(rs).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_replicasets(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReplicaSet>>, ApiError> {
    Ok(Json(state.replicasets.list().await?))
}

pub async fn get_replicaset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ReplicaSet>, ApiError> {
    Ok(Json(state.replicasets.get(&name).await?))
}

pub async fn update_replicaset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(rs): Json<ReplicaSet>,
) -> Result<Json<ReplicaSet>, ApiError> {
    if name != rs.metadata.name {
        return Err(ApiError::NameMismatch {
            path: name,
            body: rs.metadata.name,
        });
    }
    state.replicasets.update(&rs).await?;
    Ok(Json(rs))
}

pub async fn delete_replicaset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.replicasets.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
