use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::registry::RegistryError;

/// Maps failures onto the HTTP error taxonomy: validation is the client's
/// fault (400), absence is 404, create conflicts are 409, everything that
/// went wrong behind the registry is 500.
pub enum ApiError {
    Registry(RegistryError),
    NameMismatch { path: String, body: String },
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Registry(err) => {
                let status = match &err {
                    RegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
                    RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
                    RegistryError::AlreadyExists { .. } => StatusCode::CONFLICT,
                    RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            ApiError::NameMismatch { path, body } => (
                StatusCode::BAD_REQUEST,
                format!("name in URL {path:?} does not match name in body {body:?}"),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
