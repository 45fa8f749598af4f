use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Session not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => RelayError::NotFound,
            StoreError::Unavailable(msg) => RelayError::UpstreamUnavailable(msg),
            StoreError::Corrupt(msg) => RelayError::UpstreamUnavailable(msg),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Validation { .. } => StatusCode::BAD_REQUEST,
            RelayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
