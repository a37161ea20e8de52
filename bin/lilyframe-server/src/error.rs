//! Unified server error type.
//!
//! Only the JSON endpoints surface errors this way. The frame endpoint never
//! reports failures directly; it answers with the generic error frame.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A frame page failed to render.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::Template(e) => {
                error!(error = %e, "frame template error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

impl From<lilyframe_core::TrackerError> for ServerError {
    fn from(e: lilyframe_core::TrackerError) -> Self {
        ServerError::NotFound(e.to_string())
    }
}
