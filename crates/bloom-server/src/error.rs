//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bloom_ingest::store::StoreError;
use serde_json::json;
use thiserror::Error;

use crate::supervisor::SupervisorError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
            AppError::Store(ref e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "A store error occurred".to_string())
            },
            AppError::Supervisor(ref e) => match e {
                SupervisorError::AlreadyRunning(_) => {
                    (StatusCode::BAD_REQUEST, "Voice agent is already running".to_string())
                },
                SupervisorError::NotRunning => {
                    (StatusCode::BAD_REQUEST, "Voice agent is not running".to_string())
                },
                SupervisorError::MissingEnv(_) => {
                    tracing::error!("Agent misconfigured: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                },
                SupervisorError::Spawn(io) => {
                    tracing::error!("Agent spawn failed: {:?}", io);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to start voice agent: {}", io),
                    )
                },
                SupervisorError::Stop(io) => {
                    tracing::error!("Agent stop failed: {:?}", io);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to stop voice agent: {}", io),
                    )
                },
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
