//! HTTP routes for the agent launcher

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use bloom_ingest::store::{Document, DocumentStore, FieldValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::AppError;
use crate::middleware::tracing_layer;
use crate::supervisor::{ProcessSupervisor, StopOutcome};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ProcessSupervisor>,
    pub store: Arc<dyn DocumentStore>,
    pub chats_collection: String,
}

#[derive(Debug, Deserialize)]
pub struct StartParams {
    chat_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub chat_id: Option<String>,
}

/// Create the application router with all routes and middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/start", post(start_agent))
        .route("/stop", post(stop_agent))
        .with_state(state)
        .layer(tracing_layer())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "bloom-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let chat_id = state.supervisor.session_id().await;
    Json(StatusResponse {
        running: chat_id.is_some(),
        chat_id,
    })
}

async fn start_agent(
    State(state): State<AppState>,
    Query(params): Query<StartParams>,
) -> Result<Json<Value>, AppError> {
    let chat_id = params
        .chat_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("chat_id query parameter is required".to_string()))?;
    if chat_id.contains('/') {
        return Err(AppError::BadRequest("chat_id cannot contain '/'".to_string()));
    }

    state.supervisor.start(&chat_id).await?;

    if let Err(e) = record_chat(&state, &chat_id).await {
        // keep the launcher and the chats collection in agreement
        if let Err(stop_err) = state.supervisor.stop().await {
            error!(chat_id, error = %stop_err, "Failed to stop agent after store error");
        }
        return Err(e);
    }

    info!(chat_id, "Voice agent started");
    Ok(Json(json!({
        "message": "Voice agent started",
        "chat_id": chat_id,
    })))
}

async fn stop_agent(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let message = match state.supervisor.stop().await? {
        StopOutcome::Terminated => "Voice agent stopped",
        StopOutcome::Killed => "Voice agent forcefully stopped",
    };

    Ok(Json(json!({ "message": message })))
}

/// Set `chat_id` on the chat document without touching its other fields
async fn record_chat(state: &AppState, chat_id: &str) -> Result<(), AppError> {
    let mut fields = Document::new();
    fields.insert("chat_id".to_string(), FieldValue::String(chat_id.to_string()));

    state
        .store
        .merge_document(&state.chats_collection, chat_id, fields)
        .await?;

    Ok(())
}
