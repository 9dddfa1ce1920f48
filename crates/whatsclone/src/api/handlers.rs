//! HTTP request handlers.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::store::{Conversation, StoredMessage};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Connection status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connected: bool,
    /// Epoch milliseconds at the time of the request.
    pub timestamp: i64,
}

/// Whether the protocol session is currently open.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        connected: state.status.is_connected(),
        timestamp: crate::now_millis(),
    })
}

/// List local conversations, most recent first.
pub async fn list_conversations(State(state): State<AppState>) -> ApiResult<Json<Vec<Conversation>>> {
    Ok(Json(state.store.list_conversations().await?))
}

/// List a conversation's messages, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Vec<StoredMessage>>> {
    if state.store.get_conversation(&conversation_id).await?.is_none() {
        return Err(ApiError::not_found(format!(
            "conversation {conversation_id}"
        )));
    }
    Ok(Json(state.store.list_messages(&conversation_id).await?))
}
