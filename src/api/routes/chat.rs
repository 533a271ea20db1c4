use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::state::AppState;
use crate::application::{ChatReply, ChatStats};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
}

/// Always answers 200; degraded replies carry `success: false`.
pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatReply> {
    let user_id = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("anon-{}", Uuid::new_v4()));
    let agent_id = request
        .agent_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| state.chat.default_agent_id().to_string());

    Json(
        state
            .chat
            .process(&user_id, &agent_id, &request.message)
            .await,
    )
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<ChatStats>, StatusCode> {
    state.chat.stats().map(Json).map_err(|e| {
        tracing::error!(error = %e, "Failed to read chat stats");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
