use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::state::AppState;
use crate::domain::{ConversationOverview, ConversationRecord, ConversationSummary, DomainError};

fn internal(e: DomainError) -> StatusCode {
    tracing::error!(error = %e, "Conversation store unavailable");
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationOverview>>, StatusCode> {
    state.chat.conversations().map(Json).map_err(internal)
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(String, String)>,
) -> Result<Json<ConversationRecord>, StatusCode> {
    match state.chat.conversation(&user_id, &agent_id).map_err(internal)? {
        Some(record) => Ok(Json(record)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(String, String)>,
) -> StatusCode {
    match state.chat.clear_conversation(&user_id, &agent_id) {
        Ok(true) => {
            tracing::info!(user_id, agent_id, "Conversation cleared");
            StatusCode::NO_CONTENT
        }
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => internal(e),
    }
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path((user_id, agent_id)): Path<(String, String)>,
) -> Result<Json<ConversationSummary>, StatusCode> {
    state
        .chat
        .conversation_summary(&user_id, &agent_id)
        .map(Json)
        .map_err(internal)
}
