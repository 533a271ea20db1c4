use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::api::state::AppState;
use crate::infrastructure::{CircuitSnapshot, CircuitState};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub model: String,
    pub llm_circuit: CircuitSnapshot,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Not ready while the model circuit is open.
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let snapshot = match state.chat.breaker_snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(error = %e, "Failed to read circuit state");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let is_ready = snapshot.state != CircuitState::Open;
    let response = ReadinessResponse {
        status: if is_ready { "ready" } else { "not_ready" }.into(),
        model: state.config.llm.model.clone(),
        llm_circuit: snapshot,
    };

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}
