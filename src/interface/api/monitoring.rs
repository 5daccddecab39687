//! Liveness endpoint

use super::dto::{ApiResponse, HealthResponse};
use super::state::AppState;
use axum::{extract::State, Json};

pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let active_calls = state.manager.registry().len().await;
    Json(ApiResponse::success(HealthResponse {
        status: "OK".to_string(),
        active_calls,
    }))
}
