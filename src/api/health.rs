use crate::api::ApiState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

/// GET /health
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// GET /health/ready. The service can take traffic only when its
/// dependencies answer.
pub async fn readiness(State(state): State<ApiState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// GET /health/live. Process liveness only.
pub async fn liveness(State(state): State<ApiState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.check_liveness()))
}
