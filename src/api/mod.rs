//! HTTP API surface.

pub mod health;
pub mod payments;
pub mod webhooks;

use crate::health::HealthChecker;
use crate::services::PaymentService;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<PaymentService>,
    pub health: HealthChecker,
}

/// Build the application router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/payments",
            post(payments::create_payment).get(payments::list_payments),
        )
        .route("/api/payments/check-pending", post(payments::check_pending))
        .route("/api/payments/{id}", get(payments::get_payment))
        .route("/webhooks/{provider}", post(webhooks::handle_webhook))
        .route("/api/webhooks/sign", post(webhooks::sign_payload))
        .route("/api/webhooks/logs", get(webhooks::list_webhook_logs))
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .route("/health/live", get(health::liveness))
        .with_state(state)
}
