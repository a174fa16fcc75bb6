use crate::api::ApiState;
use crate::database::webhook_log_repository::WebhookLog;
use crate::error::AppError;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

/// POST /webhooks/{provider}
///
/// Always acknowledges with 200 for expected outcomes so the processor does
/// not retry deliveries we have already audited. 404 means the provider
/// segment is unknown; 5xx means the audit row could not be written.
pub async fn handle_webhook(
    State(state): State<ApiState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!(provider = %provider, bytes = body.len(), "Received webhook");

    let source_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    let outcome = state
        .service
        .process_webhook(&provider, &body, &headers, source_ip.as_deref())
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub payload: JsonValue,
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
    pub signature: String,
}

/// POST /api/webhooks/sign
///
/// Testing aid: produce the sorted-key HMAC-SHA512 signature a webhook for
/// this payload would carry.
pub async fn sign_payload(
    State(state): State<ApiState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, AppError> {
    let signature = state
        .service
        .sign_webhook_payload(&request.payload, request.secret.as_deref())?;
    Ok(Json(SignResponse { signature }))
}

/// Client-facing view of a webhook audit row.
#[derive(Debug, Serialize)]
pub struct WebhookLogResponse {
    pub id: i64,
    pub provider: String,
    pub transaction_id: Option<i64>,
    pub external_id: Option<String>,
    pub event_type: Option<String>,
    pub signature_valid: Option<bool>,
    pub processed: bool,
    pub error: Option<String>,
    pub source_ip: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<WebhookLog> for WebhookLogResponse {
    fn from(log: WebhookLog) -> Self {
        Self {
            id: log.id,
            provider: log.provider,
            transaction_id: log.transaction_id,
            external_id: log.external_id,
            event_type: log.event_type,
            signature_valid: log.signature_valid,
            processed: log.processed,
            error: log.error,
            source_ip: log.source_ip,
            received_at: log.received_at,
            processed_at: log.processed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    pub provider: Option<String>,
    pub processed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/webhooks/logs
pub async fn list_webhook_logs(
    State(state): State<ApiState>,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<Vec<WebhookLogResponse>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let logs = state
        .service
        .webhook_logs(query.provider.as_deref(), query.processed, limit, offset)
        .await?;

    Ok(Json(logs.into_iter().map(WebhookLogResponse::from).collect()))
}
