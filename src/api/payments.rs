use crate::api::ApiState;
use crate::database::transaction_repository::PaymentTransaction;
use crate::error::AppError;
use crate::middleware::get_request_id_from_headers;
use crate::payments::types::{CreatePaymentRequest, ProviderKind, StatusLookup};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Client-facing view of a payment.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: i64,
    pub idempotency_key: String,
    pub external_id: Option<String>,
    pub provider: String,
    pub payment_type: String,
    pub status: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub pay_amount: Option<BigDecimal>,
    pub pay_currency: Option<String>,
    pub pay_address: Option<String>,
    pub received_amount: Option<BigDecimal>,
    pub received_currency: Option<String>,
    pub invoice_url: Option<String>,
    pub order_id: Option<String>,
    pub order_description: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub webhook_count: i32,
    pub last_webhook_at: Option<DateTime<Utc>>,
    pub last_status_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PaymentTransaction> for PaymentResponse {
    fn from(tx: PaymentTransaction) -> Self {
        Self {
            id: tx.id,
            idempotency_key: tx.idempotency_key,
            external_id: tx.external_id,
            provider: tx.provider,
            payment_type: tx.payment_type,
            status: tx.status,
            amount: tx.amount,
            currency: tx.currency,
            pay_amount: tx.pay_amount,
            pay_currency: tx.pay_currency,
            pay_address: tx.pay_address,
            received_amount: tx.received_amount,
            received_currency: tx.received_currency,
            invoice_url: tx.invoice_url,
            order_id: tx.order_id,
            order_description: tx.order_description,
            user_id: tx.user_id,
            project_id: tx.project_id,
            webhook_count: tx.webhook_count,
            last_webhook_at: tx.last_webhook_at,
            last_status_check_at: tx.last_status_check_at,
            last_error: tx.last_error,
            confirmed_at: tx.confirmed_at,
            completed_at: tx.completed_at,
            expires_at: tx.expires_at,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// POST /api/payments
pub async fn create_payment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = get_request_id_from_headers(&headers);

    let (payment, created) = state.service.create_payment(request).await.map_err(|e| {
        let app: AppError = e.into();
        match &request_id {
            Some(id) => app.with_request_id(id.clone()),
            None => app,
        }
    })?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(PaymentResponse::from(payment))))
}

#[derive(Debug, Deserialize)]
pub struct GetPaymentQuery {
    #[serde(default)]
    pub refresh: bool,
    pub idempotency_key: Option<String>,
}

/// GET /api/payments/{id}
///
/// The path segment is the internal id when numeric, otherwise a provider
/// reference. `?idempotency_key=` offers a third lookup, `?refresh=true`
/// pulls the provider's current status before responding.
pub async fn get_payment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(query): Query<GetPaymentQuery>,
) -> Result<Json<PaymentResponse>, AppError> {
    let lookup = match id.parse::<i64>() {
        Ok(numeric) => StatusLookup {
            id: Some(numeric),
            external_id: Some(id),
            idempotency_key: query.idempotency_key,
        },
        Err(_) => StatusLookup {
            id: None,
            external_id: Some(id),
            idempotency_key: query.idempotency_key,
        },
    };

    let payment = state.service.get_payment_status(&lookup).await?;
    let payment = if query.refresh {
        state.service.refresh_payment_status(payment.id).await?
    } else {
        payment
    };

    Ok(Json(PaymentResponse::from(payment)))
}

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    pub provider: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/payments
pub async fn list_payments(
    State(state): State<ApiState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<PaymentResponse>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0).max(0);

    let payments = state
        .service
        .list_payments(
            query.provider.as_deref(),
            query.status.as_deref(),
            query.user_id.as_deref(),
            limit,
            offset,
        )
        .await?;

    Ok(Json(payments.into_iter().map(PaymentResponse::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CheckPendingQuery {
    pub provider: Option<String>,
    pub older_than_minutes: Option<i64>,
    pub limit: Option<i64>,
}

/// POST /api/payments/check-pending
pub async fn check_pending(
    State(state): State<ApiState>,
    Query(query): Query<CheckPendingQuery>,
) -> Result<impl IntoResponse, AppError> {
    let provider = query
        .provider
        .as_deref()
        .map(str::parse::<ProviderKind>)
        .transpose()?;
    let older_than = query.older_than_minutes.unwrap_or(5).max(0);
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    info!(
        provider = ?provider,
        older_than_minutes = older_than,
        limit,
        "manual pending sweep requested"
    );
    let report = state
        .service
        .check_pending_payments(provider, older_than, limit)
        .await?;
    Ok(Json(report))
}
