//! Service-level integration tests. These need a running PostgreSQL with
//! DATABASE_URL set, so they are ignored by default:
//!
//!   cargo test --test payment_service_tests -- --ignored

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use http::HeaderMap;
use paygate_backend::payments::error::{PaymentError, PaymentResult};
use paygate_backend::payments::provider::PaymentProvider;
use paygate_backend::payments::registry::ProviderRegistry;
use paygate_backend::payments::types::{
    CreatePaymentRequest, PaymentStatus, PaymentType, ProviderConfig, ProviderKind,
    ProviderPayment, ProviderStatus, StatusLookup, WebhookEvent, WebhookVerification,
};
use paygate_backend::services::PaymentService;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Scripted provider: creation echoes the idempotency key, status polls
/// return a fixed status, webhooks are accepted verbatim from the body.
struct ScriptedProvider {
    poll_status: PaymentStatus,
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nowpayments
    }

    async fn initialize(&self, _config: ProviderConfig) -> PaymentResult<()> {
        Ok(())
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<ProviderPayment> {
        Ok(ProviderPayment {
            external_id: format!("ext-{}", request.idempotency_key),
            status: PaymentStatus::Pending,
            pay_address: Some("pay-address".to_string()),
            pay_amount: Some(request.amount.clone()),
            pay_currency: Some("usdttrc20".to_string()),
            invoice_url: None,
            expires_at: None,
            raw: json!({"mock": true}),
        })
    }

    async fn get_payment_status(&self, external_id: &str) -> PaymentResult<ProviderStatus> {
        Ok(ProviderStatus {
            external_id: external_id.to_string(),
            status: self.poll_status,
            received_amount: Some(BigDecimal::from(10)),
            received_currency: Some("usdttrc20".to_string()),
            pay_amount: None,
            raw: json!({"mock_poll": true}),
        })
    }

    async fn verify_webhook(
        &self,
        body: &[u8],
        _headers: &HeaderMap,
    ) -> PaymentResult<WebhookVerification> {
        let payload: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => return Ok(WebhookVerification::rejected(None, "invalid payload")),
        };
        let external_id = payload
            .get("external_id")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        let status = payload
            .get("status")
            .and_then(|v| v.as_str())
            .and_then(|v| v.parse().ok());
        let decimal = |key: &str| -> Option<BigDecimal> {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|v| v.parse().ok())
        };
        let received_currency = payload
            .get("received_currency")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        Ok(WebhookVerification::accepted(
            WebhookEvent {
                provider: ProviderKind::Nowpayments,
                event_type: "payment.update".to_string(),
                external_id,
                status,
                received_amount: decimal("received_amount"),
                received_currency,
                pay_amount: decimal("pay_amount"),
                payload,
            },
            Some(true),
        ))
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        provider_status.parse().unwrap_or(PaymentStatus::Pending)
    }
}

/// Adapter whose webhook verification dies mid-flight, the way a remote
/// verify endpoint outage looks to the engine.
struct OutageProvider;

#[async_trait]
impl PaymentProvider for OutageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nowpayments
    }

    async fn initialize(&self, _config: ProviderConfig) -> PaymentResult<()> {
        Ok(())
    }

    async fn create_payment(
        &self,
        _request: &CreatePaymentRequest,
    ) -> PaymentResult<ProviderPayment> {
        unreachable!("not exercised")
    }

    async fn get_payment_status(&self, _external_id: &str) -> PaymentResult<ProviderStatus> {
        unreachable!("not exercised")
    }

    async fn verify_webhook(
        &self,
        _body: &[u8],
        _headers: &HeaderMap,
    ) -> PaymentResult<WebhookVerification> {
        Err(PaymentError::ProviderError {
            provider: "nowpayments".to_string(),
            message: "verify endpoint unreachable".to_string(),
            provider_code: None,
            retryable: true,
        })
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        provider_status.parse().unwrap_or(PaymentStatus::Pending)
    }
}

async fn setup_with_provider(
    provider: Arc<dyn PaymentProvider>,
) -> (Arc<PaymentService>, PgPool) {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.expect("database reachable");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations apply");

    let registry = Arc::new(ProviderRegistry::new());
    registry
        .register(
            provider,
            ProviderConfig {
                api_key: "test".to_string(),
                api_secret: None,
                webhook_secret: None,
                sandbox_mode: true,
            },
        )
        .await
        .expect("registration succeeds");

    (
        Arc::new(PaymentService::new(pool.clone(), registry, None)),
        pool,
    )
}

async fn setup(poll_status: PaymentStatus) -> (Arc<PaymentService>, PgPool) {
    setup_with_provider(Arc::new(ScriptedProvider { poll_status })).await
}

/// Pull the audit row carrying the given payload nonce. Tests run against a
/// shared database, so rows are matched by content rather than recency.
async fn find_log_by_nonce(
    service: &PaymentService,
    nonce: &str,
) -> paygate_backend::database::webhook_log_repository::WebhookLog {
    service
        .webhook_logs(Some("nowpayments"), Some(false), 100, 0)
        .await
        .expect("logs listed")
        .into_iter()
        .find(|log| log.payload.get("nonce").and_then(|v| v.as_str()) == Some(nonce))
        .expect("audit row written")
}

fn request(key: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        provider: ProviderKind::Nowpayments,
        idempotency_key: key.to_string(),
        amount: BigDecimal::from(25),
        currency: "USD".to_string(),
        pay_currency: Some("usdttrc20".to_string()),
        order_id: Some("order-1".to_string()),
        order_description: None,
        outcome_address: None,
        outcome_currency: None,
        user_id: Some("user-1".to_string()),
        project_id: None,
        payment_type: PaymentType::OneTime,
        success_url: None,
        cancel_url: None,
        ipn_callback_url: None,
        metadata: None,
    }
}

#[tokio::test]
#[ignore] // Requires database running
async fn create_payment_is_idempotent_on_key() {
    let (service, _pool) = setup(PaymentStatus::Pending).await;
    let key = Uuid::new_v4().to_string();

    let (first, created_first) = service.create_payment(request(&key)).await.expect("creates");
    assert!(created_first);
    assert_eq!(first.status, "pending");
    assert_eq!(first.external_id.as_deref(), Some(&*format!("ext-{}", key)));

    let (second, created_second) = service.create_payment(request(&key)).await.expect("replays");
    assert!(!created_second);
    assert_eq!(second.id, first.id);
}

#[tokio::test]
#[ignore] // Requires database running
async fn lookup_resolves_by_any_reference() {
    let (service, _pool) = setup(PaymentStatus::Pending).await;
    let key = Uuid::new_v4().to_string();
    let (created, _) = service.create_payment(request(&key)).await.expect("creates");

    let by_id = service
        .get_payment_status(&StatusLookup {
            id: Some(created.id),
            external_id: None,
            idempotency_key: None,
        })
        .await
        .expect("found by id");
    assert_eq!(by_id.id, created.id);

    let by_external = service
        .get_payment_status(&StatusLookup {
            id: None,
            external_id: created.external_id.clone(),
            idempotency_key: None,
        })
        .await
        .expect("found by external id");
    assert_eq!(by_external.id, created.id);

    let by_key = service
        .get_payment_status(&StatusLookup {
            id: None,
            external_id: None,
            idempotency_key: Some(key),
        })
        .await
        .expect("found by idempotency key");
    assert_eq!(by_key.id, created.id);
}

#[tokio::test]
#[ignore] // Requires database running
async fn refresh_applies_polled_status_and_stamps_completion() {
    let (service, _pool) = setup(PaymentStatus::Finished).await;
    let key = Uuid::new_v4().to_string();
    let (created, _) = service.create_payment(request(&key)).await.expect("creates");
    assert!(created.completed_at.is_none());

    let refreshed = service
        .refresh_payment_status(created.id)
        .await
        .expect("refresh succeeds");
    assert_eq!(refreshed.status, "finished");
    assert!(refreshed.completed_at.is_some());
    assert!(refreshed.last_status_check_at.is_some());

    // Terminal rows are left alone on the next refresh.
    let again = service
        .refresh_payment_status(created.id)
        .await
        .expect("refresh is a no-op");
    assert_eq!(again.completed_at, refreshed.completed_at);
}

#[tokio::test]
#[ignore] // Requires database running
async fn refund_observed_by_polling_stamps_completion() {
    let (service, _pool) = setup(PaymentStatus::Refunded).await;
    let key = Uuid::new_v4().to_string();
    let (created, _) = service.create_payment(request(&key)).await.expect("creates");

    let refreshed = service
        .refresh_payment_status(created.id)
        .await
        .expect("refresh succeeds");
    assert_eq!(refreshed.status, "refunded");
    assert!(refreshed.completed_at.is_some());
}

#[tokio::test]
#[ignore] // Requires database running
async fn webhook_updates_payment_and_audit_log() {
    let (service, _pool) = setup(PaymentStatus::Pending).await;
    let key = Uuid::new_v4().to_string();
    let (created, _) = service.create_payment(request(&key)).await.expect("creates");

    let body = serde_json::to_vec(&json!({
        "external_id": created.external_id,
        "status": "finished"
    }))
    .expect("serializes");

    let outcome = service
        .process_webhook("nowpayments", &body, &HeaderMap::new(), Some("10.0.0.1"))
        .await
        .expect("webhook processed");
    assert!(outcome.processed);
    assert_eq!(outcome.transaction_id, Some(created.id));
    assert_eq!(outcome.status.as_deref(), Some("finished"));

    let updated = service
        .get_payment_status(&StatusLookup {
            id: Some(created.id),
            external_id: None,
            idempotency_key: None,
        })
        .await
        .expect("found");
    assert_eq!(updated.webhook_count, 1);
    assert!(updated.completed_at.is_some());
}

#[tokio::test]
#[ignore] // Requires database running
async fn webhook_persists_received_money_and_pay_amount() {
    let (service, _pool) = setup(PaymentStatus::Pending).await;
    let key = Uuid::new_v4().to_string();
    let (created, _) = service.create_payment(request(&key)).await.expect("creates");

    let body = serde_json::to_vec(&json!({
        "external_id": created.external_id,
        "status": "partially_paid",
        "received_amount": "9.5",
        "received_currency": "usdttrc20",
        "pay_amount": "25"
    }))
    .expect("serializes");

    service
        .process_webhook("nowpayments", &body, &HeaderMap::new(), None)
        .await
        .expect("webhook processed");

    let updated = service
        .get_payment_status(&StatusLookup {
            id: Some(created.id),
            external_id: None,
            idempotency_key: None,
        })
        .await
        .expect("found");
    assert_eq!(updated.received_amount, "9.5".parse().ok());
    assert_eq!(updated.received_currency.as_deref(), Some("usdttrc20"));
    assert_eq!(updated.pay_amount, "25".parse().ok());
}

#[tokio::test]
#[ignore] // Requires database running
async fn webhook_for_unknown_payment_is_acknowledged_but_unprocessed() {
    let (service, _pool) = setup(PaymentStatus::Pending).await;
    let nonce = Uuid::new_v4().to_string();

    let body = serde_json::to_vec(&json!({
        "external_id": format!("ext-{}", Uuid::new_v4()),
        "status": "finished",
        "nonce": nonce
    }))
    .expect("serializes");

    let outcome = service
        .process_webhook("nowpayments", &body, &HeaderMap::new(), None)
        .await
        .expect("delivery audited");
    assert!(!outcome.processed);
    let error = outcome.error.expect("rejection reason recorded");
    assert!(error.starts_with("Transaction not found for external ID:"));

    // The audit row keeps processed_at empty: nothing was matched.
    let log = find_log_by_nonce(&service, &nonce).await;
    assert!(!log.processed);
    assert!(log.processed_at.is_none());
}

#[tokio::test]
#[ignore] // Requires database running
async fn verification_error_still_writes_audit_row() {
    let (service, _pool) = setup_with_provider(Arc::new(OutageProvider)).await;
    let nonce = Uuid::new_v4().to_string();
    let body = serde_json::to_vec(&json!({ "nonce": nonce })).expect("serializes");

    let outcome = service
        .process_webhook("nowpayments", &body, &HeaderMap::new(), Some("10.0.0.9"))
        .await
        .expect("delivery acked despite verification outage");
    assert!(!outcome.processed);
    assert!(outcome
        .error
        .as_deref()
        .expect("rejection reason recorded")
        .contains("verification errored"));

    let log = find_log_by_nonce(&service, &nonce).await;
    assert!(!log.processed);
    assert_eq!(log.signature_valid, None);
    assert!(log.error.as_deref().unwrap_or("").contains("verification errored"));
}

#[tokio::test]
#[ignore] // Requires database running
async fn pending_sweep_reports_updates() {
    let (service, _pool) = setup(PaymentStatus::Finished).await;
    let key = Uuid::new_v4().to_string();
    let (_created, _) = service.create_payment(request(&key)).await.expect("creates");

    // Cutoff of zero minutes makes the fresh row immediately eligible.
    let report = service
        .check_pending_payments(None, 0, 500)
        .await
        .expect("sweep runs");
    assert!(report.checked >= 1);
    assert!(report.updated >= 1);
}

#[tokio::test]
#[ignore] // Requires database running
async fn sweep_provider_filter_skips_other_providers() {
    let (service, _pool) = setup(PaymentStatus::Finished).await;
    let key = Uuid::new_v4().to_string();
    let (created, _) = service.create_payment(request(&key)).await.expect("creates");

    // Filtered to the other provider, the fresh row stays untouched.
    service
        .check_pending_payments(Some(ProviderKind::Paypal), 0, 500)
        .await
        .expect("filtered sweep runs");
    let untouched = service
        .get_payment_status(&StatusLookup {
            id: Some(created.id),
            external_id: None,
            idempotency_key: None,
        })
        .await
        .expect("found");
    assert_eq!(untouched.status, "pending");
    assert!(untouched.last_status_check_at.is_none());

    // Filtered to its own provider, the row is swept.
    service
        .check_pending_payments(Some(ProviderKind::Nowpayments), 0, 500)
        .await
        .expect("filtered sweep runs");
    let swept = service
        .get_payment_status(&StatusLookup {
            id: Some(created.id),
            external_id: None,
            idempotency_key: None,
        })
        .await
        .expect("found");
    assert_eq!(swept.status, "finished");
}
