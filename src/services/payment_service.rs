use crate::database::transaction_repository::{
    NewPaymentTransaction, PaymentTransaction, TransactionRepository,
};
use crate::database::webhook_log_repository::{WebhookLog, WebhookLogRepository};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::registry::ProviderRegistry;
use crate::payments::signing;
use crate::payments::types::{
    CheckPendingReport, CreatePaymentRequest, ProviderKind, StatusLookup,
};
use chrono::{Duration as ChronoDuration, Utc};
use http::HeaderMap;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of processing one inbound webhook delivery. Expected failures
/// (bad signature, unmatched payment) come back with `processed: false`
/// rather than as errors, so the transport can still acknowledge receipt.
#[derive(Debug, Serialize)]
pub struct WebhookOutcome {
    pub processed: bool,
    pub transaction_id: Option<i64>,
    pub status: Option<String>,
    pub error: Option<String>,
}

impl WebhookOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            processed: false,
            transaction_id: None,
            status: None,
            error: Some(message.into()),
        }
    }
}

/// Orchestrates payment lifecycle across the registered provider adapters
/// and the transaction store. Constructed once at startup and shared via
/// `Arc`.
pub struct PaymentService {
    pool: PgPool,
    registry: Arc<ProviderRegistry>,
    transactions: TransactionRepository,
    webhook_logs: WebhookLogRepository,
    ipn_secret: Option<String>,
}

impl PaymentService {
    pub fn new(pool: PgPool, registry: Arc<ProviderRegistry>, ipn_secret: Option<String>) -> Self {
        Self {
            transactions: TransactionRepository::new(pool.clone()),
            webhook_logs: WebhookLogRepository::new(pool.clone()),
            pool,
            registry,
            ipn_secret,
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Register the crypto processor adapter from app configuration.
    pub async fn register_nowpayments(
        &self,
        config: &crate::config::NowPaymentsConfig,
    ) -> PaymentResult<()> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            PaymentError::validation("nowpayments api key is required", Some("api_key"))
        })?;
        let adapter = crate::payments::providers::NowPaymentsProvider::new(
            std::time::Duration::from_secs(30),
        )?;
        self.registry
            .register(
                Arc::new(adapter),
                crate::payments::types::ProviderConfig {
                    api_key,
                    api_secret: None,
                    webhook_secret: config.ipn_secret.clone(),
                    sandbox_mode: config.sandbox,
                },
            )
            .await
    }

    /// Register the card/wallet processor adapter from app configuration.
    pub async fn register_paypal(
        &self,
        config: &crate::config::PaypalConfig,
    ) -> PaymentResult<()> {
        let client_id = config.client_id.clone().ok_or_else(|| {
            PaymentError::validation("paypal client id is required", Some("client_id"))
        })?;
        let adapter = crate::payments::providers::PaypalProvider::new(
            std::time::Duration::from_secs(30),
        )?;
        self.registry
            .register(
                Arc::new(adapter),
                crate::payments::types::ProviderConfig {
                    api_key: client_id,
                    api_secret: config.client_secret.clone(),
                    webhook_secret: config.webhook_id.clone(),
                    sandbox_mode: config.sandbox,
                },
            )
            .await
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a payment with the requested provider. Idempotent on the
    /// idempotency key: a repeated key returns the already-created payment.
    /// Returns the row plus whether this call created it.
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> PaymentResult<(PaymentTransaction, bool)> {
        request.validate()?;

        // Fast path: the key was already used.
        if let Some(existing) = self
            .transactions
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            info!(
                payment_id = existing.id,
                idempotency_key = %request.idempotency_key,
                "returning existing payment for repeated idempotency key"
            );
            return Ok((existing, false));
        }

        let provider = self.registry.get(request.provider).await?;
        let payment = provider.create_payment(&request).await?;

        let new = NewPaymentTransaction {
            idempotency_key: request.idempotency_key.clone(),
            external_id: Some(payment.external_id.clone()),
            provider: request.provider.as_str().to_string(),
            payment_type: request.payment_type.as_str().to_string(),
            status: payment.status.as_str().to_string(),
            amount: request.amount.clone(),
            currency: request.currency.to_uppercase(),
            pay_amount: payment.pay_amount.clone(),
            pay_currency: payment.pay_currency.clone(),
            pay_address: payment.pay_address.clone(),
            outcome_address: request.outcome_address.clone(),
            outcome_currency: request.outcome_currency.clone(),
            invoice_url: payment.invoice_url.clone(),
            order_id: request.order_id.clone(),
            order_description: request.order_description.clone(),
            user_id: request.user_id.clone(),
            project_id: request.project_id.clone(),
            provider_metadata: json!({ "create_response": payment.raw }),
            client_metadata: request.metadata.clone(),
            expires_at: payment.expires_at,
        };

        let mut tx = self.pool.begin().await.map_err(|e| {
            PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
        })?;

        let (row, created) = match TransactionRepository::insert_if_absent(&mut *tx, &new).await? {
            Some(row) => (row, true),
            None => {
                // Lost the insert race; the winner's row is already visible.
                let winner =
                    TransactionRepository::find_by_idempotency_key_on(&mut *tx, &new.idempotency_key)
                        .await?
                        .ok_or_else(|| PaymentError::Internal {
                            message: "idempotency conflict without a winning row".to_string(),
                        })?;
                warn!(
                    payment_id = winner.id,
                    idempotency_key = %new.idempotency_key,
                    "concurrent creation detected; returning winning payment"
                );
                (winner, false)
            }
        };

        tx.commit().await.map_err(|e| {
            PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
        })?;

        if created {
            info!(
                payment_id = row.id,
                provider = %row.provider,
                external_id = ?row.external_id,
                "payment created"
            );
        }
        Ok((row, created))
    }

    // ------------------------------------------------------------------
    // Lookup and refresh
    // ------------------------------------------------------------------

    /// First-match lookup over internal id, provider reference, and
    /// idempotency key.
    pub async fn get_payment_status(
        &self,
        lookup: &StatusLookup,
    ) -> PaymentResult<PaymentTransaction> {
        if lookup.is_empty() {
            return Err(PaymentError::validation(
                "at least one lookup field is required",
                None,
            ));
        }

        if let Some(id) = lookup.id {
            if let Some(row) = self.transactions.find_by_id(id).await? {
                return Ok(row);
            }
        }
        if let Some(external_id) = &lookup.external_id {
            if let Some(row) = self.transactions.find_by_external_id_any(external_id).await? {
                return Ok(row);
            }
        }
        if let Some(key) = &lookup.idempotency_key {
            if let Some(row) = self.transactions.find_by_idempotency_key(key).await? {
                return Ok(row);
            }
        }

        Err(PaymentError::PaymentNotFound {
            reference: lookup.describe(),
        })
    }

    /// Pull the provider's current view of the payment and apply it.
    ///
    /// The provider call happens before the row lock is taken, so a slow
    /// processor never holds a database lock. Terminal payments and payments
    /// without a provider reference are returned unchanged.
    pub async fn refresh_payment_status(&self, id: i64) -> PaymentResult<PaymentTransaction> {
        let row = self
            .transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound {
                reference: format!("id={}", id),
            })?;

        if row.is_terminal() {
            return Ok(row);
        }
        let external_id = match &row.external_id {
            Some(id) => id.clone(),
            None => return Ok(row),
        };

        let kind = row.provider_kind()?;
        let provider = self.registry.get(kind).await?;
        let status = match provider.get_payment_status(&external_id).await {
            Ok(status) => status,
            Err(e) => {
                self.transactions.record_error(row.id, &e.to_string()).await?;
                return Err(e);
            }
        };

        let mut tx = self.pool.begin().await.map_err(|e| {
            PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
        })?;

        let locked = TransactionRepository::lock_by_id(&mut *tx, row.id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound {
                reference: format!("id={}", row.id),
            })?;
        if locked.is_terminal() {
            tx.commit().await.map_err(|e| {
                PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
            })?;
            return Ok(locked);
        }

        let updated = TransactionRepository::apply_refresh(
            &mut tx,
            locked.id,
            status.status.as_str(),
            status.received_amount.as_ref(),
            status.received_currency.as_deref(),
            status.pay_amount.as_ref(),
            &json!({ "last_status_response": status.raw }),
        )
        .await?;

        tx.commit().await.map_err(|e| {
            PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
        })?;

        if updated.status != row.status {
            info!(
                payment_id = updated.id,
                from = %row.status,
                to = %updated.status,
                "payment status updated from provider poll"
            );
        }
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Webhooks
    // ------------------------------------------------------------------

    /// Process one inbound webhook delivery.
    ///
    /// The audit row is written before any processing so every delivery
    /// leaves a trace, including rejected ones. An `Err` from this method
    /// means an internal fault; expected rejections are `Ok` outcomes with
    /// `processed: false`.
    pub async fn process_webhook(
        &self,
        provider: &str,
        body: &[u8],
        headers: &HeaderMap,
        source_ip: Option<&str>,
    ) -> PaymentResult<WebhookOutcome> {
        let kind: ProviderKind = provider.parse()?;
        let adapter = self.registry.get(kind).await?;

        // The audit row goes in before verification runs: for some providers
        // verification is itself a remote call, and a delivery that dies
        // there must still leave a trace.
        let payload: JsonValue = serde_json::from_slice(body).unwrap_or_else(|_| {
            json!({ "invalid_payload": String::from_utf8_lossy(body) })
        });
        let headers_json = headers_to_json(headers);
        let log = self
            .webhook_logs
            .insert(
                kind.as_str(),
                None,
                None,
                None,
                &payload,
                &headers_json,
                source_ip,
            )
            .await?;

        let verification = match adapter.verify_webhook(body, headers).await {
            Ok(verification) => verification,
            Err(e) => {
                let message = format!("webhook verification errored: {}", e);
                warn!(provider = %kind, log_id = log.id, error = %e, "webhook verification errored");
                self.webhook_logs.mark_failed(log.id, &message).await?;
                return Ok(WebhookOutcome::rejected(message));
            }
        };

        let (external_id, event_type) = match &verification.event {
            Some(event) => (event.external_id.clone(), Some(event.event_type.clone())),
            None => (None, None),
        };
        self.webhook_logs
            .record_verification(
                log.id,
                verification.signature_valid,
                external_id.as_deref(),
                event_type.as_deref(),
            )
            .await?;

        if !verification.valid {
            let message = verification
                .error
                .unwrap_or_else(|| "webhook rejected".to_string());
            warn!(provider = %kind, log_id = log.id, error = %message, "webhook rejected");
            self.webhook_logs.mark_failed(log.id, &message).await?;
            return Ok(WebhookOutcome::rejected(message));
        }

        let event = match verification.event {
            Some(event) => event,
            None => {
                let message = "webhook verified but carried no event";
                self.webhook_logs.mark_failed(log.id, message).await?;
                return Ok(WebhookOutcome::rejected(message));
            }
        };
        let external_id = match &event.external_id {
            Some(id) => id.clone(),
            None => {
                let message = "webhook missing payment reference";
                self.webhook_logs.mark_failed(log.id, message).await?;
                return Ok(WebhookOutcome::rejected(message));
            }
        };

        let mut tx = self.pool.begin().await.map_err(|e| {
            PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
        })?;

        let locked =
            TransactionRepository::lock_by_external_id(&mut *tx, kind.as_str(), &external_id)
                .await?;
        let locked = match locked {
            Some(row) => row,
            None => {
                drop(tx);
                let message = format!("Transaction not found for external ID: {}", external_id);
                warn!(provider = %kind, external_id = %external_id, "webhook for unknown payment");
                self.webhook_logs.mark_failed(log.id, &message).await?;
                return Ok(WebhookOutcome::rejected(message));
            }
        };

        // A late out-of-order delivery must not reopen a settled payment;
        // the delivery is still counted against the row.
        let effective_status = event.status.filter(|s| !(locked.is_terminal() && !s.is_terminal()));
        let status_str = effective_status.map(|s| s.as_str());

        let updated = TransactionRepository::apply_webhook(
            &mut tx,
            locked.id,
            status_str,
            event.received_amount.as_ref(),
            event.received_currency.as_deref(),
            event.pay_amount.as_ref(),
            &json!({ "last_webhook_event": event.payload }),
        )
        .await?;
        WebhookLogRepository::mark_processed(&mut *tx, log.id, updated.id).await?;

        tx.commit().await.map_err(|e| {
            PaymentError::Database(crate::database::error::DatabaseError::from_sqlx(e))
        })?;

        info!(
            payment_id = updated.id,
            provider = %kind,
            event_type = %event.event_type,
            status = %updated.status,
            "webhook applied"
        );
        Ok(WebhookOutcome {
            processed: true,
            transaction_id: Some(updated.id),
            status: Some(updated.status),
            error: None,
        })
    }

    // ------------------------------------------------------------------
    // Reconciliation sweep
    // ------------------------------------------------------------------

    /// Refresh every non-terminal payment whose last provider check is older
    /// than the cutoff. One failing payment never aborts the sweep.
    pub async fn check_pending_payments(
        &self,
        provider: Option<ProviderKind>,
        older_than_minutes: i64,
        batch_limit: i64,
    ) -> PaymentResult<CheckPendingReport> {
        let cutoff = Utc::now() - ChronoDuration::minutes(older_than_minutes);
        let rows = self
            .transactions
            .find_stale_pending(provider.map(|p| p.as_str()), cutoff, batch_limit)
            .await?;

        let mut report = CheckPendingReport {
            checked: rows.len(),
            updated: 0,
            errors: Vec::new(),
        };

        for row in rows {
            match self.refresh_payment_status(row.id).await {
                Ok(updated) => {
                    if updated.status != row.status {
                        report.updated += 1;
                    }
                }
                Err(e) => {
                    report.errors.push(format!("payment {}: {}", row.id, e));
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            errors = report.errors.len(),
            "pending payment sweep finished"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Listings and tooling
    // ------------------------------------------------------------------

    pub async fn list_payments(
        &self,
        provider: Option<&str>,
        status: Option<&str>,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> PaymentResult<Vec<PaymentTransaction>> {
        Ok(self
            .transactions
            .list(provider, status, user_id, limit, offset)
            .await?)
    }

    pub async fn webhook_logs(
        &self,
        provider: Option<&str>,
        processed: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> PaymentResult<Vec<WebhookLog>> {
        Ok(self
            .webhook_logs
            .list(provider, processed, limit, offset)
            .await?)
    }

    /// Sign an arbitrary payload with the supplied secret, falling back to
    /// the configured IPN secret. Testing aid for webhook integrations.
    pub fn sign_webhook_payload(
        &self,
        payload: &JsonValue,
        secret: Option<&str>,
    ) -> PaymentResult<String> {
        let secret = secret
            .or(self.ipn_secret.as_deref())
            .ok_or_else(|| {
                PaymentError::validation("no signing secret supplied or configured", Some("secret"))
            })?;
        signing::sign_payload(payload, secret)
    }
}

fn headers_to_json(headers: &HeaderMap) -> JsonValue {
    let map: serde_json::Map<String, JsonValue> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                JsonValue::String(String::from_utf8_lossy(value.as_bytes()).to_string()),
            )
        })
        .collect();
    JsonValue::Object(map)
}
