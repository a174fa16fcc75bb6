use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::PaymentHttpClient;
use crate::payments::provider::PaymentProvider;
use crate::payments::signing::verify_signature;
use crate::payments::types::{
    CreatePaymentRequest, PaymentStatus, ProviderConfig, ProviderKind, ProviderPayment,
    ProviderStatus, WebhookEvent, WebhookVerification,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const LIVE_BASE_URL: &str = "https://api.nowpayments.io";
const SANDBOX_BASE_URL: &str = "https://api-sandbox.nowpayments.io";
const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

/// Crypto processor adapter. Authenticates with an `x-api-key` header and
/// signs IPN callbacks with HMAC-SHA512 over the key-sorted JSON payload.
pub struct NowPaymentsProvider {
    http: PaymentHttpClient,
    config: RwLock<Option<ProviderConfig>>,
}

impl NowPaymentsProvider {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        Ok(Self {
            http: PaymentHttpClient::new(timeout)?,
            config: RwLock::new(None),
        })
    }

    async fn config(&self) -> PaymentResult<ProviderConfig> {
        self.config
            .read()
            .await
            .clone()
            .ok_or(PaymentError::ProviderNotConfigured {
                provider: self.kind().to_string(),
            })
    }

    fn base_url(config: &ProviderConfig) -> &'static str {
        if config.sandbox_mode {
            SANDBOX_BASE_URL
        } else {
            LIVE_BASE_URL
        }
    }

    fn provider_error(&self, message: String) -> PaymentError {
        PaymentError::ProviderError {
            provider: self.kind().to_string(),
            message,
            provider_code: None,
            retryable: false,
        }
    }

    fn extract_event(&self, payload: JsonValue) -> WebhookEvent {
        let external_id = payload
            .get("payment_id")
            .map(json_value_to_string)
            .filter(|v| !v.is_empty());
        let status = payload
            .get("payment_status")
            .and_then(|v| v.as_str())
            .map(|s| self.map_status(s));
        let received_amount = payload.get("actually_paid").and_then(json_to_decimal);
        // actually_paid is denominated in the crypto pay currency, not the
        // requested price currency.
        let received_currency = payload
            .get("pay_currency")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let pay_amount = payload.get("pay_amount").and_then(json_to_decimal);

        WebhookEvent {
            provider: self.kind(),
            event_type: status
                .map(|s| format!("payment.{}", s))
                .unwrap_or_else(|| "payment.update".to_string()),
            external_id,
            status,
            received_amount,
            received_currency,
            pay_amount,
            payload,
        }
    }
}

#[async_trait]
impl PaymentProvider for NowPaymentsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Nowpayments
    }

    async fn initialize(&self, config: ProviderConfig) -> PaymentResult<()> {
        if config.api_key.trim().is_empty() {
            return Err(PaymentError::validation(
                "nowpayments api_key is required",
                Some("api_key"),
            ));
        }
        if config.webhook_secret.is_none() {
            warn!("nowpayments initialized without an IPN secret; webhook signatures will not be verified");
        }
        *self.config.write().await = Some(config);
        Ok(())
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<ProviderPayment> {
        let config = self.config().await?;

        let mut body = serde_json::json!({
            "price_amount": request.amount.to_string(),
            "price_currency": request.currency,
        });
        if let Some(pay_currency) = &request.pay_currency {
            body["pay_currency"] = serde_json::json!(pay_currency);
        }
        if let Some(order_id) = &request.order_id {
            body["order_id"] = serde_json::json!(order_id);
        }
        if let Some(description) = &request.order_description {
            body["order_description"] = serde_json::json!(description);
        }
        if let Some(callback) = &request.ipn_callback_url {
            body["ipn_callback_url"] = serde_json::json!(callback);
        }
        if let Some(success_url) = &request.success_url {
            body["success_url"] = serde_json::json!(success_url);
        }
        if let Some(cancel_url) = &request.cancel_url {
            body["cancel_url"] = serde_json::json!(cancel_url);
        }
        if let Some(address) = &request.outcome_address {
            body["payout_address"] = serde_json::json!(address);
        }
        if let Some(currency) = &request.outcome_currency {
            body["payout_currency"] = serde_json::json!(currency);
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &format!("{}/v1/payment", Self::base_url(&config)),
                None,
                Some(&body),
                &[
                    ("x-api-key", config.api_key.as_str()),
                    ("Content-Type", "application/json"),
                ],
            )
            .await?;

        let created: NowPaymentsPayment = serde_json::from_value(raw.clone())
            .map_err(|e| self.provider_error(format!("unexpected payment response: {}", e)))?;

        let external_id = json_value_to_string(&created.payment_id);
        if external_id.is_empty() {
            return Err(self.provider_error("payment response missing payment_id".to_string()));
        }
        info!(external_id = %external_id, "nowpayments payment created");

        Ok(ProviderPayment {
            external_id,
            status: self.map_status(created.payment_status.as_deref().unwrap_or("")),
            pay_address: created.pay_address,
            pay_amount: created.pay_amount.as_ref().and_then(json_to_decimal),
            pay_currency: created.pay_currency,
            invoice_url: created.invoice_url,
            expires_at: created
                .expiration_estimate_date
                .as_deref()
                .and_then(parse_timestamp),
            raw,
        })
    }

    async fn get_payment_status(&self, external_id: &str) -> PaymentResult<ProviderStatus> {
        let config = self.config().await?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &format!("{}/v1/payment/{}", Self::base_url(&config), external_id),
                None,
                None,
                &[("x-api-key", config.api_key.as_str())],
            )
            .await?;

        let status = raw
            .get("payment_status")
            .and_then(|v| v.as_str())
            .map(|s| self.map_status(s))
            .ok_or_else(|| self.provider_error("status response missing payment_status".to_string()))?;

        Ok(ProviderStatus {
            external_id: external_id.to_string(),
            status,
            received_amount: raw.get("actually_paid").and_then(json_to_decimal),
            received_currency: raw
                .get("pay_currency")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            pay_amount: raw.get("pay_amount").and_then(json_to_decimal),
            raw,
        })
    }

    async fn verify_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> PaymentResult<WebhookVerification> {
        let config = self.config().await?;

        let payload: JsonValue = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => {
                return Ok(WebhookVerification::rejected(
                    None,
                    "webhook payload is not valid JSON",
                ))
            }
        };

        let secret = match config.webhook_secret.as_deref() {
            Some(secret) => secret,
            None => {
                warn!("nowpayments IPN secret not configured; accepting webhook without signature verification");
                return Ok(WebhookVerification::accepted(
                    self.extract_event(payload),
                    None,
                ));
            }
        };

        let signature = match headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) {
            Some(sig) if !sig.trim().is_empty() => sig,
            _ => {
                return Ok(WebhookVerification::rejected(
                    Some(false),
                    "missing webhook signature header",
                ))
            }
        };

        if !verify_signature(body, secret, signature) {
            return Ok(WebhookVerification::rejected(
                Some(false),
                "webhook signature verification failed",
            ));
        }

        Ok(WebhookVerification::accepted(
            self.extract_event(payload),
            Some(true),
        ))
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status.trim().to_lowercase().as_str() {
            "waiting" => PaymentStatus::Pending,
            "confirming" => PaymentStatus::Confirming,
            "confirmed" => PaymentStatus::Confirmed,
            "sending" => PaymentStatus::Sending,
            "partially_paid" => PaymentStatus::PartiallyPaid,
            "finished" => PaymentStatus::Finished,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            "expired" => PaymentStatus::Expired,
            _ => PaymentStatus::Pending,
        }
    }
}

fn json_value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn json_to_decimal(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::String(s) => BigDecimal::from_str(s).ok(),
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct NowPaymentsPayment {
    payment_id: JsonValue,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    pay_address: Option<String>,
    #[serde(default)]
    pay_amount: Option<JsonValue>,
    #[serde(default)]
    pay_currency: Option<String>,
    #[serde(default)]
    invoice_url: Option<String>,
    #[serde(default)]
    expiration_estimate_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signing::sign_payload;
    use http::HeaderValue;
    use serde_json::json;

    async fn provider(webhook_secret: Option<&str>) -> NowPaymentsProvider {
        let provider = NowPaymentsProvider::new(Duration::from_secs(5)).expect("client builds");
        provider
            .initialize(ProviderConfig {
                api_key: "test-key".to_string(),
                api_secret: None,
                webhook_secret: webhook_secret.map(|s| s.to_string()),
                sandbox_mode: true,
            })
            .await
            .expect("initialize succeeds");
        provider
    }

    fn signed_headers(payload: &JsonValue, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let signature = sign_payload(payload, secret).expect("signs");
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&signature).expect("valid header"),
        );
        headers
    }

    #[tokio::test]
    async fn status_mapping_covers_known_and_unknown_values() {
        let provider = provider(Some("sec")).await;
        assert_eq!(provider.map_status("waiting"), PaymentStatus::Pending);
        assert_eq!(provider.map_status("FINISHED"), PaymentStatus::Finished);
        assert_eq!(
            provider.map_status("partially_paid"),
            PaymentStatus::PartiallyPaid
        );
        assert_eq!(provider.map_status("refunded"), PaymentStatus::Refunded);
        // Unknown provider statuses degrade to pending instead of erroring.
        assert_eq!(provider.map_status("brand_new_state"), PaymentStatus::Pending);
        assert_eq!(provider.map_status(""), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn webhook_with_valid_signature_is_accepted() {
        let provider = provider(Some("ipn-secret")).await;
        let payload = json!({
            "payment_id": 4987459,
            "payment_status": "finished",
            "actually_paid": "0.0213",
            "pay_amount": "0.0213"
        });
        let body = serde_json::to_vec(&payload).expect("serializes");
        let headers = signed_headers(&payload, "ipn-secret");

        let verification = provider
            .verify_webhook(&body, &headers)
            .await
            .expect("verification runs");
        assert!(verification.valid);
        assert_eq!(verification.signature_valid, Some(true));
        let event = verification.event.expect("event extracted");
        assert_eq!(event.external_id.as_deref(), Some("4987459"));
        assert_eq!(event.status, Some(PaymentStatus::Finished));
    }

    #[tokio::test]
    async fn received_amount_carries_the_pay_currency() {
        let provider = provider(Some("ipn-secret")).await;
        let payload = json!({
            "payment_id": 11,
            "payment_status": "finished",
            "actually_paid": "0.0213",
            "pay_currency": "btc",
            "price_currency": "usd"
        });
        let body = serde_json::to_vec(&payload).expect("serializes");
        let headers = signed_headers(&payload, "ipn-secret");

        let event = provider
            .verify_webhook(&body, &headers)
            .await
            .expect("verification runs")
            .event
            .expect("event extracted");
        assert_eq!(event.received_currency.as_deref(), Some("btc"));
        assert_eq!(event.received_amount, BigDecimal::from_str("0.0213").ok());
    }

    #[tokio::test]
    async fn webhook_with_wrong_signature_is_rejected_with_generic_error() {
        let provider = provider(Some("ipn-secret")).await;
        let payload = json!({"payment_id": 1, "payment_status": "finished"});
        let body = serde_json::to_vec(&payload).expect("serializes");
        let headers = signed_headers(&payload, "other-secret");

        let verification = provider
            .verify_webhook(&body, &headers)
            .await
            .expect("verification runs");
        assert!(!verification.valid);
        assert_eq!(verification.signature_valid, Some(false));
        // The rejection reason must never include the computed digest.
        assert_eq!(
            verification.error.as_deref(),
            Some("webhook signature verification failed")
        );
    }

    #[tokio::test]
    async fn webhook_without_secret_is_accepted_but_flagged_unknown() {
        let provider = provider(None).await;
        let payload = json!({"payment_id": 2, "payment_status": "confirmed"});
        let body = serde_json::to_vec(&payload).expect("serializes");

        let verification = provider
            .verify_webhook(&body, &HeaderMap::new())
            .await
            .expect("verification runs");
        assert!(verification.valid);
        assert_eq!(verification.signature_valid, None);
    }

    #[tokio::test]
    async fn malformed_webhook_payload_fails_closed() {
        let provider = provider(Some("ipn-secret")).await;
        let verification = provider
            .verify_webhook(b"{not json", &HeaderMap::new())
            .await
            .expect("verification runs");
        assert!(!verification.valid);
    }

    #[test]
    fn decimal_extraction_handles_strings_and_numbers() {
        assert_eq!(
            json_to_decimal(&json!("1.25")),
            BigDecimal::from_str("1.25").ok()
        );
        assert_eq!(json_to_decimal(&json!(3)), Some(BigDecimal::from(3)));
        assert_eq!(json_to_decimal(&json!(null)), None);
    }
}
