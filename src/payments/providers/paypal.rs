use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::http::PaymentHttpClient;
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CreatePaymentRequest, PaymentStatus, ProviderConfig, ProviderKind, ProviderPayment,
    ProviderStatus, WebhookEvent, WebhookVerification,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use http::HeaderMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const LIVE_BASE_URL: &str = "https://api-m.paypal.com";
const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";

/// How close to expiry a cached access token is still considered usable.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Card/wallet processor adapter. Uses OAuth2 client-credentials with an
/// in-process token cache; the `api_key`/`api_secret` pair of the provider
/// config maps to the OAuth client id and secret, and `webhook_secret`
/// carries the configured webhook id used for signature verification.
pub struct PaypalProvider {
    http: PaymentHttpClient,
    config: RwLock<Option<ProviderConfig>>,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalProvider {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        Ok(Self {
            http: PaymentHttpClient::new(timeout)?,
            config: RwLock::new(None),
            token: Mutex::new(None),
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

    /// Return a cached access token, fetching a fresh one when the cached
    /// token is missing or within the expiry margin.
    async fn access_token(&self, config: &ProviderConfig) -> PaymentResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at - ChronoDuration::seconds(TOKEN_EXPIRY_MARGIN_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        let secret = config.api_secret.as_deref().ok_or_else(|| {
            PaymentError::validation("paypal client secret is required", Some("api_secret"))
        })?;

        debug!("requesting new paypal access token");
        let response: TokenResponse = self
            .http
            .post_form(
                &format!("{}/v1/oauth2/token", Self::base_url(config)),
                &config.api_key,
                Some(secret),
                &[("grant_type", "client_credentials")],
            )
            .await?;

        let token = CachedToken {
            access_token: response.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(response.expires_in),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    fn extract_event(&self, payload: JsonValue) -> WebhookEvent {
        let event_type = payload
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let resource = payload.get("resource");

        // Order events carry the order id directly; capture events reference
        // it through supplementary_data.
        let external_id = resource
            .and_then(|r| {
                if event_type.starts_with("CHECKOUT.ORDER") {
                    r.get("id")
                } else {
                    r.pointer("/supplementary_data/related_ids/order_id")
                        .or_else(|| r.get("id"))
                }
            })
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let status = map_webhook_event_type(&event_type);
        let received_amount = resource
            .and_then(|r| r.pointer("/amount/value"))
            .and_then(|v| v.as_str())
            .and_then(|v| BigDecimal::from_str(v).ok());
        let received_currency = resource
            .and_then(|r| r.pointer("/amount/currency_code"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        WebhookEvent {
            provider: self.kind(),
            event_type,
            external_id,
            status,
            received_amount,
            received_currency,
            pay_amount: None,
            payload,
        }
    }
}

#[async_trait]
impl PaymentProvider for PaypalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    async fn initialize(&self, config: ProviderConfig) -> PaymentResult<()> {
        if config.api_key.trim().is_empty() {
            return Err(PaymentError::validation(
                "paypal client id is required",
                Some("api_key"),
            ));
        }
        if config.api_secret.as_deref().unwrap_or("").trim().is_empty() {
            return Err(PaymentError::validation(
                "paypal client secret is required",
                Some("api_secret"),
            ));
        }
        if config.webhook_secret.is_none() {
            warn!("paypal initialized without a webhook id; webhook signatures will not be verified");
        }
        *self.config.write().await = Some(config);
        *self.token.lock().await = None;
        Ok(())
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> PaymentResult<ProviderPayment> {
        let config = self.config().await?;
        let token = self.access_token(&config).await?;

        let mut purchase_unit = serde_json::json!({
            "amount": {
                "currency_code": request.currency.to_uppercase(),
                "value": request.amount.to_string(),
            },
        });
        if let Some(order_id) = &request.order_id {
            purchase_unit["reference_id"] = serde_json::json!(order_id);
        }
        if let Some(description) = &request.order_description {
            purchase_unit["description"] = serde_json::json!(description);
        }

        let mut body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [purchase_unit],
        });
        if request.success_url.is_some() || request.cancel_url.is_some() {
            body["application_context"] = serde_json::json!({
                "return_url": request.success_url,
                "cancel_url": request.cancel_url,
            });
        }

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &format!("{}/v2/checkout/orders", Self::base_url(&config)),
                Some(&token),
                Some(&body),
                &[
                    // The processor deduplicates creation on this header.
                    ("PayPal-Request-Id", request.idempotency_key.as_str()),
                    ("Content-Type", "application/json"),
                ],
            )
            .await?;

        let order: OrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| self.provider_error(format!("unexpected order response: {}", e)))?;
        info!(external_id = %order.id, "paypal order created");

        let approve_url = order
            .links
            .iter()
            .find(|l| l.rel == "approve")
            .map(|l| l.href.clone());

        Ok(ProviderPayment {
            external_id: order.id,
            status: self.map_status(&order.status),
            pay_address: None,
            pay_amount: None,
            pay_currency: Some(request.currency.to_uppercase()),
            invoice_url: approve_url,
            expires_at: None,
            raw,
        })
    }

    async fn get_payment_status(&self, external_id: &str) -> PaymentResult<ProviderStatus> {
        let config = self.config().await?;
        let token = self.access_token(&config).await?;

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &format!(
                    "{}/v2/checkout/orders/{}",
                    Self::base_url(&config),
                    external_id
                ),
                Some(&token),
                None,
                &[],
            )
            .await?;

        let status_str = raw
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| self.provider_error("order response missing status".to_string()))?;
        let status = self.map_status(status_str);

        // Captured amount, present once the order completed.
        let received_amount = raw
            .pointer("/purchase_units/0/payments/captures/0/amount/value")
            .and_then(|v| v.as_str())
            .and_then(|v| BigDecimal::from_str(v).ok());
        let received_currency = raw
            .pointer("/purchase_units/0/payments/captures/0/amount/currency_code")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        Ok(ProviderStatus {
            external_id: external_id.to_string(),
            status,
            received_amount,
            received_currency,
            pay_amount: None,
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

        let webhook_id = match config.webhook_secret.as_deref() {
            Some(id) => id,
            None => {
                warn!("paypal webhook id not configured; accepting webhook without signature verification");
                return Ok(WebhookVerification::accepted(
                    self.extract_event(payload),
                    None,
                ));
            }
        };

        let header = |name: &str| -> Option<String> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };
        let (transmission_id, transmission_time, transmission_sig, cert_url, auth_algo) = match (
            header("paypal-transmission-id"),
            header("paypal-transmission-time"),
            header("paypal-transmission-sig"),
            header("paypal-cert-url"),
            header("paypal-auth-algo"),
        ) {
            (Some(a), Some(b), Some(c), Some(d), Some(e)) => (a, b, c, d, e),
            _ => {
                return Ok(WebhookVerification::rejected(
                    Some(false),
                    "missing webhook signature headers",
                ))
            }
        };

        let token = self.access_token(&config).await?;
        let verify_body = serde_json::json!({
            "auth_algo": auth_algo,
            "cert_url": cert_url,
            "transmission_id": transmission_id,
            "transmission_sig": transmission_sig,
            "transmission_time": transmission_time,
            "webhook_id": webhook_id,
            "webhook_event": payload,
        });

        let response: VerifyWebhookResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &format!(
                    "{}/v1/notifications/verify-webhook-signature",
                    Self::base_url(&config)
                ),
                Some(&token),
                Some(&verify_body),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if response.verification_status != "SUCCESS" {
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
        match provider_status.trim().to_uppercase().as_str() {
            "CREATED" | "SAVED" | "PAYER_ACTION_REQUIRED" => PaymentStatus::Pending,
            "APPROVED" => PaymentStatus::Confirmed,
            "VOIDED" => PaymentStatus::Failed,
            "COMPLETED" => PaymentStatus::Finished,
            _ => PaymentStatus::Pending,
        }
    }
}

/// Status implied by a webhook event type, when it implies one at all.
fn map_webhook_event_type(event_type: &str) -> Option<PaymentStatus> {
    match event_type {
        "CHECKOUT.ORDER.APPROVED" => Some(PaymentStatus::Confirmed),
        "CHECKOUT.ORDER.COMPLETED" => Some(PaymentStatus::Finished),
        "PAYMENT.CAPTURE.COMPLETED" => Some(PaymentStatus::Finished),
        "PAYMENT.CAPTURE.PENDING" => Some(PaymentStatus::Confirming),
        "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => Some(PaymentStatus::Failed),
        "PAYMENT.CAPTURE.REFUNDED" | "PAYMENT.CAPTURE.REVERSED" => Some(PaymentStatus::Refunded),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<OrderLink>,
}

#[derive(Debug, Deserialize)]
struct OrderLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct VerifyWebhookResponse {
    verification_status: String,
}
