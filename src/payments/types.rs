use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Nowpayments,
    Paypal,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Nowpayments => "nowpayments",
            ProviderKind::Paypal => "paypal",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "nowpayments" => Ok(ProviderKind::Nowpayments),
            "paypal" => Ok(ProviderKind::Paypal),
            _ => Err(PaymentError::ProviderNotFound {
                provider: value.to_string(),
            }),
        }
    }
}

/// Normalized payment lifecycle status shared by every provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Refunded,
    Expired,
}

impl PaymentStatus {
    /// Statuses the reconciliation sweep still polls for.
    pub const NON_TERMINAL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Confirming,
        PaymentStatus::Confirmed,
        PaymentStatus::Sending,
        PaymentStatus::PartiallyPaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirming => "confirming",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Sending => "sending",
            PaymentStatus::PartiallyPaid => "partially_paid",
            PaymentStatus::Finished => "finished",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Finished
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::Expired
        )
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "confirming" => Ok(PaymentStatus::Confirming),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            "sending" => Ok(PaymentStatus::Sending),
            "partially_paid" => Ok(PaymentStatus::PartiallyPaid),
            "finished" => Ok(PaymentStatus::Finished),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            "expired" => Ok(PaymentStatus::Expired),
            _ => Err(PaymentError::validation(
                format!("unknown payment status: {}", value),
                Some("status"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Deposit,
    Subscription,
    OneTime,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Deposit => "deposit",
            PaymentType::Subscription => "subscription",
            PaymentType::OneTime => "one_time",
        }
    }
}

/// Credentials and runtime switches handed to a provider adapter at
/// registration time.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub sandbox_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePaymentRequest {
    pub provider: ProviderKind,
    pub idempotency_key: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub pay_currency: Option<String>,
    pub order_id: Option<String>,
    pub order_description: Option<String>,
    pub outcome_address: Option<String>,
    pub outcome_currency: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    pub ipn_callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<(), PaymentError> {
        let key = self.idempotency_key.trim();
        if key.is_empty() || key.len() > 255 {
            return Err(PaymentError::validation(
                "idempotency_key must be between 1 and 255 characters",
                Some("idempotency_key"),
            ));
        }
        if self.amount <= BigDecimal::from(0) {
            return Err(PaymentError::validation(
                "amount must be greater than zero",
                Some("amount"),
            ));
        }
        let currency = self.currency.trim();
        if currency.len() < 3 || currency.len() > 10 {
            return Err(PaymentError::validation(
                "currency must be between 3 and 10 characters",
                Some("currency"),
            ));
        }
        Ok(())
    }
}

/// What a provider returns when a payment is created on its side.
#[derive(Debug, Clone)]
pub struct ProviderPayment {
    pub external_id: String,
    pub status: PaymentStatus,
    pub pay_address: Option<String>,
    pub pay_amount: Option<BigDecimal>,
    pub pay_currency: Option<String>,
    pub invoice_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub raw: JsonValue,
}

/// Point-in-time status pulled from a provider.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub external_id: String,
    pub status: PaymentStatus,
    pub received_amount: Option<BigDecimal>,
    pub received_currency: Option<String>,
    pub pay_amount: Option<BigDecimal>,
    pub raw: JsonValue,
}

/// Normalized webhook content, extracted by the provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider: ProviderKind,
    pub event_type: String,
    pub external_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub received_amount: Option<BigDecimal>,
    pub received_currency: Option<String>,
    pub pay_amount: Option<BigDecimal>,
    pub payload: JsonValue,
}

/// Outcome of webhook signature verification.
///
/// `valid` gates processing. `signature_valid` is the value recorded in the
/// audit trail: `Some(true)` / `Some(false)` when cryptography ran, `None`
/// when no secret was configured and the check was skipped.
#[derive(Debug, Clone)]
pub struct WebhookVerification {
    pub valid: bool,
    pub signature_valid: Option<bool>,
    pub event: Option<WebhookEvent>,
    pub error: Option<String>,
}

impl WebhookVerification {
    pub fn accepted(event: WebhookEvent, signature_valid: Option<bool>) -> Self {
        Self {
            valid: true,
            signature_valid,
            event: Some(event),
            error: None,
        }
    }

    pub fn rejected(signature_valid: Option<bool>, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            signature_valid,
            event: None,
            error: Some(error.into()),
        }
    }
}

/// Identifies a stored payment by any of its externally visible handles.
#[derive(Debug, Clone, Default)]
pub struct StatusLookup {
    pub id: Option<i64>,
    pub external_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl StatusLookup {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.external_id.is_none() && self.idempotency_key.is_none()
    }

    pub fn describe(&self) -> String {
        if let Some(id) = self.id {
            return id.to_string();
        }
        if let Some(external_id) = &self.external_id {
            return external_id.clone();
        }
        self.idempotency_key.clone().unwrap_or_default()
    }
}

/// Summary returned by the pending-payment sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckPendingReport {
    pub checked: usize,
    pub updated: usize,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            provider: ProviderKind::Nowpayments,
            idempotency_key: "order-2026-0001".to_string(),
            amount: BigDecimal::from_str("49.99").expect("valid decimal"),
            currency: "USD".to_string(),
            pay_currency: Some("btc".to_string()),
            order_id: Some("order-1".to_string()),
            order_description: None,
            outcome_address: None,
            outcome_currency: None,
            user_id: Some("u1".to_string()),
            project_id: None,
            payment_type: PaymentType::Deposit,
            success_url: None,
            cancel_url: None,
            ipn_callback_url: None,
            metadata: Some(serde_json::json!({"plan": "pro"})),
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Confirming,
            PaymentStatus::Confirmed,
            PaymentStatus::Sending,
            PaymentStatus::PartiallyPaid,
            PaymentStatus::Finished,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::Expired,
        ] {
            let parsed = PaymentStatus::from_str(status.as_str()).expect("parseable");
            assert_eq!(parsed, status);
        }
        assert!(PaymentStatus::from_str("unheard_of").is_err());
    }

    #[test]
    fn terminal_statuses_are_exactly_the_final_four() {
        let terminal: Vec<_> = [
            PaymentStatus::Finished,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::Expired,
        ]
        .into_iter()
        .collect();
        for status in terminal.iter() {
            assert!(status.is_terminal());
            assert!(!PaymentStatus::NON_TERMINAL.contains(status));
        }
        for status in PaymentStatus::NON_TERMINAL {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn create_request_validation_rules() {
        assert!(sample_request().validate().is_ok());

        let mut bad_key = sample_request();
        bad_key.idempotency_key = "".to_string();
        assert!(bad_key.validate().is_err());

        let mut long_key = sample_request();
        long_key.idempotency_key = "k".repeat(256);
        assert!(long_key.validate().is_err());

        let mut bad_amount = sample_request();
        bad_amount.amount = BigDecimal::from(0);
        assert!(bad_amount.validate().is_err());

        let mut bad_currency = sample_request();
        bad_currency.currency = "US".to_string();
        assert!(bad_currency.validate().is_err());
    }

    #[test]
    fn request_serialization_uses_snake_case_and_type_alias() {
        let json = serde_json::to_value(sample_request()).expect("serializable");
        assert_eq!(json["provider"], "nowpayments");
        assert_eq!(json["type"], "deposit");
        assert_eq!(json["idempotency_key"], "order-2026-0001");
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!(
            ProviderKind::from_str("NowPayments").expect("parses"),
            ProviderKind::Nowpayments
        );
        assert_eq!(
            ProviderKind::from_str(" paypal ").expect("parses"),
            ProviderKind::Paypal
        );
        assert!(ProviderKind::from_str("stripe").is_err());
    }
}
