use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CreatePaymentRequest, PaymentStatus, ProviderConfig, ProviderKind, ProviderPayment,
    ProviderStatus, WebhookVerification,
};
use async_trait::async_trait;
use http::HeaderMap;

/// Contract every payment processor adapter implements.
///
/// Adapters are shared as `Arc<dyn PaymentProvider>` inside the registry, so
/// `initialize` takes `&self` and stores credentials behind interior
/// mutability. Any operation invoked before `initialize` fails with
/// `ProviderNotConfigured`.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn initialize(&self, config: ProviderConfig) -> PaymentResult<()>;

    async fn create_payment(&self, request: &CreatePaymentRequest)
        -> PaymentResult<ProviderPayment>;

    async fn get_payment_status(&self, external_id: &str) -> PaymentResult<ProviderStatus>;

    /// Verify an inbound webhook against the raw request bytes and headers.
    /// Expected rejections (bad signature, unparseable body) come back as a
    /// non-valid `WebhookVerification`, not as an `Err`.
    async fn verify_webhook(
        &self,
        body: &[u8],
        headers: &HeaderMap,
    ) -> PaymentResult<WebhookVerification>;

    /// Map a provider-native status string onto the shared vocabulary.
    /// Total: unknown inputs fall back to `pending` so a new provider status
    /// can never wedge a payment into an invalid state.
    fn map_status(&self, provider_status: &str) -> PaymentStatus;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentType;
    use bigdecimal::BigDecimal;
    use tokio::sync::RwLock;

    struct MockProvider {
        config: RwLock<Option<ProviderConfig>>,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                config: RwLock::new(None),
            }
        }
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Nowpayments
        }

        async fn initialize(&self, config: ProviderConfig) -> PaymentResult<()> {
            *self.config.write().await = Some(config);
            Ok(())
        }

        async fn create_payment(
            &self,
            request: &CreatePaymentRequest,
        ) -> PaymentResult<ProviderPayment> {
            self.config.read().await.clone().ok_or(
                crate::payments::error::PaymentError::ProviderNotConfigured {
                    provider: self.kind().to_string(),
                },
            )?;
            Ok(ProviderPayment {
                external_id: format!("mock-{}", request.idempotency_key),
                status: PaymentStatus::Pending,
                pay_address: Some("addr".to_string()),
                pay_amount: Some(request.amount.clone()),
                pay_currency: request.pay_currency.clone(),
                invoice_url: None,
                expires_at: None,
                raw: serde_json::json!({}),
            })
        }

        async fn get_payment_status(&self, external_id: &str) -> PaymentResult<ProviderStatus> {
            Ok(ProviderStatus {
                external_id: external_id.to_string(),
                status: PaymentStatus::Finished,
                received_amount: None,
                received_currency: None,
                pay_amount: None,
                raw: serde_json::json!({}),
            })
        }

        async fn verify_webhook(
            &self,
            _body: &[u8],
            _headers: &HeaderMap,
        ) -> PaymentResult<WebhookVerification> {
            Ok(WebhookVerification::rejected(
                Some(false),
                "mock verification",
            ))
        }

        fn map_status(&self, provider_status: &str) -> PaymentStatus {
            provider_status.parse().unwrap_or(PaymentStatus::Pending)
        }
    }

    fn sample_request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            provider: ProviderKind::Nowpayments,
            idempotency_key: "k1".to_string(),
            amount: BigDecimal::from(10),
            currency: "USD".to_string(),
            pay_currency: None,
            order_id: None,
            order_description: None,
            outcome_address: None,
            outcome_currency: None,
            user_id: None,
            project_id: None,
            payment_type: PaymentType::OneTime,
            success_url: None,
            cancel_url: None,
            ipn_callback_url: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn uninitialized_provider_refuses_operations() {
        let provider = MockProvider::new();
        let err = provider
            .create_payment(&sample_request())
            .await
            .expect_err("should refuse before initialize");
        assert_eq!(err.http_status_code(), 503);
    }

    #[tokio::test]
    async fn initialized_provider_creates_payments() {
        let provider = MockProvider::new();
        provider
            .initialize(ProviderConfig {
                api_key: "key".to_string(),
                api_secret: None,
                webhook_secret: None,
                sandbox_mode: true,
            })
            .await
            .expect("initialize succeeds");

        let payment = provider
            .create_payment(&sample_request())
            .await
            .expect("create succeeds");
        assert_eq!(payment.external_id, "mock-k1");
        assert_eq!(payment.status, PaymentStatus::Pending);
    }
}
