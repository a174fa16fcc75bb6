use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{ProviderConfig, ProviderKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Holds the long-lived provider adapters, keyed by provider kind.
///
/// Adapters are registered once at startup (or re-registered at runtime to
/// rotate credentials); registration runs `initialize` before the adapter
/// becomes visible, so a retrievable provider is always a configured one.
/// Re-registering a kind replaces the previous adapter: last registration
/// wins.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderKind, Arc<dyn PaymentProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(
        &self,
        provider: Arc<dyn PaymentProvider>,
        config: ProviderConfig,
    ) -> PaymentResult<()> {
        let kind = provider.kind();
        provider.initialize(config).await?;

        let mut providers = self.providers.write().await;
        if providers.insert(kind, provider).is_some() {
            warn!(provider = %kind, "replacing previously registered payment provider");
        } else {
            info!(provider = %kind, "payment provider registered");
        }
        Ok(())
    }

    pub async fn get(&self, kind: ProviderKind) -> PaymentResult<Arc<dyn PaymentProvider>> {
        self.providers
            .read()
            .await
            .get(&kind)
            .cloned()
            .ok_or(PaymentError::ProviderNotFound {
                provider: kind.to_string(),
            })
    }

    pub async fn registered(&self) -> Vec<ProviderKind> {
        self.providers.read().await.keys().copied().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{
        CreatePaymentRequest, PaymentStatus, ProviderPayment, ProviderStatus, WebhookVerification,
    };
    use async_trait::async_trait;
    use http::HeaderMap;

    struct TaggedProvider {
        tag: &'static str,
    }

    #[async_trait]
    impl PaymentProvider for TaggedProvider {
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
            Ok(ProviderPayment {
                external_id: self.tag.to_string(),
                status: PaymentStatus::Pending,
                pay_address: None,
                pay_amount: None,
                pay_currency: None,
                invoice_url: None,
                expires_at: None,
                raw: serde_json::json!({}),
            })
        }

        async fn get_payment_status(&self, external_id: &str) -> PaymentResult<ProviderStatus> {
            Ok(ProviderStatus {
                external_id: external_id.to_string(),
                status: PaymentStatus::Pending,
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
            Ok(WebhookVerification::rejected(None, "not used"))
        }

        fn map_status(&self, _provider_status: &str) -> PaymentStatus {
            PaymentStatus::Pending
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig {
            api_key: "k".to_string(),
            api_secret: None,
            webhook_secret: None,
            sandbox_mode: true,
        }
    }

    #[tokio::test]
    async fn get_fails_for_unregistered_provider() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get(ProviderKind::Paypal).await,
            Err(PaymentError::ProviderNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let registry = ProviderRegistry::new();
        registry
            .register(Arc::new(TaggedProvider { tag: "first" }), config())
            .await
            .expect("register");
        registry
            .register(Arc::new(TaggedProvider { tag: "second" }), config())
            .await
            .expect("re-register");

        let provider = registry
            .get(ProviderKind::Nowpayments)
            .await
            .expect("registered");
        let payment = provider
            .create_payment(&crate::payments::types::CreatePaymentRequest {
                provider: ProviderKind::Nowpayments,
                idempotency_key: "k".to_string(),
                amount: bigdecimal::BigDecimal::from(1),
                currency: "USD".to_string(),
                pay_currency: None,
                order_id: None,
                order_description: None,
                outcome_address: None,
                outcome_currency: None,
                user_id: None,
                project_id: None,
                payment_type: crate::payments::types::PaymentType::OneTime,
                success_url: None,
                cancel_url: None,
                ipn_callback_url: None,
                metadata: None,
            })
            .await
            .expect("create");
        assert_eq!(payment.external_id, "second");
        assert_eq!(registry.registered().await.len(), 1);
    }
}
