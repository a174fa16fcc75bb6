use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Thin reqwest wrapper shared by the provider adapters.
///
/// There is deliberately no retry loop here: payment creation is guarded by
/// idempotency keys one layer up, and replaying a POST blindly can
/// double-create on a provider that lacks such guarantees. Callers own their
/// retry policy.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;
        Ok(Self { client, timeout })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.client.request(method, url).timeout(self.timeout);
        if let Some(token) = bearer_token {
            request = request.bearer_auth(token);
        }
        for (name, value) in additional_headers {
            request = request.header(*name, *value);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError {
                message: format!("provider request failed: {}", e),
            })?;

        Self::decode(response).await
    }

    /// Form-encoded POST with HTTP basic auth. Used for OAuth token grants.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        username: &str,
        password: Option<&str>,
        form: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .basic_auth(username, password)
            .form(form)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError {
                message: format!("provider request failed: {}", e),
            })?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> PaymentResult<T> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| PaymentError::ProviderError {
                provider: "http".to_string(),
                message: format!("invalid provider JSON response: {}", e),
                provider_code: None,
                retryable: false,
            });
        }

        Err(PaymentError::ProviderError {
            provider: "http".to_string(),
            message: format!("HTTP {}: {}", status, text),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error() || status.as_u16() == 429,
        })
    }
}
