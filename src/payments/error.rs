use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Payment provider not found: {provider}")]
    ProviderNotFound { provider: String },

    #[error("Payment provider not configured: {provider}")]
    ProviderNotConfigured { provider: String },

    #[error("Payment not found: {reference}")]
    PaymentNotFound { reference: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Database error: {0}")]
    Database(#[from] crate::database::error::DatabaseError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: field.map(|f| f.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::ProviderNotFound { .. } => false,
            PaymentError::ProviderNotConfigured { .. } => false,
            PaymentError::PaymentNotFound { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::Database(e) => e.is_retryable(),
            PaymentError::Internal { .. } => false,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::ProviderNotFound { .. } => 404,
            PaymentError::ProviderNotConfigured { .. } => 503,
            PaymentError::PaymentNotFound { .. } => 404,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::Database(_) => 500,
            PaymentError::Internal { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::ProviderNotFound { provider } => {
                format!("Payment provider '{}' is not available", provider)
            }
            PaymentError::ProviderNotConfigured { provider } => {
                format!("Payment provider '{}' is not configured", provider)
            }
            PaymentError::PaymentNotFound { .. } => "Payment not found".to_string(),
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
            PaymentError::Database(_) => "A storage error occurred".to_string(),
            PaymentError::Internal { .. } => "An internal error occurred".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind};

        let kind = match &err {
            PaymentError::ValidationError { message, field } => AppErrorKind::Validation {
                field: field.clone(),
                message: message.clone(),
            },
            PaymentError::ProviderNotFound { provider } => AppErrorKind::NotFound {
                resource: format!("provider '{}'", provider),
            },
            PaymentError::PaymentNotFound { reference } => AppErrorKind::NotFound {
                resource: format!("payment '{}'", reference),
            },
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppErrorKind::Provider {
                provider: provider.clone(),
                message: message.clone(),
                retryable: *retryable,
            },
            PaymentError::NetworkError { message } => AppErrorKind::Infrastructure {
                message: message.clone(),
            },
            PaymentError::ProviderNotConfigured { provider } => AppErrorKind::Infrastructure {
                message: format!("provider '{}' is not configured", provider),
            },
            PaymentError::Database(e) => AppErrorKind::Infrastructure {
                message: e.to_string(),
            },
            other => AppErrorKind::Internal {
                message: other.to_string(),
            },
        };

        AppError::new(kind)
    }
}
