//! Unified error handling for the gateway
//!
//! This module provides a single error type with HTTP status mapping,
//! user-friendly messages, and structured error codes for client handling.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "SERVICE_UNAVAILABLE")]
    ServiceUnavailable,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    /// Malformed or rejected client input
    Validation {
        field: Option<String>,
        message: String,
    },
    /// The requested resource does not exist
    NotFound { resource: String },
    /// A payment processor returned an error
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },
    /// Database or dependency unavailable
    Infrastructure { message: String },
    /// Unexpected internal fault
    Internal { message: String },
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Validation { .. } => 400,
            AppErrorKind::NotFound { .. } => 404,
            AppErrorKind::Provider { .. } => 502,
            AppErrorKind::Infrastructure { .. } => 503,
            AppErrorKind::Internal { .. } => 500,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Validation { .. } => ErrorCode::ValidationError,
            AppErrorKind::NotFound { .. } => ErrorCode::NotFound,
            AppErrorKind::Provider { .. } => ErrorCode::PaymentProviderError,
            AppErrorKind::Infrastructure { .. } => ErrorCode::ServiceUnavailable,
            AppErrorKind::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Get user-friendly error message. Never echoes provider payloads or
    /// internal detail to the client.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation { field, message } => match field {
                Some(field) => format!("Invalid '{}': {}", field, message),
                None => message.clone(),
            },
            AppErrorKind::NotFound { resource } => format!("{} not found", resource),
            AppErrorKind::Provider {
                provider,
                retryable,
                ..
            } => {
                if *retryable {
                    format!(
                        "Payment provider ({}) is temporarily unavailable. Please try again",
                        provider
                    )
                } else {
                    "Payment processing failed. Please contact support".to_string()
                }
            }
            AppErrorKind::Infrastructure { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::Internal { .. } => "An internal error occurred".to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Validation { .. } => false,
            AppErrorKind::NotFound { .. } => false,
            AppErrorKind::Provider { retryable, .. } => *retryable,
            AppErrorKind::Infrastructure { .. } => true,
            AppErrorKind::Internal { .. } => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
