//! Business logic built on top of the provider adapters and the store.

pub mod payment_service;

pub use payment_service::{PaymentService, WebhookOutcome};
