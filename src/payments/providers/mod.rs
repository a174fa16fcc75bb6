pub mod nowpayments;
pub mod paypal;

pub use nowpayments::NowPaymentsProvider;
pub use paypal::PaypalProvider;
