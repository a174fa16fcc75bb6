pub mod error;
pub mod http;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod signing;
pub mod types;
