pub mod config;
pub mod daraja_client;
pub mod errors;
pub mod handlers;
pub mod landlord_config;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod reconciliation;
pub mod security_middleware;
pub mod store;

pub use config::Config;
pub use errors::{PaymentError, Result};
