//! HTTP request handlers for the signaling service.

pub mod health;
pub mod metrics;

pub use health::health_check;
pub use metrics::metrics_handler;
