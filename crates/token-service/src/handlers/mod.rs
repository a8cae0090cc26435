//! HTTP request handlers for the token service.

pub mod directory;
pub mod health;
pub mod jwks;
pub mod metrics;
pub mod tokens;

pub use directory::{list_hosts, list_users};
pub use health::health_check;
pub use jwks::get_jwks;
pub use metrics::metrics_handler;
pub use tokens::{issue_bus_token, issue_media_token};
