//! Middleware for the token service.
//!
//! - `auth` - session credential check for protected routes
//! - `http_metrics` - HTTP request metrics

pub mod auth;
pub mod http_metrics;

pub use auth::{require_session, AuthState};
pub use http_metrics::http_metrics_middleware;
