//! Token service library.
//!
//! Issues short-lived media and bus access tokens and serves the account
//! directory that callers pick peers from.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `crypto` - Ed25519 signing key
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Session authentication and HTTP metrics
//! - `models` - Data models
//! - `observability` - Metrics
//! - `repositories` - Account store and audit log
//! - `routes` - Axum router setup
//! - `services` - Token issuer and directory

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
