//! Signaling service library.
//!
//! Hosts the messaging bus that carries call envelopes and presence between
//! authenticated identities, in process and over WebSocket.
//!
//! # Modules
//!
//! - `bus` - Hub actor, connections, events
//! - `config` - Service configuration from environment
//! - `errors` - Error types with client-facing codes
//! - `gateway` - WebSocket gateway onto the bus
//! - `handlers` - Health and metrics handlers
//! - `middleware` - HTTP metrics
//! - `observability` - Metrics
//! - `routes` - Axum router setup

pub mod bus;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
