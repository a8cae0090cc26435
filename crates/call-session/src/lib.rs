//! Call session library.
//!
//! Runs one [`CallAgentHandle`] per signed-in identity: it places and
//! answers calls over the signaling bus, drives each session through the
//! call state machine and joins media once a call is active.
//!
//! # Modules
//!
//! - `agent` - Call agent actor and its handle
//! - `errors` - Error types with user-facing messages
//! - `media` - Media bridge contract
//! - `observability` - Metrics
//! - `registry` - Live session records per agent
//! - `state` - Call state machine
//! - `token_source` - Bus and media token fetching

pub mod agent;
pub mod errors;
pub mod media;
pub mod observability;
pub mod registry;
pub mod state;
pub mod token_source;

pub use agent::{CallAgentConfig, CallAgentHandle, Notification};
