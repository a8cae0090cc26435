//! Observability for the signaling service.
//!
//! Tokens are never recorded. Identities appear only in debug and info
//! events on the `sig.actor.bus` target, never as metric labels.

pub mod metrics;
