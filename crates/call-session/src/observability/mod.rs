//! Observability for call agents.
//!
//! Identities and channel ids may appear in logs but never as metric labels.

pub mod metrics;
