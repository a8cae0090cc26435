//! Common utilities and types shared across the call-signaling services.

#![warn(clippy::pedantic)]

/// Module for domain identifiers (identities, channels, call types)
pub mod types;

/// Module for call signaling envelopes carried over the bus
pub mod envelope;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (validation, claims, verifier)
pub mod jwt;
