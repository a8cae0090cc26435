//! Observability for the token service.
//!
//! Handlers and services are instrumented with `#[instrument(skip_all)]`.
//! Subjects and tokens are never recorded as span fields.

pub mod metrics;
