//! Call agent metrics.
//!
//! # Cardinality
//!
//! - `outcome`: ended, rejected, timed_out, or a `CallError` label
//! - `status`: success or a `CallError` label

use metrics::counter;

/// A session left the registry.
///
/// Metric: `call_sessions_total{outcome}`
pub fn record_session_outcome(outcome: &str) {
    counter!("call_sessions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Metric: `call_media_joins_total{status}`
pub fn record_media_join(status: &str) {
    counter!("call_media_joins_total", "status" => status.to_string()).increment(1);
}

/// Metric: `call_bus_reconnects_total{status}`
pub fn record_reconnect(status: &str) {
    counter!("call_bus_reconnects_total", "status" => status.to_string()).increment(1);
}

/// Metric: `call_invites_declined_total{reason}`
pub fn record_invite_declined(reason: &str) {
    counter!("call_invites_declined_total", "reason" => reason.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        record_session_outcome("ended");
        record_media_join("media_join_failure");
        record_reconnect("success");
        record_invite_declined("busy");
    }
}
