//! Hub mailbox monitoring.
//!
//! | Depth        | Level    |
//! |--------------|----------|
//! | < 100        | Normal   |
//! | 100 - 500    | Warning  |
//! | > 500        | Critical |

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const BUS_MAILBOX_NORMAL: usize = 100;
pub const BUS_MAILBOX_WARNING: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth of the hub mailbox and events dropped on full
/// connection queues.
#[derive(Debug, Default)]
pub struct MailboxMonitor {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    events_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        metrics::gauge!("sig_bus_mailbox_depth").set(new_depth as f64);

        match level_for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "sig.actor.mailbox",
                depth = new_depth,
                threshold = BUS_MAILBOX_WARNING,
                "Mailbox depth critical"
            ),
            MailboxLevel::Warning if new_depth == BUS_MAILBOX_NORMAL => debug!(
                target: "sig.actor.mailbox",
                depth = new_depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    pub fn record_dequeue(&self) {
        // Saturate: a dequeue can be observed before its enqueue is counted.
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// An event could not be queued for a connection.
    pub fn record_event_drop(&self) {
        let dropped = self.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::counter!("sig_bus_events_dropped_total").increment(1);
        warn!(
            target: "sig.actor.mailbox",
            dropped,
            "Event dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        level_for_depth(self.current_depth())
    }
}

fn level_for_depth(depth: usize) -> MailboxLevel {
    if depth > BUS_MAILBOX_WARNING {
        MailboxLevel::Critical
    } else if depth >= BUS_MAILBOX_NORMAL {
        MailboxLevel::Warning
    } else {
        MailboxLevel::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_and_peak() {
        let monitor = MailboxMonitor::new();
        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_dequeue();

        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.peak_depth(), 2);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new();
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_levels() {
        assert_eq!(level_for_depth(0), MailboxLevel::Normal);
        assert_eq!(level_for_depth(BUS_MAILBOX_NORMAL), MailboxLevel::Warning);
        assert_eq!(level_for_depth(BUS_MAILBOX_WARNING), MailboxLevel::Warning);
        assert_eq!(level_for_depth(BUS_MAILBOX_WARNING + 1), MailboxLevel::Critical);
    }

    #[test]
    fn test_event_drops_are_counted() {
        let monitor = MailboxMonitor::new();
        monitor.record_event_drop();
        monitor.record_event_drop();
        assert_eq!(monitor.events_dropped(), 2);
    }
}
