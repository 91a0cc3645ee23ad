//! Shared health state of the ingest pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sticky fault flags and counters shared between collector, writer and the
/// service facade.
///
/// Flags latch on the first fault and stay set until [`Health::reset`], so a
/// supervisor polling at a slower cadence than the sampling step still sees
/// transient faults.
#[derive(Debug, Default)]
pub struct Health {
    /// Set when the write queue rejected a record because it was full.
    queue_full: AtomicBool,
    /// Set when a record could not be persisted (queue shed or write
    /// failure).
    unable_to_insert: AtomicBool,
    /// Number of records dropped because their timestamp was not newer than
    /// the channel's last update.
    out_of_order_dropped: AtomicU64,
}

impl Health {
    /// Creates a healthy state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the write queue as having been full.
    pub fn mark_queue_full(&self) {
        self.queue_full.store(true, Ordering::Relaxed);
        self.unable_to_insert.store(true, Ordering::Relaxed);
    }

    /// Marks a record as lost on the disk side.
    pub fn mark_unable_to_insert(&self) {
        self.unable_to_insert.store(true, Ordering::Relaxed);
    }

    /// Counts one dropped out-of-order record.
    pub fn count_out_of_order(&self) {
        self.out_of_order_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the write queue has rejected a record since the last reset.
    pub fn queue_full(&self) -> bool {
        self.queue_full.load(Ordering::Relaxed)
    }

    /// Whether any record has been lost since the last reset.
    pub fn unable_to_insert(&self) -> bool {
        self.unable_to_insert.load(Ordering::Relaxed)
    }

    /// Number of out-of-order records dropped since startup.
    pub fn out_of_order_dropped(&self) -> u64 {
        self.out_of_order_dropped.load(Ordering::Relaxed)
    }

    /// Clears the sticky fault flags. The out-of-order counter is
    /// cumulative and not reset.
    pub fn reset(&self) {
        self.queue_full.store(false, Ordering::Relaxed);
        self.unable_to_insert.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_latch_until_reset() {
        let health = Health::new();
        assert!(!health.queue_full());

        health.mark_queue_full();
        assert!(health.queue_full());
        assert!(health.unable_to_insert());

        health.reset();
        assert!(!health.queue_full());
        assert!(!health.unable_to_insert());
    }

    #[test]
    fn test_out_of_order_counter_is_cumulative() {
        let health = Health::new();
        health.count_out_of_order();
        health.count_out_of_order();
        health.reset();
        assert_eq!(health.out_of_order_dropped(), 2);
    }
}
