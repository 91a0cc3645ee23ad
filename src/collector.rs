//! Periodic collection of channel values into write records.
//!
//! Once per step the collector snapshots every registered channel, reduces
//! the values observed during the elapsed window to one scalar with the
//! unit's aggregate function, and offers the result to the write queue. The
//! collector never touches the disk and never blocks; records the queue
//! cannot take are shed and flagged.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::channel::{ChannelAddress, DataRecord, PersistencePriority, Unit};
use crate::config::Config;
use crate::health::Health;
use crate::policy::{self, HOUR_SECONDS, truncate};
use crate::queue::QueueProducer;

/// Snapshot of one channel at collection time: identity, persistence
/// attributes and the recently observed values keyed by timestamp.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    /// The channel's address.
    pub address: ChannelAddress,
    /// The channel's unit, deciding aggregate function and write cadence.
    pub unit: Unit,
    /// Persistence priority; channels below the configured minimum are
    /// skipped.
    pub priority: PersistencePriority,
    /// Write-only channels carry setpoints, not measurements, and are never
    /// persisted.
    pub write_only: bool,
    /// Observed values by epoch-second timestamp, oldest first.
    pub history: BTreeMap<i64, f64>,
}

/// Source of channel snapshots, implemented by the component runtime that
/// owns the live channels.
pub trait ChannelSource {
    /// Returns a snapshot of every currently registered channel.
    fn snapshot(&self) -> Vec<ChannelSnapshot>;
}

/// Reduces channel snapshots to write records on the sampling cadence.
#[derive(Debug)]
pub struct Collector<S> {
    source: S,
    queue: QueueProducer,
    health: Arc<Health>,
    step: i64,
    min_priority: PersistencePriority,
    /// Window end of the previous collection round.
    last_boundary: Option<i64>,
}

impl<S: ChannelSource> Collector<S> {
    /// Creates a collector over `source` feeding `queue`.
    pub fn new(source: S, queue: QueueProducer, health: Arc<Health>, config: &Config) -> Self {
        Self {
            source,
            queue,
            health,
            step: i64::from(config.step_seconds),
            min_priority: config.min_priority,
            last_boundary: None,
        }
    }

    /// Runs one collection round at wall-clock time `now`.
    ///
    /// The round covers the window `[to - step, to)` where `to` is `now`
    /// truncated to the step. Calling again within the same step is a
    /// no-op, so the caller may tick faster than the step without
    /// duplicating records.
    pub fn collect(&mut self, now: i64) {
        let to = truncate(now, self.step);
        if self.last_boundary == Some(to) {
            return;
        }
        self.last_boundary = Some(to);
        let from = to - self.step;

        for snapshot in self.source.snapshot() {
            if snapshot.write_only || snapshot.priority < self.min_priority {
                continue;
            }
            let Some(value) = reduce_window(&snapshot, from, to) else {
                continue;
            };

            // Cumulative counters are persisted on hour boundaries; within
            // an hour the same slot is rewritten with the newest reading.
            let timestamp = if snapshot.unit.is_cumulative() {
                truncate(to, HOUR_SECONDS)
            } else {
                to
            };

            let record = DataRecord {
                timestamp,
                address: snapshot.address.clone(),
                unit: snapshot.unit,
                value,
            };
            if !self.queue.offer(record) {
                self.health.mark_queue_full();
                warn!(channel = %snapshot.address, "write queue full, shedding record");
            }
        }
    }
}

/// Reduces the values a channel produced in `[from, to)` to one scalar with
/// the unit's aggregate function. Falls back to the most recent value at or
/// before `from` when the window is empty; a channel with no value at all is
/// skipped.
fn reduce_window(snapshot: &ChannelSnapshot, from: i64, to: i64) -> Option<f64> {
    let window: Vec<f64> = snapshot
        .history
        .range(from..to)
        .map(|(_, &v)| v)
        .collect();
    if window.is_empty() {
        return snapshot
            .history
            .range(..=from)
            .next_back()
            .map(|(_, &v)| v);
    }
    let aggregate = policy::policy_for(snapshot.unit).aggregate;
    let reduced = aggregate.apply(&window);
    (!reduced.is_nan()).then_some(reduced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{QueueConsumer, write_queue};

    struct FixedSource(Vec<ChannelSnapshot>);

    impl ChannelSource for FixedSource {
        fn snapshot(&self) -> Vec<ChannelSnapshot> {
            self.0.clone()
        }
    }

    fn snapshot(
        component: &str,
        channel: &str,
        unit: Unit,
        history: &[(i64, f64)],
    ) -> ChannelSnapshot {
        ChannelSnapshot {
            address: ChannelAddress::new(component, channel),
            unit,
            priority: PersistencePriority::Medium,
            write_only: false,
            history: history.iter().copied().collect(),
        }
    }

    fn collector(
        snapshots: Vec<ChannelSnapshot>,
        capacity: usize,
    ) -> (Collector<FixedSource>, QueueConsumer, Arc<Health>) {
        let (tx, rx) = write_queue(capacity);
        let health = Arc::new(Health::new());
        let config = Config::new("/tmp/unused", "edge0");
        let collector = Collector::new(FixedSource(snapshots), tx, Arc::clone(&health), &config);
        (collector, rx, health)
    }

    #[test]
    fn test_window_is_averaged() {
        let snaps = vec![snapshot(
            "meter0",
            "ActivePower",
            Unit::Watt,
            &[(310, 100.0), (400, 200.0), (590, 300.0)],
        )];
        let (mut collector, rx, _) = collector(snaps, 8);

        collector.collect(600);
        let record = rx.recv().unwrap();
        assert_eq!(record.timestamp, 600);
        assert_eq!(record.value, 200.0);
    }

    #[test]
    fn test_same_step_collects_once() {
        let snaps = vec![snapshot("meter0", "ActivePower", Unit::Watt, &[(310, 1.0)])];
        let (mut collector, rx, _) = collector(snaps, 8);

        collector.collect(600);
        collector.collect(750); // same 300s step
        assert_eq!(rx.recv().unwrap().timestamp, 600);
        drop(collector);
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_empty_window_falls_back_to_last_value() {
        let snaps = vec![snapshot("meter0", "ActivePower", Unit::Watt, &[(250, 42.0)])];
        let (mut collector, rx, _) = collector(snaps, 8);

        collector.collect(600); // window [300, 600) is empty
        assert_eq!(rx.recv().unwrap().value, 42.0);
    }

    #[test]
    fn test_channel_without_value_is_skipped() {
        let snaps = vec![snapshot("meter0", "ActivePower", Unit::Watt, &[])];
        let (mut collector, rx, _) = collector(snaps, 8);

        collector.collect(600);
        drop(collector);
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_priority_and_write_only_filtering() {
        let mut low = snapshot("meter0", "Frequency", Unit::Hertz, &[(310, 50.0)]);
        low.priority = PersistencePriority::Low;
        let mut setpoint = snapshot("ess0", "SetActivePower", Unit::Watt, &[(310, 1_000.0)]);
        setpoint.write_only = true;
        let kept = snapshot("meter0", "ActivePower", Unit::Watt, &[(310, 7.0)]);

        let (mut collector, rx, _) = collector(vec![low, setpoint, kept], 8);
        collector.collect(600);
        drop(collector);

        let record = rx.recv().unwrap();
        assert_eq!(record.address, ChannelAddress::new("meter0", "ActivePower"));
        assert!(rx.recv().is_none());
    }

    #[test]
    fn test_cumulative_written_on_hour_boundary() {
        let snaps = vec![snapshot(
            "meter0",
            "EnergyTotal",
            Unit::CumulatedWattHours,
            &[(3_650, 500.0), (3_800, 520.0)],
        )];
        let (mut collector, rx, _) = collector(snaps, 8);

        collector.collect(3_900); // window [3600, 3900)
        let record = rx.recv().unwrap();
        assert_eq!(record.timestamp, 3_600);
        // Counters take the maximum of the window
        assert_eq!(record.value, 520.0);
    }

    #[test]
    fn test_queue_full_sets_health_flags() {
        let snaps = vec![
            snapshot("meter0", "A", Unit::Watt, &[(310, 1.0)]),
            snapshot("meter0", "B", Unit::Watt, &[(310, 2.0)]),
        ];
        let (mut collector, _rx, health) = collector(snaps, 1);

        collector.collect(600);
        assert!(health.queue_full());
        assert!(health.unable_to_insert());
    }
}
