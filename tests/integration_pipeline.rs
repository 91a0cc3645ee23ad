//! Integration tests for the full ingest pipeline: collector, queue,
//! writer thread and the health flags tying them together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use rotunda::channel::{ChannelAddress, PersistencePriority, Unit};
use rotunda::collector::{ChannelSnapshot, ChannelSource};
use rotunda::config::Config;
use rotunda::service::TimedataService;
use tempfile::tempdir;

/// Channel source simulating a meter and a battery with pre-scripted
/// histories keyed off a movable "now".
struct SimulatedComponents {
    now: Arc<AtomicI64>,
}

impl ChannelSource for SimulatedComponents {
    fn snapshot(&self) -> Vec<ChannelSnapshot> {
        let now = self.now.load(Ordering::Relaxed);
        // Each channel reported once per minute for the last five minutes.
        let minute_marks = |base: f64, slope: f64| -> BTreeMap<i64, f64> {
            (0..5)
                .map(|i| {
                    let t = now - 60 * (5 - i);
                    #[allow(clippy::cast_precision_loss)]
                    let v = base + slope * i as f64;
                    (t, v)
                })
                .collect()
        };
        vec![
            ChannelSnapshot {
                address: ChannelAddress::new("meter0", "ActivePower"),
                unit: Unit::Watt,
                priority: PersistencePriority::High,
                write_only: false,
                history: minute_marks(1_000.0, 100.0),
            },
            ChannelSnapshot {
                address: ChannelAddress::new("ess0", "Soc"),
                unit: Unit::Percent,
                priority: PersistencePriority::Medium,
                write_only: false,
                history: minute_marks(50.0, 1.0),
            },
            ChannelSnapshot {
                address: ChannelAddress::new("ess0", "SetActivePower"),
                unit: Unit::Watt,
                priority: PersistencePriority::High,
                write_only: true,
                history: minute_marks(0.0, 0.0),
            },
        ]
    }
}

#[test]
fn test_collect_write_query_roundtrip() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path(), "edge0");
    let service = TimedataService::start(&config).unwrap();

    let now = Arc::new(AtomicI64::new(0));
    let mut collector = service.collector(
        SimulatedComponents {
            now: Arc::clone(&now),
        },
        &config,
    );

    // Three collection rounds, one per step.
    for tick in 1..=3 {
        now.store(300 * tick, Ordering::Relaxed);
        collector.collect(300 * tick);
    }
    drop(collector);

    let meter = ChannelAddress::new("meter0", "ActivePower");
    let soc = ChannelAddress::new("ess0", "Soc");
    let setpoint = ChannelAddress::new("ess0", "SetActivePower");
    let query_store = Arc::clone(service.store());
    assert!(!service.health().queue_full());
    service.shutdown().unwrap();

    let engine = rotunda::QueryEngine::new(query_store);
    let rows = engine
        .historic_data(&[meter.clone(), soc.clone()], 300, 1_200, 300)
        .unwrap();
    assert_eq!(rows.len(), 3);
    // Averages of five minute-marks: 1000 + 100 * (0+1+2+3+4)/5 = 1200.
    for row in rows.values() {
        assert_eq!(row[&meter], 1_200.0);
        assert_eq!(row[&soc], 52.0);
    }

    // Write-only setpoints never reach the disk.
    assert!(matches!(
        engine.latest_value(&setpoint),
        Err(rotunda::RotundaError::Query(_))
    ));
}

#[test]
fn test_collector_tick_faster_than_step() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path(), "edge0");
    let service = TimedataService::start(&config).unwrap();

    let now = Arc::new(AtomicI64::new(600));
    let mut collector = service.collector(
        SimulatedComponents {
            now: Arc::clone(&now),
        },
        &config,
    );

    // Ticking every "second" within one step must produce a single record
    // per channel.
    for second in 0..10 {
        collector.collect(600 + second);
    }
    drop(collector);

    let meter = ChannelAddress::new("meter0", "ActivePower");
    let store = Arc::clone(service.store());
    service.shutdown().unwrap();

    let engine = rotunda::QueryEngine::new(store);
    let rows = engine
        .historic_data(std::slice::from_ref(&meter), 600, 900, 300)
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_overloaded_queue_sheds_and_flags() {
    let dir = tempdir().unwrap();
    let mut config = Config::new(dir.path(), "edge0");
    config.queue_capacity = 1;
    let service = TimedataService::start(&config).unwrap();

    // Stall the writer long enough to fill the one-slot queue by flooding
    // records faster than they can possibly drain.
    let addr = ChannelAddress::new("meter0", "ActivePower");
    let mut accepted = 0;
    for i in 0..10_000 {
        if service.submit(rotunda::DataRecord {
            timestamp: 300 * (i + 1),
            address: addr.clone(),
            unit: Unit::Watt,
            value: 1.0,
        }) {
            accepted += 1;
        }
    }
    assert!(accepted < 10_000);
    assert!(service.health().queue_full());
    assert!(service.health().unable_to_insert());

    // The flag clears on reset and the service keeps working.
    service.health().reset();
    assert!(!service.health().queue_full());
    service.shutdown().unwrap();
}

#[test]
fn test_out_of_order_submissions_are_counted_not_fatal() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path(), "edge0");
    let service = TimedataService::start(&config).unwrap();

    let addr = ChannelAddress::new("meter0", "ActivePower");
    for &(t, v) in &[(600_i64, 2.0_f64), (300, 1.0), (900, 3.0)] {
        service.submit(rotunda::DataRecord {
            timestamp: t,
            address: addr.clone(),
            unit: Unit::Watt,
            value: v,
        });
    }

    let store = Arc::clone(service.store());
    service.shutdown().unwrap();

    let engine = rotunda::QueryEngine::new(store);
    let rows = engine
        .historic_data(std::slice::from_ref(&addr), 300, 1_200, 300)
        .unwrap();
    // The late record for t=300 was dropped; its slot is unknown.
    assert!(rows[&300][&addr].is_nan());
    assert_eq!(rows[&600][&addr], 2.0);
    assert_eq!(rows[&900][&addr], 3.0);
}
