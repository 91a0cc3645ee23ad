//! Integration tests for lazy schema migration through the store: legacy
//! files are upgraded on first access and stay writable afterwards.

use std::sync::Arc;

use rotunda::channel::{ChannelAddress, Unit};
use rotunda::config::Config;
use rotunda::database::RrdDatabase;
use rotunda::policy::policy_for;
use rotunda::read::QueryEngine;
use rotunda::store::ArchiveStore;
use rotunda::version::{SCHEMA_V1, SCHEMA_V2, layout};
use tempfile::tempdir;

/// Plants a legacy (schema v1) database file where the store expects it.
fn plant_legacy_file(
    store: &ArchiveStore,
    address: &ChannelAddress,
    unit: Unit,
    samples: &[(i64, f64)],
) {
    let path = store.database_path(address);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let definition = layout(SCHEMA_V1, policy_for(unit), 300).unwrap();
    let mut db = RrdDatabase::create(&path, SCHEMA_V1, &definition).unwrap();
    for &(t, v) in samples {
        db.append(t, v);
    }
    db.flush().unwrap();
}

#[test]
fn test_legacy_file_migrated_on_first_query() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path(), "edge0");
    let store = Arc::new(ArchiveStore::open(&config).unwrap());
    let addr = ChannelAddress::new("meter0", "ActivePower");
    plant_legacy_file(
        &store,
        &addr,
        Unit::Watt,
        &[(300, 10.0), (600, 12.0), (900, 14.0)],
    );

    let engine = QueryEngine::new(Arc::clone(&store));
    let rows = engine
        .historic_data(std::slice::from_ref(&addr), 300, 1_200, 300)
        .unwrap();
    assert_eq!(rows[&300][&addr], 10.0);
    assert_eq!(rows[&600][&addr], 12.0);
    assert_eq!(rows[&900][&addr], 14.0);

    // The file on disk is now at the current schema.
    drop(engine);
    drop(store);
    let db = RrdDatabase::open(
        ArchiveStore::open(&config)
            .unwrap()
            .database_path(&addr),
    )
    .unwrap();
    assert_eq!(db.schema_version(), SCHEMA_V2);
    assert_eq!(db.archives().len(), 3);
}

#[test]
fn test_migrated_file_accepts_new_samples() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path(), "edge0");
    let store = Arc::new(ArchiveStore::open(&config).unwrap());
    let addr = ChannelAddress::new("meter0", "EnergyTotal");
    plant_legacy_file(
        &store,
        &addr,
        Unit::CumulatedWattHours,
        &[(3_600, 100.0), (7_200, 120.0)],
    );

    // get_or_create migrates, then appends continue where the legacy data
    // left off.
    let db = store.get_or_create(&addr, Unit::CumulatedWattHours).unwrap();
    {
        let mut db = db.lock();
        assert_eq!(db.schema_version(), SCHEMA_V2);
        assert_eq!(db.last_update(), Some(7_200));
        db.append(10_800, 150.0);
    }

    let engine = QueryEngine::new(Arc::clone(&store));
    let energies = engine
        .historic_energy(std::slice::from_ref(&addr), 3_600, 14_400)
        .unwrap();
    assert_eq!(energies[&addr], 50.0);
}

#[test]
fn test_mixed_generations_in_one_store() {
    let dir = tempdir().unwrap();
    let config = Config::new(dir.path(), "edge0");
    let store = Arc::new(ArchiveStore::open(&config).unwrap());

    let old = ChannelAddress::new("meter0", "ActivePower");
    plant_legacy_file(&store, &old, Unit::Watt, &[(300, 1.0), (600, 2.0)]);

    let new = ChannelAddress::new("meter1", "ActivePower");
    {
        let db = store.get_or_create(&new, Unit::Watt).unwrap();
        let mut db = db.lock();
        db.append(300, 10.0);
        db.append(600, 20.0);
    }

    let engine = QueryEngine::new(store);
    let rows = engine
        .historic_data(&[old.clone(), new.clone()], 300, 900, 300)
        .unwrap();
    assert_eq!(rows[&300][&old], 1.0);
    assert_eq!(rows[&300][&new], 10.0);
    assert_eq!(rows[&600][&old], 2.0);
    assert_eq!(rows[&600][&new], 20.0);
}
