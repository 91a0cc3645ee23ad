//! Archive layout schema versions and on-open migration.
//!
//! The schema version embedded in every database header tracks the archive
//! *layout* generation, not the file format. When the layout changes, old
//! files are upgraded lazily the first time they are opened: the fine
//! archive of the old file is replayed into a freshly created file at a
//! `*.tmp` sibling path, which then atomically replaces the original. A
//! crash mid-migration leaves the canonical path untouched; the stale temp
//! file is deleted on the next attempt.

use std::path::Path;

use tracing::{info, warn};

use crate::error::{MigrationError, Result, RotundaError};
use crate::policy::{
    ArchiveDefinition, ArchiveSpec, COARSE_FACTOR, COARSE_ROWS, DatasourcePolicy, FINE_ROWS,
    MEDIUM_FACTOR, MEDIUM_ROWS,
};
use crate::database::RrdDatabase;

/// First schema generation: a fine archive plus a single 12× tier.
pub const SCHEMA_V1: u32 = 1;

/// Current schema generation: fine, 5× medium and 60× coarse tiers.
pub const SCHEMA_V2: u32 = 2;

/// The schema version new databases are created with.
pub const LATEST_SCHEMA_VERSION: u32 = SCHEMA_V2;

/// Returns the archive definition of a schema version for the given
/// datasource, or `None` for an unknown version.
pub fn layout(
    schema_version: u32,
    datasource: DatasourcePolicy,
    step_seconds: u32,
) -> Option<ArchiveDefinition> {
    let archives = match schema_version {
        SCHEMA_V1 => vec![
            ArchiveSpec {
                aggregate: datasource.aggregate,
                step_factor: 1,
                row_count: FINE_ROWS,
            },
            ArchiveSpec {
                aggregate: datasource.aggregate,
                step_factor: 12,
                row_count: 8_016,
            },
        ],
        SCHEMA_V2 => vec![
            ArchiveSpec {
                aggregate: datasource.aggregate,
                step_factor: 1,
                row_count: FINE_ROWS,
            },
            ArchiveSpec {
                aggregate: datasource.aggregate,
                step_factor: MEDIUM_FACTOR,
                row_count: MEDIUM_ROWS,
            },
            ArchiveSpec {
                aggregate: datasource.aggregate,
                step_factor: COARSE_FACTOR,
                row_count: COARSE_ROWS,
            },
        ],
        _ => return None,
    };
    Some(ArchiveDefinition {
        step_seconds,
        datasource,
        archives,
    })
}

/// Returns `true` if the database already carries the latest schema
/// version.
pub fn is_up_to_date(db: &RrdDatabase) -> bool {
    db.schema_version() == LATEST_SCHEMA_VERSION
}

/// Opens the database at `path`, upgrading it to the latest schema version
/// first if needed.
///
/// The caller must hold the store's per-channel lock for `path`; migration
/// replaces the file underneath any other reader.
///
/// # Errors
///
/// Returns [`MigrationError::UnknownVersion`] for a file from a newer
/// schema generation, [`MigrationError::StepFailed`] if replaying the data
/// fails, or [`MigrationError::RenameFailed`] if the final atomic rename
/// fails.
pub fn open_latest<P: AsRef<Path>>(path: P) -> Result<RrdDatabase> {
    let path = path.as_ref();
    let mut db = RrdDatabase::open(path)?;
    while !is_up_to_date(&db) {
        db = migrate_step(path, db)?;
    }
    Ok(db)
}

/// Runs one migration step from the database's current version to the next.
fn migrate_step(path: &Path, old: RrdDatabase) -> Result<RrdDatabase> {
    let from_version = old.schema_version();
    let to_version = from_version + 1;
    if from_version > LATEST_SCHEMA_VERSION {
        return Err(MigrationError::UnknownVersion {
            path: path.to_string_lossy().to_string(),
            version: from_version,
        }
        .into());
    }

    let path_str = path.to_string_lossy().to_string();
    let tmp = path.with_extension("tmp");
    // A stale temp file is the residue of a crashed earlier attempt.
    if tmp.exists() {
        warn!(path = %tmp.display(), "removing stale migration temp file");
        let _ = std::fs::remove_file(&tmp);
    }

    let step = old.step();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // stored as u32
    let definition = layout(to_version, old.datasource(), step as u32).ok_or_else(|| {
        MigrationError::UnknownVersion {
            path: path_str.clone(),
            version: to_version,
        }
    })?;

    let wrap_step = |e: RotundaError| match e {
        RotundaError::Database(source) => RotundaError::Migration(MigrationError::StepFailed {
            from_version,
            to_version,
            path: path_str.clone(),
            source: Box::new(source),
        }),
        other => other,
    };

    let mut upgraded = RrdDatabase::create(&tmp, to_version, &definition).map_err(&wrap_step)?;

    // Replay the fine archive; NaN slots are recreated by gap filling.
    if let Some((oldest, latest)) = old.archive_window(0) {
        let mut t = oldest;
        while t <= latest {
            let v = old.value_at(0, t);
            if !v.is_nan() {
                upgraded.append(t, v);
            }
            t += step;
        }
    }
    upgraded.flush().map_err(&wrap_step)?;
    drop(upgraded);
    drop(old);

    std::fs::rename(&tmp, path).map_err(|source| MigrationError::RenameFailed {
        tmp: tmp.to_string_lossy().to_string(),
        path: path_str.clone(),
        source,
    })?;

    info!(path = %path.display(), from_version, to_version, "migrated database schema");
    RrdDatabase::open(path)
}
