//! Archive store: one round-robin database file per channel.
//!
//! The store owns the directory tree and the cache of open databases. Files
//! are created lazily when the first sample for a channel arrives and opened
//! lazily when a query touches a channel; opening runs any pending schema
//! migration first.
//!
//! # File Layout
//!
//! ```text
//! data_dir/
//! ├── meta.json                      <- Store metadata
//! └── <database_id>/
//!     └── <component_id>/
//!         ├── <channel_id>.rrd       <- One database per channel
//!         └── ...
//! ```
//!
//! # Thread Safety
//!
//! The cache is sharded across a fixed number of mutexes keyed by channel
//! address, so the single writer and concurrent readers contend only within
//! a shard. Each open database sits behind its own mutex.

use std::collections::HashMap;
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::{ChannelAddress, Unit};
use crate::config::Config;
use crate::database::RrdDatabase;
use crate::error::{Result, StoreError};
use crate::policy::ArchiveDefinition;
use crate::version::{self, LATEST_SCHEMA_VERSION};

/// Metadata file format version.
const METADATA_VERSION: u32 = 1;

/// Name of the metadata file in the store directory.
const METADATA_FILE: &str = "meta.json";

/// File extension of channel database files.
const DB_EXTENSION: &str = "rrd";

/// Number of cache shards.
const SHARD_COUNT: usize = 16;

/// A channel database behind its per-channel lock.
pub type SharedDatabase = Arc<Mutex<RrdDatabase>>;

/// Metadata stored in the store's meta.json file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreMetadata {
    /// Metadata format version.
    version: u32,
    /// Native step in seconds new databases are created with.
    step_seconds: u32,
}

/// Store of per-channel round-robin databases below one directory.
#[derive(Debug)]
pub struct ArchiveStore {
    /// Root data directory (holds meta.json).
    root: PathBuf,
    /// Directory of this database id below the root.
    database_dir: PathBuf,
    /// Native step in seconds for newly created databases.
    step_seconds: u32,
    /// Sharded cache of open databases.
    shards: Vec<Mutex<HashMap<ChannelAddress, SharedDatabase>>>,
}

impl ArchiveStore {
    /// Opens the store below `config.data_dir`, creating the directory tree
    /// and metadata file on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directories cannot be created or the
    /// metadata file is invalid.
    pub fn open(config: &Config) -> Result<Self> {
        let root = config.data_dir.clone();
        let database_dir = root.join(&config.database_id);
        fs::create_dir_all(&database_dir).map_err(|source| StoreError::DirectoryAccess {
            path: database_dir.to_string_lossy().to_string(),
            source,
        })?;

        let meta_path = root.join(METADATA_FILE);
        if meta_path.exists() {
            let metadata = Self::read_metadata(&meta_path)?;
            if metadata.step_seconds != config.step_seconds {
                // Existing databases keep the step in their own header; only
                // newly created files pick up the configured step.
                warn!(
                    stored = metadata.step_seconds,
                    configured = config.step_seconds,
                    "store step differs from configuration"
                );
            }
        } else {
            Self::write_metadata(
                &meta_path,
                &StoreMetadata {
                    version: METADATA_VERSION,
                    step_seconds: config.step_seconds,
                },
            )?;
        }

        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Ok(Self {
            root,
            database_dir,
            step_seconds: config.step_seconds,
            shards,
        })
    }

    fn read_metadata(path: &Path) -> Result<StoreMetadata> {
        let contents = fs::read_to_string(path).map_err(|source| StoreError::DirectoryAccess {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        let metadata: StoreMetadata =
            serde_json::from_str(&contents).map_err(StoreError::MetadataSerialize)?;
        if metadata.version != METADATA_VERSION {
            return Err(StoreError::CorruptedMetadata {
                reason: format!(
                    "unsupported metadata version: expected {METADATA_VERSION}, found {}",
                    metadata.version
                ),
            }
            .into());
        }
        Ok(metadata)
    }

    fn write_metadata(path: &Path, metadata: &StoreMetadata) -> Result<()> {
        let contents =
            serde_json::to_string_pretty(metadata).map_err(StoreError::MetadataSerialize)?;
        fs::write(path, contents).map_err(|source| {
            StoreError::DirectoryAccess {
                path: path.to_string_lossy().to_string(),
                source,
            }
            .into()
        })
    }

    /// Returns the root data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the native step in seconds for newly created databases.
    pub fn step_seconds(&self) -> u32 {
        self.step_seconds
    }

    /// Returns the file path of a channel's database.
    pub fn database_path(&self, address: &ChannelAddress) -> PathBuf {
        self.database_dir
            .join(&address.component_id)
            .join(format!("{}.{DB_EXTENSION}", address.channel_id))
    }

    fn shard(&self, address: &ChannelAddress) -> &Mutex<HashMap<ChannelAddress, SharedDatabase>> {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)] // modulo shard count
        let index = (hasher.finish() as usize) % SHARD_COUNT;
        &self.shards[index]
    }

    /// Returns the database for a channel, creating the file if it does not
    /// exist yet.
    ///
    /// A new database is laid out for the channel's `unit` at the store's
    /// native step. An existing file is migrated to the latest schema
    /// version before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DatabaseError`] or
    /// [`crate::error::MigrationError`] if opening, creating or upgrading
    /// the file fails.
    pub fn get_or_create(&self, address: &ChannelAddress, unit: Unit) -> Result<SharedDatabase> {
        let mut shard = self.shard(address).lock();
        if let Some(db) = shard.get(address) {
            return Ok(Arc::clone(db));
        }

        let path = self.database_path(address);
        let db = if path.exists() {
            version::open_latest(&path)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| StoreError::DirectoryAccess {
                    path: parent.to_string_lossy().to_string(),
                    source,
                })?;
            }
            debug!(channel = %address, path = %path.display(), "creating channel database");
            let definition = ArchiveDefinition::for_unit(unit, self.step_seconds);
            RrdDatabase::create(&path, LATEST_SCHEMA_VERSION, &definition)?
        };

        let db = Arc::new(Mutex::new(db));
        shard.insert(address.clone(), Arc::clone(&db));
        Ok(db)
    }

    /// Returns the database for a channel if its file exists, migrating it
    /// to the latest schema version first. Never creates a file; queries
    /// for never-written channels see `None`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::DatabaseError`] or
    /// [`crate::error::MigrationError`] if opening or upgrading fails.
    pub fn get_existing(&self, address: &ChannelAddress) -> Result<Option<SharedDatabase>> {
        let mut shard = self.shard(address).lock();
        if let Some(db) = shard.get(address) {
            return Ok(Some(Arc::clone(db)));
        }
        let path = self.database_path(address);
        if !path.exists() {
            return Ok(None);
        }
        let db = Arc::new(Mutex::new(version::open_latest(&path)?));
        shard.insert(address.clone(), Arc::clone(&db));
        Ok(Some(Arc::clone(&db)))
    }

    /// Flushes every open database to disk.
    ///
    /// # Errors
    ///
    /// Returns the first [`crate::error::DatabaseError::SyncFailed`]
    /// encountered; remaining databases are still flushed.
    pub fn flush_all(&self) -> Result<()> {
        let mut first_err = None;
        for shard in &self.shards {
            for db in shard.lock().values() {
                if let Err(e) = db.lock().flush() {
                    warn!(error = %e, "flush failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config::new(dir.path(), "edge0")
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::open(&test_config(&dir)).unwrap();
        assert!(dir.path().join("meta.json").exists());
        assert!(dir.path().join("edge0").is_dir());
        assert_eq!(store.step_seconds(), 300);
    }

    #[test]
    fn test_get_or_create_then_reopen() {
        let dir = TempDir::new().unwrap();
        let addr = ChannelAddress::new("meter0", "ActivePower");
        {
            let store = ArchiveStore::open(&test_config(&dir)).unwrap();
            let db = store.get_or_create(&addr, Unit::Watt).unwrap();
            db.lock().append(300, 5.0);
            db.lock().flush().unwrap();
        }
        let store = ArchiveStore::open(&test_config(&dir)).unwrap();
        let db = store.get_existing(&addr).unwrap().unwrap();
        assert_eq!(db.lock().value_at(0, 300), 5.0);
    }

    #[test]
    fn test_get_or_create_returns_same_handle() {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::open(&test_config(&dir)).unwrap();
        let addr = ChannelAddress::new("meter0", "ActivePower");
        let a = store.get_or_create(&addr, Unit::Watt).unwrap();
        let b = store.get_or_create(&addr, Unit::Watt).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_existing_never_creates() {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::open(&test_config(&dir)).unwrap();
        let addr = ChannelAddress::new("meter9", "Nothing");
        assert!(store.get_existing(&addr).unwrap().is_none());
        assert!(!store.database_path(&addr).exists());
    }

    #[test]
    fn test_database_path_layout() {
        let dir = TempDir::new().unwrap();
        let store = ArchiveStore::open(&test_config(&dir)).unwrap();
        let addr = ChannelAddress::new("meter0", "ActivePower");
        let path = store.database_path(&addr);
        assert_eq!(
            path,
            dir.path().join("edge0").join("meter0").join("ActivePower.rrd")
        );
    }

    #[test]
    fn test_corrupted_metadata_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("meta.json"), "{not json").unwrap();
        assert!(ArchiveStore::open(&test_config(&dir)).is_err());
    }
}
