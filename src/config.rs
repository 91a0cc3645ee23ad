//! Runtime configuration for the persistence service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::PersistencePriority;
use crate::error::{Result, RotundaError, StoreError};

/// Default native step in seconds between persisted samples.
pub const DEFAULT_STEP_SECONDS: u32 = 300;

/// Default capacity of the bounded write queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5_000;

/// Service configuration.
///
/// Deserialized from JSON; every field except `data_dir` and `database_id`
/// has a default, so a minimal config file only names where the archives
/// live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory under which all channel databases are stored.
    pub data_dir: PathBuf,
    /// Identifier of this database within the store; becomes the first path
    /// component below `data_dir`.
    pub database_id: String,
    /// Native step in seconds. Collection runs once per step.
    #[serde(default = "default_step")]
    pub step_seconds: u32,
    /// Capacity of the bounded write queue between collector and writer.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Channels below this persistence priority are not collected.
    #[serde(default)]
    pub min_priority: PersistencePriority,
}

fn default_step() -> u32 {
    DEFAULT_STEP_SECONDS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Config {
    /// Creates a configuration with default step, queue capacity and
    /// priority threshold.
    pub fn new(data_dir: impl Into<PathBuf>, database_id: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_id: database_id.into(),
            step_seconds: DEFAULT_STEP_SECONDS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_priority: PersistencePriority::default(),
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| {
            RotundaError::Store(StoreError::DirectoryAccess {
                path: path.display().to_string(),
                source,
            })
        })?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|source| RotundaError::Store(StoreError::MetadataSerialize(source)))?;
        Ok(config)
    }
}
