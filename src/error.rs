//! Error types for the rotunda persistence engine.

use thiserror::Error;

use crate::channel::ChannelAddress;

/// The main error type for all rotunda operations.
///
/// This enum covers all error conditions that can occur from store creation
/// through ingest, migration, and queries. Out-of-order writes are
/// deliberately *not* represented here: they are dropped and counted by the
/// writer, never surfaced as errors.
#[derive(Error, Debug)]
pub enum RotundaError {
    /// Error reading or writing a round-robin database file.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Error opening or creating the archive store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error migrating a database to the latest schema version.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Error during a query operation.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Errors raised by the round-robin database file layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to create or open a database file.
    #[error("failed to open database '{path}': {source}")]
    OpenFailed {
        /// The database file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping the database file failed.
    #[error("memory mapping failed for '{path}': {source}")]
    MemoryMap {
        /// The file path that failed to map.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to sync the database file to disk.
    #[error("failed to sync '{path}' to disk: {source}")]
    SyncFailed {
        /// The database file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The database file is corrupted or has an invalid format.
    #[error("database '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The database file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The archive definition passed to `create` is invalid.
    #[error("invalid archive definition: {reason}")]
    InvalidDefinition {
        /// What makes the definition invalid.
        reason: String,
    },
}

/// Errors raised when opening or maintaining the archive store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store directory could not be created or accessed.
    #[error("failed to access store directory '{path}': {source}")]
    DirectoryAccess {
        /// The path that could not be accessed.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The metadata file (meta.json) is corrupted or invalid.
    #[error("corrupted metadata file: {reason}")]
    CorruptedMetadata {
        /// Description of what was invalid about the metadata.
        reason: String,
    },

    /// Failed to serialize or parse store metadata.
    #[error("failed to serialize metadata: {0}")]
    MetadataSerialize(#[from] serde_json::Error),
}

/// Errors raised by the schema-version migrator.
///
/// The canonical database path is never left in a partial state: the atomic
/// rename of the `*.tmp` sibling is the only visible state transition.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Reading the old database or writing the upgraded copy failed.
    #[error("migration step v{from_version} -> v{to_version} failed for '{path}': {source}")]
    StepFailed {
        /// The schema version being migrated from.
        from_version: u32,
        /// The schema version being migrated to.
        to_version: u32,
        /// The canonical database path.
        path: String,
        /// The underlying database error.
        #[source]
        source: Box<DatabaseError>,
    },

    /// Renaming the temp file over the canonical path failed.
    #[error("failed to rename '{tmp}' over '{path}': {source}")]
    RenameFailed {
        /// The temp file path.
        tmp: String,
        /// The canonical database path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The embedded schema version is newer than any known version.
    #[error("database '{path}' has unknown schema version {version}")]
    UnknownVersion {
        /// The canonical database path.
        path: String,
        /// The embedded version tag.
        version: u32,
    },
}

/// Errors raised by query operations.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The time range is invalid (from >= to).
    #[error("invalid time range: from {from} >= to {to}")]
    InvalidTimeRange {
        /// The start of the requested range.
        from: i64,
        /// The end of the requested range.
        to: i64,
    },

    /// The requested resolution is not an exact multiple of the archive step.
    #[error("resolution {resolution}s is not divisible by archive step {step}s")]
    IndivisibleResolution {
        /// The requested resolution in seconds.
        resolution: i64,
        /// The archive's native step in seconds.
        step: i64,
    },

    /// None of the requested channels could be read.
    ///
    /// This is the only case where a batch query fails outward instead of
    /// returning partial data.
    #[error("none of the requested channels is available: {channels:?}")]
    AllChannelsUnavailable {
        /// The channels that all failed.
        channels: Vec<ChannelAddress>,
    },

    /// The database for a single requested channel is missing.
    #[error("database for channel {address} is missing")]
    DatabaseMissing {
        /// The channel whose database does not exist.
        address: ChannelAddress,
    },
}

/// Type alias for `Result<T, RotundaError>`.
pub type Result<T> = std::result::Result<T, RotundaError>;
