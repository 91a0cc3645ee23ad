//! # rotunda
//!
//! Per-channel round-robin persistence engine for periodic monitoring data.
//!
//! rotunda stores the channels of an energy/monitoring system — one
//! fixed-size, memory-mapped round-robin database file per channel — and
//! answers historic data, energy and latest-value queries over them. It is
//! built for edge devices that sample hundreds of channels every few
//! minutes and must never grow their disk footprint with uptime.
//!
//! ## Key Properties
//!
//! - One file per channel, created lazily on the first sample
//! - Bounded storage — three archive tiers (fine/medium/coarse) with fixed
//!   row counts, coarser tiers consolidated at write time
//! - Collection decoupled from disk I/O by a bounded queue and a single
//!   writer thread; overload sheds records and raises health flags instead
//!   of blocking the sampling loop
//! - Lazy schema migration: old archive layouts are upgraded atomically the
//!   first time they are opened
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rotunda::{ChannelAddress, Config, DataRecord, TimedataService, Unit};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new("./data", "edge0");
//! let service = TimedataService::start(&config)?;
//!
//! // Ingest one sample
//! let address = ChannelAddress::new("meter0", "ActivePower");
//! service.submit(DataRecord {
//!     timestamp: 1_700_000_100,
//!     address: address.clone(),
//!     unit: Unit::Watt,
//!     value: 2_350.0,
//! });
//!
//! // Query it back at 300s resolution
//! let rows = service
//!     .query()
//!     .historic_data(&[address], 1_700_000_000, 1_700_003_600, 300)?;
//! for (timestamp, values) in rows {
//!     println!("{timestamp}: {values:?}");
//! }
//!
//! service.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`TimedataService`] — Lifecycle facade; starts the writer thread, owns
//!   the store
//! - [`Collector`] — Reduces live channel values to one record per step
//! - [`QueryEngine`] — Historic data/energy queries with archive selection
//!   and resampling
//! - [`ArchiveStore`] — Directory of per-channel database files
//! - [`RrdDatabase`] — Raw memory-mapped round-robin file format
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`service`] — Service lifecycle and ingest
//! - [`collector`] — Channel snapshots and periodic collection
//! - [`queue`] — Bounded collector-to-writer handoff
//! - [`writer`] — Queue drain and ordering enforcement
//! - [`store`] — Store directory and database cache
//! - [`database`] — Memory-mapped database file format
//! - [`version`] — Archive layout schema versions and migration
//! - [`policy`] — Unit-to-archive policy table and aggregate functions
//! - [`resample`] — Resolution conversion of fetched data
//! - [`read`] — Query engine
//! - [`health`] — Pipeline health flags
//! - [`channel`] — Channel addresses, units, records
//! - [`config`] — Service configuration
//! - [`error`] — Error types

pub mod channel;
pub mod collector;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod policy;
pub mod queue;
pub mod read;
pub mod resample;
pub mod service;
pub mod store;
pub mod version;
pub mod writer;

// Re-export primary API types at crate root for convenience.
pub use channel::{ChannelAddress, DataRecord, PersistencePriority, SampleValue, Unit};
pub use collector::{ChannelSnapshot, ChannelSource, Collector};
pub use config::Config;
pub use database::RrdDatabase;
pub use error::{Result, RotundaError};
pub use health::Health;
pub use read::{QueryEngine, Timeranges};
pub use service::TimedataService;
pub use store::ArchiveStore;
