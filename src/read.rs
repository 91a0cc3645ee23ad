//! Query engine over the archive store.
//!
//! Queries pick, per channel, the finest archive whose committed window
//! still covers the start of the requested range, fetch bucket values at
//! that archive's step and resample them to the requested resolution.
//! Batch queries return partial results: a channel whose database is
//! missing or unreadable contributes NaN, and only when *every* requested
//! channel is unavailable does the query fail.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::channel::ChannelAddress;
use crate::database::RrdDatabase;
use crate::error::{QueryError, Result};
use crate::policy::truncate;
use crate::resample::resample;
use crate::store::ArchiveStore;

/// Time series rows keyed by timestamp, one value per requested channel.
pub type DataRows = BTreeMap<i64, HashMap<ChannelAddress, f64>>;

/// Read-side facade over the archive store.
#[derive(Debug)]
pub struct QueryEngine {
    store: Arc<ArchiveStore>,
}

impl QueryEngine {
    /// Creates a query engine over `store`.
    pub fn new(store: Arc<ArchiveStore>) -> Self {
        Self { store }
    }

    /// Queries historic data for `channels` in `[from, to)` at `resolution`
    /// seconds per row.
    ///
    /// Rows are keyed by the start of each resolution period. Channels
    /// whose database cannot be read appear as NaN in every row.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] for an empty range,
    /// [`QueryError::IndivisibleResolution`] if the resolution does not
    /// divide evenly against the chosen archive step, and
    /// [`QueryError::AllChannelsUnavailable`] when no channel could be
    /// read.
    pub fn historic_data(
        &self,
        channels: &[ChannelAddress],
        from: i64,
        to: i64,
        resolution: i64,
    ) -> Result<DataRows> {
        validate_range(from, to)?;
        let mut rows: DataRows = DataRows::new();
        let mut unavailable = Vec::new();

        for address in channels {
            let Some(db) = self.lookup(address, &mut unavailable) else {
                continue;
            };
            let db = db.lock();
            let archive = select_archive(&db, from);
            let arc_step = db.archive_step(archive);
            let values = match resample(&db.fetch(archive, from, to), arc_step, resolution) {
                Ok(values) => values,
                Err(e) => {
                    warn!(channel = %address, error = %e, "cannot resample channel to resolution");
                    unavailable.push(address.clone());
                    continue;
                }
            };
            let base = truncate(from, arc_step);
            for (i, value) in values.iter().enumerate() {
                let t = base + (i as i64) * resolution;
                if t >= truncate(from, resolution) && t < to {
                    rows.entry(t).or_default().insert(address.clone(), *value);
                }
            }
        }

        fail_if_all_unavailable(channels, &unavailable)?;
        fill_unavailable(&mut rows, &unavailable);
        Ok(rows)
    }

    /// Queries the energy of each channel over `[from, to]`: the last known
    /// value at or before `to` minus the last known value at or before
    /// `from`.
    ///
    /// For monotonically increasing counters this is the consumption of the
    /// range, including consumption recorded exactly on the boundaries. A
    /// channel first seen inside the range contributes from its first known
    /// value; a channel with no known value yields NaN.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] or
    /// [`QueryError::AllChannelsUnavailable`].
    pub fn historic_energy(
        &self,
        channels: &[ChannelAddress],
        from: i64,
        to: i64,
    ) -> Result<HashMap<ChannelAddress, f64>> {
        validate_range(from, to)?;
        let mut energies = HashMap::new();
        let mut unavailable = Vec::new();

        for address in channels {
            let Some(db) = self.lookup(address, &mut unavailable) else {
                continue;
            };
            let db = db.lock();
            let archive = select_archive(&db, from);
            energies.insert(address.clone(), energy_delta(&db, archive, from, to));
        }

        fail_if_all_unavailable(channels, &unavailable)?;
        for address in &unavailable {
            energies.insert(address.clone(), f64::NAN);
        }
        Ok(energies)
    }

    /// Queries per-period energy: for each period of `resolution` seconds
    /// in `[from, to)`, the delta between the last known values at the
    /// period boundaries. Period deltas tile, so summing them yields the
    /// overall [`historic_energy`](Self::historic_energy) of the range.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] or
    /// [`QueryError::AllChannelsUnavailable`].
    pub fn historic_energy_per_period(
        &self,
        channels: &[ChannelAddress],
        from: i64,
        to: i64,
        resolution: i64,
    ) -> Result<DataRows> {
        validate_range(from, to)?;
        let mut rows: DataRows = DataRows::new();
        let mut unavailable = Vec::new();

        for address in channels {
            let Some(db) = self.lookup(address, &mut unavailable) else {
                continue;
            };
            let db = db.lock();
            let archive = select_archive(&db, from);
            let mut period = truncate(from, resolution);
            while period < to {
                let delta = energy_delta(&db, archive, period, (period + resolution).min(to));
                rows.entry(period)
                    .or_default()
                    .insert(address.clone(), delta);
                period += resolution;
            }
        }

        fail_if_all_unavailable(channels, &unavailable)?;
        fill_unavailable(&mut rows, &unavailable);
        Ok(rows)
    }

    /// Returns the most recent known sample of a channel as
    /// `(timestamp, value)`, or `None` if every stored slot is unknown.
    ///
    /// This also serves channels that are no longer part of any active
    /// component: the unit and archive layout live in the file header, so
    /// any channel with a database on disk stays queryable after its
    /// component is removed from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::DatabaseMissing`] if the channel has never
    /// been written.
    pub fn latest_value(&self, address: &ChannelAddress) -> Result<Option<(i64, f64)>> {
        let db = self
            .store
            .get_existing(address)?
            .ok_or_else(|| QueryError::DatabaseMissing {
                address: address.clone(),
            })?;
        let db = db.lock();
        Ok(db.last_sample())
    }

    /// Collects the timestamps after `since` (exclusive) at which a channel
    /// has a known, non-zero value, scanning archives fine to coarse.
    ///
    /// Used to find data recorded while an upstream connection was down: the
    /// fine archive contributes everything it still covers, coarser archives
    /// fill in only the older part already rotated out of the finer ones.
    /// Zero is skipped alongside NaN because the tracking channel stores
    /// zero for "already sent".
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::DatabaseMissing`] if the channel has never
    /// been written.
    pub fn resend_timeranges(&self, address: &ChannelAddress, since: i64) -> Result<Timeranges> {
        let db = self
            .store
            .get_existing(address)?
            .ok_or_else(|| QueryError::DatabaseMissing {
                address: address.clone(),
            })?;
        let db = db.lock();

        let mut timeranges = Timeranges::new();
        // Exclusive lower bound of the region already covered by finer
        // archives.
        let mut covered_from = i64::MAX;
        for archive in 0..db.archives().len() {
            let Some((oldest, latest)) = db.archive_window(archive) else {
                continue;
            };
            let arc_step = db.archive_step(archive);
            let mut t = oldest.max(truncate(since, arc_step) + arc_step);
            while t <= latest {
                if t < covered_from && t > since {
                    let v = db.value_at(archive, t);
                    if !v.is_nan() && v != 0.0 {
                        timeranges.insert(t);
                    }
                }
                t += arc_step;
            }
            covered_from = covered_from.min(oldest);
        }
        Ok(timeranges)
    }

    /// Queries data for resending over `[from, to]`, both inclusive.
    ///
    /// Unlike [`QueryEngine::historic_data`] the values keep the archive's
    /// own step, each timestamp is shifted to the *end* of its bucket so
    /// coarse samples are attributed to the moment they were complete, and
    /// unknown values are omitted instead of sent as NaN.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidTimeRange`] or
    /// [`QueryError::AllChannelsUnavailable`].
    pub fn resend_data(
        &self,
        channels: &[ChannelAddress],
        from: i64,
        to: i64,
    ) -> Result<DataRows> {
        validate_range(from, to + 1)?;
        let mut rows: DataRows = DataRows::new();
        let mut unavailable = Vec::new();

        for address in channels {
            let Some(db) = self.lookup(address, &mut unavailable) else {
                continue;
            };
            let db = db.lock();
            let archive = select_archive(&db, from);
            let arc_step = db.archive_step(archive);
            let adjust = arc_step - db.step();
            let mut t = truncate(from, arc_step);
            while t <= to {
                let v = db.value_at(archive, t);
                if !v.is_nan() {
                    rows.entry(t + adjust).or_default().insert(address.clone(), v);
                }
                t += arc_step;
            }
        }

        fail_if_all_unavailable(channels, &unavailable)?;
        Ok(rows)
    }

    fn lookup(
        &self,
        address: &ChannelAddress,
        unavailable: &mut Vec<ChannelAddress>,
    ) -> Option<crate::store::SharedDatabase> {
        match self.store.get_existing(address) {
            Ok(Some(db)) => Some(db),
            Ok(None) => {
                unavailable.push(address.clone());
                None
            }
            Err(e) => {
                warn!(channel = %address, error = %e, "channel unavailable for query");
                unavailable.push(address.clone());
                None
            }
        }
    }
}

/// Ordered set of timestamps, mergeable into contiguous ranges.
#[derive(Debug, Default, Clone)]
pub struct Timeranges {
    timestamps: BTreeSet<i64>,
}

impl Timeranges {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one timestamp.
    pub fn insert(&mut self, timestamp: i64) {
        self.timestamps.insert(timestamp);
    }

    /// Returns `true` if no timestamp was collected.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Merges the timestamps into inclusive `(start, end)` ranges, joining
    /// neighbors no further than `max_gap` seconds apart.
    pub fn ranges(&self, max_gap: i64) -> Vec<(i64, i64)> {
        let mut ranges = Vec::new();
        let mut current: Option<(i64, i64)> = None;
        for &t in &self.timestamps {
            match current {
                Some((start, end)) if t - end <= max_gap => current = Some((start, t)),
                Some(range) => {
                    ranges.push(range);
                    current = Some((t, t));
                }
                None => current = Some((t, t)),
            }
        }
        if let Some(range) = current {
            ranges.push(range);
        }
        ranges
    }
}

fn validate_range(from: i64, to: i64) -> Result<()> {
    if from >= to {
        return Err(QueryError::InvalidTimeRange { from, to }.into());
    }
    Ok(())
}

fn fail_if_all_unavailable(channels: &[ChannelAddress], unavailable: &[ChannelAddress]) -> Result<()> {
    if !channels.is_empty() && unavailable.len() == channels.len() {
        return Err(QueryError::AllChannelsUnavailable {
            channels: unavailable.to_vec(),
        }
        .into());
    }
    Ok(())
}

fn fill_unavailable(rows: &mut DataRows, unavailable: &[ChannelAddress]) {
    if unavailable.is_empty() {
        return;
    }
    for row in rows.values_mut() {
        for address in unavailable {
            row.insert(address.clone(), f64::NAN);
        }
    }
}

/// Picks the finest archive whose committed window still covers `from`,
/// falling back to the coarsest.
fn select_archive(db: &RrdDatabase, from: i64) -> usize {
    for archive in 0..db.archives().len() {
        if let Some((oldest, _)) = db.archive_window(archive)
            && oldest <= from
        {
            return archive;
        }
    }
    db.archives().len() - 1
}

/// Counter delta over `[from, to]`: the last known value at or before `to`
/// minus the last known value at or before `from`. A channel first seen
/// inside the range falls back to its first known value, so the delta counts
/// from the earliest available reading. NaN when no known value exists at or
/// before `to`.
fn energy_delta(db: &RrdDatabase, archive: usize, from: i64, to: i64) -> f64 {
    let Some(last) = last_value_at_or_before(db, archive, to) else {
        return f64::NAN;
    };
    let base = last_value_at_or_before(db, archive, from)
        .or_else(|| first_value_after(db, archive, from, to));
    match base {
        Some(base) => last - base,
        None => f64::NAN,
    }
}

/// Scans backward from the bucket holding `t` to the oldest committed bucket
/// and returns the first known value, or `None` if all are unknown.
fn last_value_at_or_before(db: &RrdDatabase, archive: usize, t: i64) -> Option<f64> {
    let (oldest, latest) = db.archive_window(archive)?;
    let arc_step = db.archive_step(archive);
    let mut bucket = truncate(t, arc_step).min(latest);
    while bucket >= oldest {
        let value = db.value_at(archive, bucket);
        if !value.is_nan() {
            return Some(value);
        }
        bucket -= arc_step;
    }
    None
}

/// Scans forward through `(from, to]` and returns the first known value,
/// or `None` if all are unknown.
fn first_value_after(db: &RrdDatabase, archive: usize, from: i64, to: i64) -> Option<f64> {
    let (oldest, latest) = db.archive_window(archive)?;
    let arc_step = db.archive_step(archive);
    let mut bucket = (truncate(from, arc_step) + arc_step).max(oldest);
    let end = truncate(to, arc_step).min(latest);
    while bucket <= end {
        let value = db.value_at(archive, bucket);
        if !value.is_nan() {
            return Some(value);
        }
        bucket += arc_step;
    }
    None
}
