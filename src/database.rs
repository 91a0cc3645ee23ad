//! Memory-mapped round-robin database files, one per channel.
//!
//! Each channel database is a fixed-size file holding one datasource and a
//! set of circular archives at increasing resolutions. A sample appended at
//! the native step lands in the fine archive directly and is folded into the
//! coarser archives through per-archive accumulators that live in the file
//! header, so consolidation state survives restarts.
//!
//! # File Format
//!
//! ```text
//! [0..96)            Header (RrdHeader)
//! [96..96+N*48)      Archive headers (N = archive_count, ArchiveHeader each)
//! [96+N*48..)        Archive data regions, fine to coarse (row_count f64
//!                    slots each, NaN-initialized)
//! ```
//!
//! # Safety
//!
//! This module uses unsafe operations for direct memory access to the mmap'd
//! region. All offsets are computed from the validated layout during
//! create/open; every unsafe block documents the bound it relies on.

use std::fs::OpenOptions;
use std::path::Path;
use std::ptr;

use memmap2::MmapMut;

use crate::error::{DatabaseError, Result};
use crate::policy::{AggregateFn, ArchiveDefinition, ArchiveSpec, DatasourcePolicy, truncate};

/// Magic bytes identifying a rotunda database file.
const RRD_MAGIC: [u8; 4] = *b"RTDA";

/// Current file format version. Independent of the schema version, which
/// tracks the archive *layout* and is handled by the migrator.
const FORMAT_VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 96;

/// Size of each archive header in bytes.
const ARCHIVE_HEADER_SIZE: usize = 48;

/// Size of one data slot in bytes.
const SLOT_SIZE: usize = 8;

/// Sentinel for "no sample appended yet" in the `last_update` field.
const NO_UPDATE: i64 = -1;

/// Sentinel for "no bucket accumulating" in an archive's `accum_bucket`.
const NO_BUCKET: i64 = -1;

/// File header. The repr(C) layout keeps every 8-byte field 8-aligned so the
/// whole structure can be read and written through raw pointers into the
/// mapping.
#[repr(C)]
#[derive(Debug, Clone)]
struct RrdHeader {
    /// Magic bytes for file type identification.
    magic: [u8; 4],
    /// File format version.
    format_version: u32,
    /// Archive layout schema version, checked by the migrator.
    schema_version: u32,
    /// Number of archives in this file.
    archive_count: u32,
    /// Native step in seconds.
    step: u32,
    /// Padding so `start_time` is 8-aligned.
    _pad: u32,
    /// Timestamp of the first appended sample, or [`NO_UPDATE`].
    start_time: i64,
    /// Timestamp of the most recent appended sample, or [`NO_UPDATE`].
    last_update: i64,
    /// Datasource minimum bound, NaN for unbounded.
    ds_min: f64,
    /// Datasource maximum bound, NaN for unbounded.
    ds_max: f64,
    /// Reserved space (padding to 96 bytes).
    _reserved: [u8; 40],
}

impl RrdHeader {
    fn new(schema_version: u32, definition: &ArchiveDefinition) -> Self {
        #[allow(clippy::cast_possible_truncation)] // a handful of archives
        let archive_count = definition.archives.len() as u32;
        Self {
            magic: RRD_MAGIC,
            format_version: FORMAT_VERSION,
            schema_version,
            archive_count,
            step: definition.step_seconds,
            _pad: 0,
            start_time: NO_UPDATE,
            last_update: NO_UPDATE,
            ds_min: definition.datasource.min,
            ds_max: definition.datasource.max,
            _reserved: [0; 40],
        }
    }

    /// Validates magic, format version and basic sanity of the counts.
    fn validate(&self, path: &str) -> Result<()> {
        if self.magic != RRD_MAGIC {
            return Err(DatabaseError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "invalid magic bytes: expected {:?}, found {:?}",
                    RRD_MAGIC, self.magic
                ),
            }
            .into());
        }
        if self.format_version != FORMAT_VERSION {
            return Err(DatabaseError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "unsupported format version: expected {}, found {}",
                    FORMAT_VERSION, self.format_version
                ),
            }
            .into());
        }
        if self.archive_count == 0 || self.step == 0 {
            return Err(DatabaseError::Corrupted {
                path: path.to_string(),
                reason: format!(
                    "implausible header: {} archives, step {}s",
                    self.archive_count, self.step
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// Per-archive header holding the layout of one tier and its persistent
/// consolidation accumulator.
#[repr(C)]
#[derive(Debug, Clone)]
struct ArchiveHeader {
    /// On-disk tag of the aggregate function.
    aggregate: u32,
    /// Archive step as a multiple of the native step.
    step_factor: u32,
    /// Number of slots in the circular region.
    row_count: u32,
    /// Number of non-NaN samples accumulated in the current bucket.
    accum_count: u32,
    /// Start timestamp of the bucket being accumulated, or [`NO_BUCKET`].
    accum_bucket: i64,
    /// Running sum of non-NaN samples in the current bucket.
    accum_sum: f64,
    /// Running maximum of non-NaN samples in the current bucket.
    accum_max: f64,
    /// Padding to 48 bytes.
    _pad: u64,
}

impl ArchiveHeader {
    fn new(spec: &ArchiveSpec) -> Self {
        Self {
            aggregate: spec.aggregate.to_tag(),
            step_factor: spec.step_factor,
            row_count: spec.row_count,
            accum_count: 0,
            accum_bucket: NO_BUCKET,
            accum_sum: 0.0,
            accum_max: f64::NEG_INFINITY,
            _pad: 0,
        }
    }
}

const _HEADER_SIZE_OK: () = assert!(size_of::<RrdHeader>() == HEADER_SIZE);
const _ARCHIVE_HEADER_SIZE_OK: () = assert!(size_of::<ArchiveHeader>() == ARCHIVE_HEADER_SIZE);

/// Helper for computing file layout sizes and offsets.
#[derive(Debug, Clone)]
struct DbLayout {
    /// Total file size in bytes.
    file_size: usize,
    /// Byte offset of each archive's data region.
    data_offsets: Vec<usize>,
}

impl DbLayout {
    fn new(archives: &[ArchiveSpec]) -> Self {
        let mut offset = HEADER_SIZE + archives.len() * ARCHIVE_HEADER_SIZE;
        let mut data_offsets = Vec::with_capacity(archives.len());
        for spec in archives {
            data_offsets.push(offset);
            offset += spec.row_count as usize * SLOT_SIZE;
        }
        Self {
            file_size: offset,
            data_offsets,
        }
    }

    /// Byte offset of the archive header at `index`.
    fn archive_header_offset(index: usize) -> usize {
        HEADER_SIZE + index * ARCHIVE_HEADER_SIZE
    }
}

/// One channel's memory-mapped round-robin database.
///
/// # Thread Safety
///
/// The database is single-writer. The store wraps each open database in a
/// mutex; the writer thread is the only caller of the mutating operations.
#[derive(Debug)]
pub struct RrdDatabase {
    /// Memory mapping of the database file.
    mmap: MmapMut,
    /// Pre-computed data region offsets.
    layout: DbLayout,
    /// Immutable archive layout, cached at open for offset-free access.
    archives: Vec<ArchiveSpec>,
    /// Path to the file (for error reporting).
    path: String,
}

impl RrdDatabase {
    /// Creates a new database file for one channel.
    ///
    /// The file is pre-allocated to its final size, all slots initialized to
    /// NaN, and the header written with `last_update` unset.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidDefinition`] for an empty or
    /// inconsistent archive definition, or [`DatabaseError::OpenFailed`] /
    /// [`DatabaseError::MemoryMap`] on I/O failure.
    pub fn create<P: AsRef<Path>>(
        path: P,
        schema_version: u32,
        definition: &ArchiveDefinition,
    ) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        validate_definition(definition)?;
        let layout = DbLayout::new(&definition.archives);

        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DatabaseError::OpenFailed {
                path: path_str.clone(),
                source: e,
            })?;
        file.set_len(layout.file_size as u64)
            .map_err(|e| DatabaseError::OpenFailed {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: The file was just created with the correct size and we hold
        // the only descriptor.
        let mut mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| DatabaseError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        let header = RrdHeader::new(schema_version, definition);
        // SAFETY: The mapping is at least HEADER_SIZE bytes and its base is
        // page-aligned, satisfying RrdHeader's alignment.
        unsafe {
            ptr::write(mmap.as_mut_ptr().cast::<RrdHeader>(), header);
        }

        for (i, spec) in definition.archives.iter().enumerate() {
            let offset = DbLayout::archive_header_offset(i);
            // SAFETY: offset is within the header region sized for
            // archive_count entries, and 48-byte entries at a 96-byte base
            // keep 8-alignment.
            unsafe {
                ptr::write(
                    mmap.as_mut_ptr().add(offset).cast::<ArchiveHeader>(),
                    ArchiveHeader::new(spec),
                );
            }
        }

        let nan_bits = f64::NAN.to_bits();
        for (i, spec) in definition.archives.iter().enumerate() {
            // SAFETY: data_offsets[i] is within the file and 8-aligned by
            // layout construction.
            let slot_ptr = unsafe { mmap.as_mut_ptr().add(layout.data_offsets[i]).cast::<u64>() };
            for row in 0..spec.row_count as usize {
                // SAFETY: row is bounded by the archive's row_count, whose
                // region was pre-allocated.
                unsafe {
                    ptr::write(slot_ptr.add(row), nan_bits);
                }
            }
        }

        Ok(Self {
            mmap,
            layout,
            archives: definition.archives.clone(),
            path: path_str,
        })
    }

    /// Opens an existing database file, validating header and file size.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::OpenFailed`] if the file cannot be opened,
    /// or [`DatabaseError::Corrupted`] if validation fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| DatabaseError::OpenFailed {
                path: path_str.clone(),
                source: e,
            })?;

        // SAFETY: The file was successfully opened with read/write access.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| DatabaseError::MemoryMap {
                path: path_str.clone(),
                source: e,
            })?
        };

        if mmap.len() < HEADER_SIZE {
            return Err(DatabaseError::Corrupted {
                path: path_str,
                reason: format!(
                    "file too small: {} bytes, expected at least {HEADER_SIZE}",
                    mmap.len()
                ),
            }
            .into());
        }

        // SAFETY: The mapping is at least HEADER_SIZE bytes and page-aligned.
        let header = unsafe { ptr::read(mmap.as_ptr().cast::<RrdHeader>()) };
        header.validate(&path_str)?;

        let archive_count = header.archive_count as usize;
        let headers_end = HEADER_SIZE + archive_count * ARCHIVE_HEADER_SIZE;
        if mmap.len() < headers_end {
            return Err(DatabaseError::Corrupted {
                path: path_str,
                reason: format!(
                    "file truncated before archive headers: {} bytes, expected at least \
                     {headers_end}",
                    mmap.len()
                ),
            }
            .into());
        }

        let mut archives = Vec::with_capacity(archive_count);
        for i in 0..archive_count {
            let offset = DbLayout::archive_header_offset(i);
            // SAFETY: offset < headers_end <= mmap.len(), alignment as in
            // create.
            let arc = unsafe { ptr::read(mmap.as_ptr().add(offset).cast::<ArchiveHeader>()) };
            let aggregate =
                AggregateFn::from_tag(arc.aggregate).ok_or_else(|| DatabaseError::Corrupted {
                    path: path_str.clone(),
                    reason: format!("archive {i} has unknown aggregate tag {}", arc.aggregate),
                })?;
            if arc.row_count == 0 || arc.step_factor == 0 {
                return Err(DatabaseError::Corrupted {
                    path: path_str,
                    reason: format!("archive {i} has zero rows or step factor"),
                }
                .into());
            }
            archives.push(ArchiveSpec {
                aggregate,
                step_factor: arc.step_factor,
                row_count: arc.row_count,
            });
        }

        let layout = DbLayout::new(&archives);
        if mmap.len() != layout.file_size {
            return Err(DatabaseError::Corrupted {
                path: path_str,
                reason: format!(
                    "file size mismatch: {} bytes, expected {}",
                    mmap.len(),
                    layout.file_size
                ),
            }
            .into());
        }

        Ok(Self {
            mmap,
            layout,
            archives,
            path: path_str,
        })
    }

    fn header(&self) -> RrdHeader {
        // SAFETY: The mapping was validated during open/create.
        unsafe { ptr::read(self.mmap.as_ptr().cast::<RrdHeader>()) }
    }

    fn archive_header(&self, index: usize) -> ArchiveHeader {
        let offset = DbLayout::archive_header_offset(index);
        // SAFETY: index < archive_count, whose header region was validated.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<ArchiveHeader>()) }
    }

    fn write_archive_header(&mut self, index: usize, header: &ArchiveHeader) {
        let offset = DbLayout::archive_header_offset(index);
        // SAFETY: index < archive_count, whose header region was validated.
        unsafe {
            ptr::write(
                self.mmap.as_mut_ptr().add(offset).cast::<ArchiveHeader>(),
                header.clone(),
            );
        }
    }

    /// Returns the path this database was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the archive layout schema version embedded in the header.
    pub fn schema_version(&self) -> u32 {
        self.header().schema_version
    }

    /// Returns the native step in seconds.
    pub fn step(&self) -> i64 {
        i64::from(self.header().step)
    }

    /// Returns the timestamp of the most recent sample, or `None` if the
    /// database is empty.
    pub fn last_update(&self) -> Option<i64> {
        let last = self.header().last_update;
        (last != NO_UPDATE).then_some(last)
    }

    /// Returns the timestamp of the first sample ever appended, or `None`
    /// if the database is empty.
    pub fn start_time(&self) -> Option<i64> {
        let start = self.header().start_time;
        (start != NO_UPDATE).then_some(start)
    }

    /// Returns the datasource bounds and aggregate function of the fine
    /// archive.
    pub fn datasource(&self) -> DatasourcePolicy {
        let header = self.header();
        DatasourcePolicy {
            min: header.ds_min,
            max: header.ds_max,
            aggregate: self.archives[0].aggregate,
        }
    }

    /// Returns the archive tiers, ordered fine to coarse.
    pub fn archives(&self) -> &[ArchiveSpec] {
        &self.archives
    }

    /// Reconstructs the creation-time definition of this database.
    pub fn definition(&self) -> ArchiveDefinition {
        let header = self.header();
        ArchiveDefinition {
            step_seconds: header.step,
            datasource: self.datasource(),
            archives: self.archives.clone(),
        }
    }

    /// Returns the step in seconds of the archive at `index`.
    pub fn archive_step(&self, index: usize) -> i64 {
        i64::from(self.archives[index].step_factor) * self.step()
    }

    /// Appends a sample at `timestamp`.
    ///
    /// Timestamps must be strictly increasing; a sample at or before the
    /// current `last_update` is ignored (ordering is enforced by the
    /// writer). Values outside the datasource bounds are stored as NaN.
    /// Skipped steps between the previous and the new sample are filled
    /// with NaN so wrapped slots never alias stale data.
    pub fn append(&mut self, timestamp: i64, value: f64) {
        let header = self.header();
        if header.last_update != NO_UPDATE && timestamp <= header.last_update {
            debug_assert!(false, "append must be called with increasing timestamps");
            return;
        }
        let admitted = self.datasource().admit(value);
        let step = i64::from(header.step);

        let slot_ts = truncate(timestamp, step);
        if let Some(last) = self.last_update() {
            self.fill_gap(0, truncate(last, step), slot_ts);
        }
        self.write_slot(0, slot_ts, admitted);

        for index in 1..self.archives.len() {
            self.accumulate(index, timestamp, admitted);
        }

        // SAFETY: The mapping was validated during open/create; we rewrite
        // only the timestamp fields of the header.
        unsafe {
            let header_ptr = self.mmap.as_mut_ptr().cast::<RrdHeader>();
            if (*header_ptr).start_time == NO_UPDATE {
                ptr::write(&raw mut (*header_ptr).start_time, timestamp);
            }
            ptr::write(&raw mut (*header_ptr).last_update, timestamp);
        }
    }

    /// Overwrites the sample at the current `last_update` timestamp.
    ///
    /// Only the fine archive slot is rewritten; consolidation accumulators
    /// keep the originally appended value. Returns `false` if `timestamp`
    /// does not match the last update.
    pub fn overwrite(&mut self, timestamp: i64, value: f64) -> bool {
        match self.last_update() {
            Some(last) if last == timestamp => {
                let admitted = self.datasource().admit(value);
                let slot_ts = truncate(timestamp, self.step());
                self.write_slot(0, slot_ts, admitted);
                true
            }
            _ => false,
        }
    }

    /// Folds a sample into the accumulator of the coarse archive at `index`,
    /// committing the previous bucket when the sample crosses into a new one.
    fn accumulate(&mut self, index: usize, timestamp: i64, value: f64) {
        let arc_step = self.archive_step(index);
        let bucket = truncate(timestamp, arc_step);
        let mut header = self.archive_header(index);

        if header.accum_bucket != NO_BUCKET && bucket != header.accum_bucket {
            let committed = match self.archives[index].aggregate {
                _ if header.accum_count == 0 => f64::NAN,
                AggregateFn::Average => header.accum_sum / f64::from(header.accum_count),
                AggregateFn::Max => header.accum_max,
            };
            let prev_bucket = header.accum_bucket;
            self.fill_gap(index, prev_bucket, bucket);
            self.write_slot(index, prev_bucket, committed);
            header.accum_bucket = NO_BUCKET;
            header.accum_count = 0;
            header.accum_sum = 0.0;
            header.accum_max = f64::NEG_INFINITY;
        }

        header.accum_bucket = bucket;
        if !value.is_nan() {
            header.accum_count += 1;
            header.accum_sum += value;
            header.accum_max = header.accum_max.max(value);
        }
        self.write_archive_header(index, &header);
    }

    /// Fills the slots strictly between two bucket timestamps with NaN.
    ///
    /// The fill is clamped to one full revolution of the archive, so a long
    /// outage costs at most `row_count` writes.
    fn fill_gap(&mut self, index: usize, prev_bucket: i64, new_bucket: i64) {
        let arc_step = self.archive_step(index);
        let rows = i64::from(self.archives[index].row_count);
        let first = (prev_bucket + arc_step).max(new_bucket - rows * arc_step);
        let mut t = first;
        while t < new_bucket {
            self.write_slot(index, t, f64::NAN);
            t += arc_step;
        }
    }

    /// Computes the slot index of a bucket timestamp within an archive.
    fn slot_index(&self, index: usize, bucket_ts: i64) -> usize {
        let arc_step = self.archive_step(index);
        let rows = i64::from(self.archives[index].row_count);
        #[allow(clippy::cast_sign_loss)] // rem_euclid of a positive modulus
        {
            ((bucket_ts / arc_step).rem_euclid(rows)) as usize
        }
    }

    fn write_slot(&mut self, index: usize, bucket_ts: i64, value: f64) {
        let slot = self.slot_index(index, bucket_ts);
        let offset = self.layout.data_offsets[index] + slot * SLOT_SIZE;
        // SAFETY: slot < row_count by the modulus, so the offset lies within
        // the archive's pre-allocated data region; 8-alignment holds by
        // layout construction.
        unsafe {
            ptr::write(self.mmap.as_mut_ptr().add(offset).cast::<f64>(), value);
        }
    }

    fn read_slot(&self, index: usize, bucket_ts: i64) -> f64 {
        let slot = self.slot_index(index, bucket_ts);
        let offset = self.layout.data_offsets[index] + slot * SLOT_SIZE;
        // SAFETY: Same bound as write_slot; the region was validated at open.
        unsafe { ptr::read(self.mmap.as_ptr().add(offset).cast::<f64>()) }
    }

    /// Returns the committed bucket window `(oldest, latest)` of an archive,
    /// both inclusive bucket-start timestamps, or `None` if the archive has
    /// no committed slot yet.
    ///
    /// For the fine archive the latest committed bucket is the one holding
    /// `last_update`. For coarse archives it is the bucket *before* the one
    /// currently accumulating.
    pub fn archive_window(&self, index: usize) -> Option<(i64, i64)> {
        let last = self.last_update()?;
        let start = self.start_time()?;
        let arc_step = self.archive_step(index);
        let rows = i64::from(self.archives[index].row_count);

        let latest = if index == 0 {
            truncate(last, arc_step)
        } else {
            let header = self.archive_header(index);
            if header.accum_bucket == NO_BUCKET {
                return None;
            }
            let latest = header.accum_bucket - arc_step;
            if latest < truncate(start, arc_step) {
                return None;
            }
            latest
        };
        let oldest = (latest - (rows - 1) * arc_step).max(truncate(start, arc_step));
        Some((oldest, latest))
    }

    /// Reads the committed value of the bucket containing `timestamp` in the
    /// archive at `index`, or NaN if the bucket is outside the committed
    /// window.
    pub fn value_at(&self, index: usize, timestamp: i64) -> f64 {
        let Some((oldest, latest)) = self.archive_window(index) else {
            return f64::NAN;
        };
        let bucket = truncate(timestamp, self.archive_step(index));
        if bucket < oldest || bucket > latest {
            return f64::NAN;
        }
        self.read_slot(index, bucket)
    }

    /// Fetches committed bucket values from the archive at `index` for each
    /// bucket start in `[from, to)`, aligned down to the archive step.
    ///
    /// Buckets outside the committed window come back as NaN, so the result
    /// always has `(align(to) - align(from)) / arc_step` entries.
    pub fn fetch(&self, index: usize, from: i64, to: i64) -> Vec<f64> {
        let arc_step = self.archive_step(index);
        let from = truncate(from, arc_step);
        let to = truncate(to, arc_step);
        if to <= from {
            return Vec::new();
        }
        #[allow(clippy::cast_sign_loss)] // to > from
        let mut values = Vec::with_capacity(((to - from) / arc_step) as usize);
        let mut t = from;
        while t < to {
            values.push(self.value_at(index, t));
            t += arc_step;
        }
        values
    }

    /// Returns the most recent non-NaN sample in the fine archive as
    /// `(bucket start, value)`, or `None` if every slot is unknown.
    pub fn last_sample(&self) -> Option<(i64, f64)> {
        let (oldest, latest) = self.archive_window(0)?;
        let step = self.step();
        let mut t = latest;
        while t >= oldest {
            let v = self.read_slot(0, t);
            if !v.is_nan() {
                return Some((t, v));
            }
            t -= step;
        }
        None
    }

    /// Flushes the mapping to disk.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::SyncFailed`] if msync fails.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().map_err(|e| {
            DatabaseError::SyncFailed {
                path: self.path.clone(),
                source: e,
            }
            .into()
        })
    }
}

fn validate_definition(definition: &ArchiveDefinition) -> Result<()> {
    if definition.step_seconds == 0 {
        return Err(DatabaseError::InvalidDefinition {
            reason: "step must be positive".to_string(),
        }
        .into());
    }
    if definition.archives.is_empty() {
        return Err(DatabaseError::InvalidDefinition {
            reason: "at least one archive is required".to_string(),
        }
        .into());
    }
    if definition.archives[0].step_factor != 1 {
        return Err(DatabaseError::InvalidDefinition {
            reason: "first archive must run at the native step".to_string(),
        }
        .into());
    }
    let mut prev_factor = 0;
    for (i, spec) in definition.archives.iter().enumerate() {
        if spec.row_count == 0 {
            return Err(DatabaseError::InvalidDefinition {
                reason: format!("archive {i} has zero rows"),
            }
            .into());
        }
        if spec.step_factor <= prev_factor {
            return Err(DatabaseError::InvalidDefinition {
                reason: format!("archive {i} does not coarsen: factor {}", spec.step_factor),
            }
            .into());
        }
        prev_factor = spec.step_factor;
    }
    Ok(())
}
