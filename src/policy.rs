//! Archive policy: aggregation functions, datasource bounds, and the
//! per-version archive layouts.
//!
//! Every channel database carries one datasource and a fixed set of archives
//! derived from the channel's [`Unit`]. The policy table maps units to a
//! [`DatasourcePolicy`] (bounds + aggregate function); the archive layout of
//! a schema version maps the native step to concrete `(step factor, row
//! count)` tiers.

use serde::{Deserialize, Serialize};

use crate::channel::Unit;

/// Number of seconds in one hour; cumulative channels are aligned to this.
pub const HOUR_SECONDS: i64 = 3_600;

/// Row count of the fine archive (native step). 8 928 rows of 300 s ≈ 31 days.
pub const FINE_ROWS: u32 = 8_928;

/// Step factor of the medium archive.
pub const MEDIUM_FACTOR: u32 = 5;

/// Row count of the medium archive. 20 160 rows of 1 500 s ≈ 350 days.
pub const MEDIUM_ROWS: u32 = 20_160;

/// Step factor of the coarse archive.
pub const COARSE_FACTOR: u32 = 60;

/// Row count of the coarse archive. 5 840 rows of 18 000 s ≈ 3.3 years,
/// so multi-year queries are answerable without unbounded storage.
pub const COARSE_ROWS: u32 = 5_840;

/// Truncates a timestamp down to a step boundary.
///
/// Uses euclidean remainder so pre-epoch timestamps still truncate towards
/// negative infinity.
pub fn truncate(timestamp: i64, step: i64) -> i64 {
    timestamp - timestamp.rem_euclid(step)
}

/// Aggregation function applied when several raw samples fall into one
/// coarser-resolution bucket, and when the collector reduces a window of
/// recent samples to one scalar.
///
/// NaN values are filtered out before aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFn {
    /// Arithmetic mean of all non-NaN values. Used for gauges.
    Average,
    /// Maximum of all non-NaN values. Used for monotonically increasing
    /// counters, which are sampled rather than averaged.
    Max,
}

impl AggregateFn {
    /// Applies this aggregate function to a slice of values.
    ///
    /// NaN values are filtered out first. Returns NaN if the slice is empty
    /// or all values are NaN.
    #[allow(clippy::cast_precision_loss)] // sample counts are far below 2^52
    pub fn apply(self, values: &[f64]) -> f64 {
        let mut count = 0_u32;
        let mut acc = match self {
            Self::Average => 0.0,
            Self::Max => f64::NEG_INFINITY,
        };
        for &v in values {
            if v.is_nan() {
                continue;
            }
            count += 1;
            match self {
                Self::Average => acc += v,
                Self::Max => acc = acc.max(v),
            }
        }
        if count == 0 {
            return f64::NAN;
        }
        match self {
            Self::Average => acc / f64::from(count),
            Self::Max => acc,
        }
    }

    /// Stable on-disk tag for this function.
    pub(crate) fn to_tag(self) -> u32 {
        match self {
            Self::Average => 0,
            Self::Max => 1,
        }
    }

    /// Parses the on-disk tag back into an aggregate function.
    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Self::Average),
            1 => Some(Self::Max),
            _ => None,
        }
    }
}

/// Datasource policy of a channel: value bounds and aggregate function.
///
/// Bounds are `NaN` for unbounded datasources. Samples outside the bounds
/// are stored as unknown (NaN) rather than clamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasourcePolicy {
    /// Minimum accepted value, or NaN for unbounded.
    pub min: f64,
    /// Maximum accepted value, or NaN for unbounded.
    pub max: f64,
    /// Aggregate function for consolidation and collection.
    pub aggregate: AggregateFn,
}

impl DatasourcePolicy {
    /// Returns the sample as stored: the value itself if within bounds,
    /// otherwise NaN.
    pub fn admit(&self, value: f64) -> f64 {
        if !self.min.is_nan() && value < self.min {
            return f64::NAN;
        }
        if !self.max.is_nan() && value > self.max {
            return f64::NAN;
        }
        value
    }
}

/// Returns the datasource policy for a unit.
///
/// Most physical units are unbounded gauges consolidated with `Average`.
/// `Percent` and `OnOff` carry fixed bounds; cumulative counters use `Max`.
pub fn policy_for(unit: Unit) -> DatasourcePolicy {
    use Unit::*;
    match unit {
        Percent => DatasourcePolicy {
            min: 0.0,
            max: 100.0,
            aggregate: AggregateFn::Average,
        },
        OnOff => DatasourcePolicy {
            min: 0.0,
            max: 1.0,
            aggregate: AggregateFn::Average,
        },
        CumulatedSeconds | CumulatedWattHours => DatasourcePolicy {
            min: f64::NAN,
            max: f64::NAN,
            aggregate: AggregateFn::Max,
        },
        None | Ampere | Volt | Watt | Kilowatt | VoltAmpereReactive | Hertz | DegreeCelsius
        | Seconds | Milliseconds | WattHours | KilowattHours => DatasourcePolicy {
            min: f64::NAN,
            max: f64::NAN,
            aggregate: AggregateFn::Average,
        },
    }
}

/// One archive tier within a channel database: its aggregate function, step
/// factor relative to the native step, and fixed row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSpec {
    /// Aggregate function applied when consolidating into this archive.
    pub aggregate: AggregateFn,
    /// Archive step as a multiple of the native step. 1 for the fine tier.
    pub step_factor: u32,
    /// Number of slots in the circular buffer; the archive never grows past
    /// this.
    pub row_count: u32,
}

/// Complete creation-time definition of a channel database.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveDefinition {
    /// Native step in seconds; the fine archive's resolution.
    pub step_seconds: u32,
    /// Datasource bounds and aggregate function.
    pub datasource: DatasourcePolicy,
    /// Archive tiers, ordered fine to coarse.
    pub archives: Vec<ArchiveSpec>,
}

impl ArchiveDefinition {
    /// Builds the latest-version archive definition for a unit: fine
    /// (native step, short retention), medium (5× step) and coarse
    /// (60× step, multi-year retention).
    pub fn for_unit(unit: Unit, step_seconds: u32) -> Self {
        let datasource = policy_for(unit);
        Self {
            step_seconds,
            datasource,
            archives: vec![
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
        }
    }
}
