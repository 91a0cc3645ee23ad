//! Resampling of fetched archive data to a requested resolution.
//!
//! Queries name a resolution that rarely matches the step of the archive the
//! data came from. Fetched values are post-processed in one of three ways:
//! passthrough when the steps match, merge (average of each group) when the
//! archive is finer than the request, and repeat when the archive is coarser.

use crate::error::{QueryError, Result};

/// Resamples `values`, fetched at `archive_step` seconds per entry, to
/// `resolution` seconds per entry.
///
/// Merging averages each group of `resolution / archive_step` entries,
/// ignoring NaN; a group with no known value merges to NaN. Repeating
/// duplicates each entry `archive_step / resolution` times, so a query finer
/// than the archive sees each stored value held for its whole bucket.
///
/// # Errors
///
/// Returns [`QueryError::IndivisibleResolution`] when the coarser of the two
/// steps is not an exact multiple of the finer.
pub fn resample(values: &[f64], archive_step: i64, resolution: i64) -> Result<Vec<f64>> {
    debug_assert!(archive_step > 0 && resolution > 0);
    if archive_step == resolution {
        return Ok(values.to_vec());
    }
    if archive_step < resolution {
        if resolution % archive_step != 0 {
            return Err(QueryError::IndivisibleResolution {
                resolution,
                step: archive_step,
            }
            .into());
        }
        #[allow(clippy::cast_sign_loss)] // both steps positive
        let group = (resolution / archive_step) as usize;
        return Ok(values.chunks(group).map(merge_group).collect());
    }
    if archive_step % resolution != 0 {
        return Err(QueryError::IndivisibleResolution {
            resolution,
            step: archive_step,
        }
        .into());
    }
    #[allow(clippy::cast_sign_loss)] // both steps positive
    let repeat = (archive_step / resolution) as usize;
    let mut out = Vec::with_capacity(values.len() * repeat);
    for &v in values {
        for _ in 0..repeat {
            out.push(v);
        }
    }
    Ok(out)
}

/// Averages one merge group, ignoring NaN entries.
#[allow(clippy::cast_precision_loss)] // group sizes are tiny
fn merge_group(group: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0_u32;
    for &v in group {
        if !v.is_nan() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / f64::from(count)
    }
}
