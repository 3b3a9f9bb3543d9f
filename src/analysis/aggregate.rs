//! Window reductions
//!
//! Provides the reductions applied to a finished sample window:
//! - Arithmetic mean
//! - Block sums over the most recent samples
//! - Cumulative timing table built from block sums
//! - Relative-deviation outlier detection

use crate::error::{DaqError, Result};

/// Arithmetic mean; `None` for an empty slice
pub fn average(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        None
    } else {
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}

/// Sum consecutive blocks of the most recent `block_size * block_count` samples
///
/// Blocks keep the original sample order, so block 1 holds the oldest of the
/// samples taken into account.
pub fn block_sums(samples: &[f64], block_size: usize, block_count: usize) -> Result<Vec<f64>> {
    let span = block_size * block_count;
    if span == 0 {
        return Ok(Vec::new());
    }
    if samples.len() < span {
        return Err(DaqError::InsufficientSamples {
            have: samples.len(),
            need: span,
        });
    }

    let recent = &samples[samples.len() - span..];
    Ok(recent
        .chunks_exact(block_size)
        .map(|block| block.iter().sum())
        .collect())
}

/// Running totals of block sums, starting at zero
///
/// For sums `s1..sn` this is `0, s1, s1+s2, ..., s1+..+sn`.
pub fn cumulative_sums(sums: &[f64]) -> Vec<f64> {
    std::iter::once(0.0)
        .chain(sums.iter().scan(0.0, |acc, s| {
            *acc += s;
            Some(*acc)
        }))
        .collect()
}

/// One row of a cumulative timing table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingRow {
    /// Number of periods counted so far
    pub periods: usize,
    /// Total time of those periods
    pub time: f64,
}

/// Cumulative time at every multiple of `block_size` periods
pub fn timing_table(sums: &[f64], block_size: usize) -> Vec<TimingRow> {
    cumulative_sums(sums)
        .into_iter()
        .enumerate()
        .map(|(i, time)| TimingRow {
            periods: i * block_size,
            time,
        })
        .collect()
}

/// Result of outlier detection
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutlierReport {
    /// Mean of the inspected samples
    pub mean: Option<f64>,
    /// Relative threshold used
    pub threshold: f64,
    /// Number of samples inspected
    pub inspected: usize,
    /// Indices of flagged samples, relative to the full input slice
    pub flagged: Vec<usize>,
}

impl OutlierReport {
    /// Whether any sample was flagged
    pub fn has_outliers(&self) -> bool {
        !self.flagged.is_empty()
    }

    /// Whether the sample at `index` was flagged
    pub fn is_outlier(&self, index: usize) -> bool {
        self.flagged.binary_search(&index).is_ok()
    }
}

/// Flag samples deviating from the mean by more than `threshold` of the mean
///
/// Only the last `window` samples are inspected (`0` inspects all of them).
/// Detection is informational; it never changes the samples.
pub fn detect_outliers(samples: &[f64], window: usize, threshold: f64) -> OutlierReport {
    let start = if window == 0 {
        0
    } else {
        samples.len().saturating_sub(window)
    };
    let inspected = &samples[start..];

    let Some(mean) = average(inspected) else {
        return OutlierReport {
            threshold,
            ..Default::default()
        };
    };

    let limit = threshold * mean.abs();
    let flagged = inspected
        .iter()
        .enumerate()
        .filter(|(_, v)| (*v - mean).abs() > limit)
        .map(|(i, _)| start + i)
        .collect();

    OutlierReport {
        mean: Some(mean),
        threshold,
        inspected: inspected.len(),
        flagged,
    }
}
