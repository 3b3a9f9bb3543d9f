//! Analysis module for reducing measurement data
//!
//! This module provides the numeric reductions applied after sampling:
//! - Averages, block sums and cumulative timing tables
//! - Outlier detection by relative deviation from the mean
//! - Quadratic least-squares fits and their intersections
//! - Measurement series grouped by key or paired over a shared axis

pub mod aggregate;
pub mod fit;
pub mod series;

pub use aggregate::{
    average, block_sums, cumulative_sums, detect_outliers, timing_table, OutlierReport, TimingRow,
};
pub use fit::{intersect, Intersection, QuadraticFit};
pub use series::{group_by_key, Crossing, MeasurementSeries, PairedMeasurements, PairedRow};
