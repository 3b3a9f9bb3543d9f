//! Measurement settings that describe how a sampling session and the device
//! parameters are constrained
//!
//! # Main Types
//!
//! - [`SamplingProfile`] - Capacity, minimum and reduction shape of a sample window
//! - [`ParameterLimits`] - Allowed ranges for the drive parameters
//!
//! # Presets
//!
//! Two profiles cover the measurement dialogs of the instrument:
//!
//! - [`SamplingProfile::quick`]: 20 samples, at least 5, reduced to an average
//! - [`SamplingProfile::period_blocks`]: 100 samples, at least 90, reduced to
//!   nine block sums of ten consecutive periods each

use serde::{Deserialize, Serialize};

/// Shape and limits of one sample window
///
/// Fields missing from a config file take their value from [`SamplingProfile::quick`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingProfile {
    /// Display name
    pub name: String,

    /// Maximum number of samples kept; collection stops when reached
    pub capacity: usize,

    /// Minimum number of samples for a valid result
    pub minimum: usize,

    /// Samples per block when reducing to block sums (0 disables block sums)
    pub block_size: usize,

    /// Number of blocks taken from the most recent samples
    pub block_count: usize,

    /// Relative deviation from the mean above which a sample is an outlier
    pub outlier_threshold: f64,

    /// Number of most recent samples checked for outliers (0 = all)
    pub outlier_window: usize,
}

fn default_outlier_threshold() -> f64 {
    0.05
}

impl Default for SamplingProfile {
    fn default() -> Self {
        Self::quick()
    }
}

impl SamplingProfile {
    /// 20-sample window averaged on save
    pub fn quick() -> Self {
        Self {
            name: "quick".to_string(),
            capacity: 20,
            minimum: 5,
            block_size: 0,
            block_count: 0,
            outlier_threshold: default_outlier_threshold(),
            outlier_window: 0,
        }
    }

    /// 100-sample window whose last 90 samples are reduced to 9 sums of 10
    pub fn period_blocks() -> Self {
        Self {
            name: "period".to_string(),
            capacity: 100,
            minimum: 90,
            block_size: 10,
            block_count: 9,
            outlier_threshold: default_outlier_threshold(),
            outlier_window: 90,
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "quick" => Some(Self::quick()),
            "period" | "period_blocks" => Some(Self::period_blocks()),
            _ => None,
        }
    }

    /// Whether the profile reduces to block sums
    pub fn has_blocks(&self) -> bool {
        self.block_size > 0 && self.block_count > 0
    }

    /// Samples consumed by the block reduction
    pub fn block_span(&self) -> usize {
        self.block_size * self.block_count
    }

    /// Check the profile is self-consistent
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than zero".to_string());
        }
        if self.minimum == 0 || self.minimum > self.capacity {
            return Err(format!(
                "minimum {} must be within 1..={}",
                self.minimum, self.capacity
            ));
        }
        if self.has_blocks() && self.block_span() > self.minimum {
            return Err(format!(
                "block span {} exceeds minimum {}",
                self.block_span(),
                self.minimum
            ));
        }
        if self.outlier_threshold.is_nan() || self.outlier_threshold <= 0.0 {
            return Err("outlier threshold must be positive".to_string());
        }
        Ok(())
    }
}

/// Inclusive range of one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Allowed ranges for the drive parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterLimits {
    /// Drive amplitude [uA]
    #[serde(default = "default_amplitude_range")]
    pub amplitude: Range,

    /// Drive frequency [Hz]
    #[serde(default = "default_frequency_range")]
    pub frequency: Range,

    /// Drive offset [uA]
    #[serde(default = "default_amplitude_range")]
    pub offset: Range,

    /// Constant current of a V-A characteristic point [uA]
    #[serde(default = "default_va_current_range")]
    pub va_current: Range,

    /// Arm angle [deg]
    #[serde(default = "default_angle_range")]
    pub angle: Range,

    /// Maximum absolute angle at which the arm counts as zeroed [deg]
    #[serde(default = "default_zero_angle_tolerance")]
    pub zero_angle_tolerance: f64,
}

fn default_amplitude_range() -> Range {
    Range::new(0.0, 30_000.0)
}

fn default_va_current_range() -> Range {
    Range::new(1.0, 30_000.0)
}

fn default_frequency_range() -> Range {
    Range::new(1.0, 100_000.0)
}

fn default_angle_range() -> Range {
    Range::new(0.0, 359.0)
}

fn default_zero_angle_tolerance() -> f64 {
    5.0
}

impl Default for ParameterLimits {
    fn default() -> Self {
        Self {
            amplitude: default_amplitude_range(),
            frequency: default_frequency_range(),
            offset: default_amplitude_range(),
            va_current: default_va_current_range(),
            angle: default_angle_range(),
            zero_angle_tolerance: default_zero_angle_tolerance(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(SamplingProfile::quick().validate().is_ok());
        assert!(SamplingProfile::period_blocks().validate().is_ok());
    }

    #[test]
    fn test_period_profile_shape() {
        let p = SamplingProfile::period_blocks();
        assert!(p.has_blocks());
        assert_eq!(p.block_span(), 90);
        assert_eq!(p.capacity, 100);
        assert_eq!(p.minimum, 90);
        assert!(!SamplingProfile::quick().has_blocks());
    }

    #[test]
    fn test_invalid_profiles() {
        let mut p = SamplingProfile::quick();
        p.minimum = 25;
        assert!(p.validate().is_err());

        let mut p = SamplingProfile::period_blocks();
        p.block_count = 10;
        assert!(p.validate().is_err());

        let mut p = SamplingProfile::quick();
        p.capacity = 0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(SamplingProfile::preset("quick"), Some(SamplingProfile::quick()));
        assert_eq!(
            SamplingProfile::preset("period"),
            Some(SamplingProfile::period_blocks())
        );
        assert_eq!(SamplingProfile::preset("nope"), None);
    }

    #[test]
    fn test_range_contains() {
        let limits = ParameterLimits::default();
        assert!(limits.amplitude.contains(0.0));
        assert!(limits.amplitude.contains(30_000.0));
        assert!(!limits.amplitude.contains(30_000.5));
        assert!(!limits.frequency.contains(0.0));
        assert!(!limits.frequency.contains(f64::NAN));
        assert!(limits.offset.contains(0.0));
        assert!(!limits.va_current.contains(0.0));
        assert!(limits.va_current.contains(1.0));
    }
}
