//! Core data types shared between the backend worker and its consumers
//!
//! This module contains the values that cross the thread boundary between
//! the read loop and the rest of the application.
//!
//! # Main Types
//!
//! - [`ConnectionStatus`] - Lifecycle state of the serial channel
//! - [`TelemetryField`] - Canonical names of the fields the instrument reports
//! - [`TelemetrySnapshot`] - Last known value of every field seen so far
//! - [`FramedLine`] - One complete line, as broadcast to line subscribers
//! - [`CollectionStats`] - Counters for the read loop and command traffic

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Connection state of the communication channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No channel open
    #[default]
    Closed,
    /// Open requested, waiting for the platform to hand over the port
    Opening,
    /// Channel open and the read loop running
    Open,
    /// The channel failed; carries the human-readable cause
    ClosedWithError(String),
}

impl ConnectionStatus {
    /// Whether lines can be read and commands written
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Open)
    }

    /// The failure cause, if the channel closed with an error
    pub fn error(&self) -> Option<&str> {
        match self {
            ConnectionStatus::ClosedWithError(cause) => Some(cause),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Closed => write!(f, "Closed"),
            ConnectionStatus::Opening => write!(f, "Opening..."),
            ConnectionStatus::Open => write!(f, "Open"),
            ConnectionStatus::ClosedWithError(cause) => write!(f, "Closed with error: {}", cause),
        }
    }
}

/// Canonical telemetry fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TelemetryField {
    /// Measured voltage [V]
    Voltage,
    /// Arm angle [deg]
    Angle,
    /// Drive amplitude [uA]
    Amplitude,
    /// Drive frequency [Hz]
    Frequency,
    /// Drive offset [uA]
    Offset,
    /// Measured current [uA]
    Current,
    /// Oscillation period [ms]
    Period,
    /// Illuminance [lx]
    Lux,
}

impl TelemetryField {
    /// Key under which the field is stored in a snapshot
    pub fn key(&self) -> &'static str {
        match self {
            TelemetryField::Voltage => "voltage",
            TelemetryField::Angle => "angle",
            TelemetryField::Amplitude => "amplitude",
            TelemetryField::Frequency => "frequency",
            TelemetryField::Offset => "offset",
            TelemetryField::Current => "current",
            TelemetryField::Period => "period",
            TelemetryField::Lux => "lux",
        }
    }

    /// Resolve a device key or one of its short aliases, case-insensitively
    pub fn from_alias(name: &str) -> Option<Self> {
        let field = match name.to_ascii_lowercase().as_str() {
            "voltage" | "volt" | "u" | "v" => TelemetryField::Voltage,
            "angle" | "ang" | "a" | "deg" => TelemetryField::Angle,
            "amplitude" | "amp" | "i" => TelemetryField::Amplitude,
            "frequency" | "freq" | "f" => TelemetryField::Frequency,
            "offset" | "off" | "ofs" => TelemetryField::Offset,
            "current" => TelemetryField::Current,
            "period" | "t" => TelemetryField::Period,
            "lux" => TelemetryField::Lux,
            _ => return None,
        };
        Some(field)
    }

    /// All canonical fields
    pub fn all() -> &'static [TelemetryField] {
        &[
            TelemetryField::Voltage,
            TelemetryField::Angle,
            TelemetryField::Amplitude,
            TelemetryField::Frequency,
            TelemetryField::Offset,
            TelemetryField::Current,
            TelemetryField::Period,
            TelemetryField::Lux,
        ]
    }
}

impl std::fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Last known value of every telemetry field
///
/// Fields are absent until first observed. Values are replaced in place and
/// never rolled back. `sequence` increases by one for every line that
/// contributed at least one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Values keyed by canonical field key, or the lower-cased device key for unknown fields
    pub values: BTreeMap<String, f64>,
    /// Number of updates applied
    pub sequence: u64,
    /// Wall-clock time of the last update
    pub updated_at: Option<DateTime<Utc>>,
}

impl TelemetrySnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a canonical field
    pub fn get(&self, field: TelemetryField) -> Option<f64> {
        self.values.get(field.key()).copied()
    }

    /// Value of any stored key
    pub fn get_raw(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn voltage(&self) -> Option<f64> {
        self.get(TelemetryField::Voltage)
    }

    pub fn angle(&self) -> Option<f64> {
        self.get(TelemetryField::Angle)
    }

    pub fn amplitude(&self) -> Option<f64> {
        self.get(TelemetryField::Amplitude)
    }

    pub fn frequency(&self) -> Option<f64> {
        self.get(TelemetryField::Frequency)
    }

    pub fn offset(&self) -> Option<f64> {
        self.get(TelemetryField::Offset)
    }

    /// Whether nothing has been observed yet
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A complete line as delivered to line subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct FramedLine {
    /// Position of the line in the connection's line stream, starting at 1
    pub sequence: u64,
    /// Line text without its terminator
    pub text: String,
    /// Time the terminator was observed
    pub received_at: DateTime<Utc>,
    /// First signed decimal token in the line, if any
    pub value: Option<f64>,
}

/// Statistics about the read loop and command traffic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionStats {
    /// Total bytes read from the channel
    pub bytes_read: u64,
    /// Total bytes written to the channel
    pub bytes_written: u64,
    /// Number of complete lines framed
    pub lines_framed: u64,
    /// Number of lines that updated the telemetry snapshot
    pub telemetry_updates: u64,
    /// Number of read failures
    pub read_errors: u64,
    /// Number of messages dropped due to queue backpressure
    pub dropped_messages: u64,
    /// Commands resolved by their correlation condition
    pub commands_resolved: u64,
    /// Commands that timed out
    pub commands_timed_out: u64,
    /// Commands replaced by a newer one
    pub commands_superseded: u64,
}

impl CollectionStats {
    /// Fraction of framed lines that carried structured telemetry, as a percentage
    pub fn telemetry_ratio(&self) -> f64 {
        if self.lines_framed == 0 {
            0.0
        } else {
            (self.telemetry_updates as f64 / self.lines_framed as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::Closed.to_string(), "Closed");
        assert_eq!(ConnectionStatus::Open.to_string(), "Open");
        let failed = ConnectionStatus::ClosedWithError("device removed".to_string());
        assert_eq!(failed.to_string(), "Closed with error: device removed");
        assert_eq!(failed.error(), Some("device removed"));
        assert!(!failed.is_open());
    }

    #[test]
    fn test_field_aliases() {
        assert_eq!(TelemetryField::from_alias("U"), Some(TelemetryField::Voltage));
        assert_eq!(TelemetryField::from_alias("freq"), Some(TelemetryField::Frequency));
        assert_eq!(TelemetryField::from_alias("Angle"), Some(TelemetryField::Angle));
        assert_eq!(TelemetryField::from_alias("humidity"), None);
        for field in TelemetryField::all() {
            assert_eq!(TelemetryField::from_alias(field.key()), Some(*field));
        }
    }

    #[test]
    fn test_snapshot_accessors() {
        let mut snap = TelemetrySnapshot::new();
        assert!(snap.is_empty());
        assert_eq!(snap.voltage(), None);

        snap.values.insert("voltage".to_string(), 1.25);
        snap.values.insert("angle".to_string(), -3.0);
        assert_eq!(snap.voltage(), Some(1.25));
        assert_eq!(snap.angle(), Some(-3.0));
        assert_eq!(snap.frequency(), None);
    }

    #[test]
    fn test_stats_ratio() {
        let stats = CollectionStats {
            lines_framed: 4,
            telemetry_updates: 1,
            ..Default::default()
        };
        assert!((stats.telemetry_ratio() - 25.0).abs() < 1e-9);
        assert_eq!(CollectionStats::default().telemetry_ratio(), 0.0);
    }
}
