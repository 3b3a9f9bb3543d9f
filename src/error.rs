//! Error handling for labdaq
//!
//! This module defines the error type shared by the transport, the command
//! coordinator, the sampling engine and the analysis routines, together with
//! a Result alias used throughout the crate.
//!
//! # Error Classes
//!
//! - **Connect-time**: [`DaqError::PermissionDenied`], [`DaqError::DeviceUnavailable`]
//! - **Channel-level**: [`DaqError::WriteFailed`], [`DaqError::NotConnected`]
//! - **Command outcomes**: [`DaqError::Timeout`], [`DaqError::Superseded`], [`DaqError::Cancelled`]
//! - **Sampling invariants**: [`DaqError::InsufficientSamples`], [`DaqError::MustRestart`]
//! - **Fit results**: [`DaqError::InsufficientData`], [`DaqError::NoIntersection`]

use thiserror::Error;

/// Main error type for labdaq operations
#[derive(Error, Debug)]
pub enum DaqError {
    /// The platform refused access to the device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No device was found or the chosen one could not be opened
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A write was attempted on a channel that is not open, or the write itself failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The operation needs an open connection
    #[error("Not connected")]
    NotConnected,

    /// The device did not acknowledge a command in time; its state is unknown
    #[error("Timeout after {waited_ms} ms waiting for: {command}")]
    Timeout { command: String, waited_ms: u64 },

    /// A newer command took precedence over this one
    #[error("Superseded by a newer command: {0}")]
    Superseded(String),

    /// The command was abandoned because the connection closed
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Too few samples to produce a result
    #[error("Insufficient samples: have {have}, need at least {need}")]
    InsufficientSamples { have: usize, need: usize },

    /// The window fell below its minimum after pruning; start a new session
    #[error("Sample window must be restarted")]
    MustRestart,

    /// No sample at the given position
    #[error("Sample index {index} out of range (window holds {len})")]
    SampleIndex { index: usize, len: usize },

    /// Too few distinct points to fit a curve
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// The two fitted curves have no valid crossing
    #[error("No intersection: {0}")]
    NoIntersection(String),

    /// A device parameter is outside its allowed range
    #[error("Invalid parameter {name} = {value} (allowed {min}..={max})")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The arm is not near zero angle
    #[error("Angle must be within ±{tolerance}° of zero (current: {})", format_angle(.angle))]
    AngleOutOfRange { angle: Option<f64>, tolerance: f64 },

    /// No command is configured for the named action
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DaqError>,
    },
}

fn format_angle(angle: &Option<f64>) -> String {
    match angle {
        Some(a) => format!("{:.1}°", a),
        None => "N/A".to_string(),
    }
}

impl DaqError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DaqError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &DaqError {
        match self {
            DaqError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller may retry the same operation without user action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.root(),
            DaqError::Timeout { .. } | DaqError::Superseded(_)
        )
    }
}

/// Result type alias for labdaq operations
pub type Result<T> = std::result::Result<T, DaqError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| DaqError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DaqError::Io(e).with_context(f()))
    }
}
