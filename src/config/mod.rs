//! Configuration module for labdaq
//!
//! This module handles application configuration:
//! - Serial port settings
//! - The device line protocol (command templates, correlation mode)
//! - Command timing
//! - Sampling profiles and parameter limits
//!
//! # App Data Location
//!
//! The configuration file is stored in the platform-appropriate location:
//! - **Linux**: `~/.local/share/dev.labdaq.labdaq/labdaq.toml`
//! - **macOS**: `~/Library/Application Support/dev.labdaq.labdaq/labdaq.toml`
//! - **Windows**: `%APPDATA%\dev.labdaq.labdaq\labdaq.toml`
//!
//! Every field has a default, so a partial file only overrides what it names:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//!
//! [protocol.correlation]
//! mode = "ack"
//! token = "OK"
//! ```
//!
//! # Example
//!
//! ```ignore
//! use labdaq::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default();
//! config.serial.port = Some("/dev/ttyUSB0".to_string());
//! if let Some(path) = AppConfig::default_path() {
//!     config.save(path)?;
//! }
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{DaqError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for data directories
pub const APP_ID: &str = "dev.labdaq.labdaq";

/// Configuration filename
pub const CONFIG_FILE: &str = "labdaq.toml";

/// Default baud rate of the instrument
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default timeout for a correlated command in milliseconds
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

/// Default settle delay after a command in milliseconds
pub const DEFAULT_SETTLE_MS: u64 = 100;

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        DaqError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            DaqError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== App Config ====================

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Serial port settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Device line protocol
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Command timing
    #[serde(default)]
    pub command: CommandConfig,

    /// Sampling profile used when none is chosen explicitly
    #[serde(default)]
    pub sampling: SamplingProfile,

    /// Drive parameter limits
    #[serde(default)]
    pub limits: ParameterLimits,
}

impl AppConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the configuration file in the app data directory
    pub fn default_path() -> Option<PathBuf> {
        app_data_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DaqError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            DaqError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, or fall back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            tracing::warn!("No app data directory, using default configuration");
            return Self::default();
        };
        if !path.exists() {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to load configuration, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration as TOML, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DaqError::Config(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DaqError::Config(format!("Failed to serialize configuration: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            DaqError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<()> {
        self.sampling
            .validate()
            .map_err(|e| DaqError::Config(format!("sampling: {}", e)))?;
        if self.serial.baud_rate == 0 {
            return Err(DaqError::Config("serial: baud_rate must be non-zero".to_string()));
        }
        if !self.protocol.parameters_template.contains("{amplitude}") {
            tracing::warn!("Parameters template does not reference {{amplitude}}");
        }
        Ok(())
    }
}

// ==================== Serial Config ====================

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g. "/dev/ttyACM0", "COM3"); None picks the first available port
    #[serde(default)]
    pub port: Option<String>,

    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits per character
    #[serde(default)]
    pub data_bits: DataBits,

    /// Parity checking
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits
    #[serde(default)]
    pub stop_bits: StopBits,

    /// Flow control
    #[serde(default)]
    pub flow_control: FlowControl,

    /// How long a single read waits for data before yielding to the worker loop
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    20
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Data bits options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

/// Parity options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Parity::None => write!(f, "N"),
            Parity::Odd => write!(f, "O"),
            Parity::Even => write!(f, "E"),
        }
    }
}

/// Stop bits options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Flow control options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

// ==================== Protocol Config ====================

/// How a command is recognised as applied by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CorrelationMode {
    /// The device echoes the applied parameters in its telemetry
    Echo,
    /// The device answers with a line containing this token
    Ack { token: String },
    /// No acknowledgement; assume the command applied after a fixed delay
    Settle {
        #[serde(default = "default_settle_ms")]
        delay_ms: u64,
    },
}

fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}

impl Default for CorrelationMode {
    fn default() -> Self {
        CorrelationMode::Settle {
            delay_ms: DEFAULT_SETTLE_MS,
        }
    }
}

/// Device line protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Command that sets the drive parameters; `{amplitude}`, `{frequency}`
    /// and `{offset}` are substituted
    #[serde(default = "default_parameters_template")]
    pub parameters_template: String,

    /// Named action commands (e.g. `zero_angle`)
    #[serde(default = "default_actions")]
    pub actions: BTreeMap<String, String>,

    /// Terminator appended to every written line
    #[serde(default = "default_line_ending")]
    pub line_ending: String,

    /// Command correlation
    #[serde(default)]
    pub correlation: CorrelationMode,
}

fn default_parameters_template() -> String {
    "SET {amplitude} {frequency} {offset}".to_string()
}

fn default_actions() -> BTreeMap<String, String> {
    let mut actions = BTreeMap::new();
    actions.insert(ZERO_ANGLE_ACTION.to_string(), "ZERO".to_string());
    actions
}

fn default_line_ending() -> String {
    "\n".to_string()
}

/// Name of the zero-angle calibration action
pub const ZERO_ANGLE_ACTION: &str = "zero_angle";

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            parameters_template: default_parameters_template(),
            actions: default_actions(),
            line_ending: default_line_ending(),
            correlation: CorrelationMode::default(),
        }
    }
}

// ==================== Command Config ====================

/// Command timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// How long a correlated command waits before timing out
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,

    /// Absolute tolerance when comparing echoed parameters
    #[serde(default = "default_echo_tolerance")]
    pub echo_tolerance: f64,

    /// Sleep between worker iterations while no channel is open
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_echo_tolerance() -> f64 {
    0.5
}

fn default_idle_poll_ms() -> u64 {
    5
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            echo_tolerance: default_echo_tolerance(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.port, None);
        assert_eq!(config.command.timeout_ms, 2000);
        assert_eq!(
            config.protocol.correlation,
            CorrelationMode::Settle { delay_ms: 100 }
        );
        assert_eq!(
            config.protocol.actions.get(ZERO_ANGLE_ACTION).map(String::as_str),
            Some("ZERO")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.serial.port = Some("/dev/ttyACM0".to_string());
        config.serial.parity = Parity::Even;
        config.protocol.correlation = CorrelationMode::Ack {
            token: "OK".to_string(),
        };
        config.sampling = SamplingProfile::period_blocks();

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[serial]\nport = \"COM3\"\n\n[protocol.correlation]\nmode = \"echo\"\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("COM3"));
        assert_eq!(config.serial.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.protocol.correlation, CorrelationMode::Echo);
        assert_eq!(config.protocol.line_ending, "\n");
        assert_eq!(config.sampling, SamplingProfile::quick());
    }

    #[test]
    fn test_partial_sampling_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[sampling]\nminimum = 8\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.sampling.capacity, 20);
        assert_eq!(config.sampling.minimum, 8);
        assert_eq!(config.sampling.outlier_threshold, 0.05);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[sampling]\ncapacity = 10\nminimum = 50\n").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, DaqError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = AppConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, DaqError::Config(_)));
    }
}
