//! # labdaq: serial telemetry acquisition and reduction
//!
//! Acquires numeric telemetry from a laboratory instrument over a serial
//! line, correlates outbound parameter commands with the device's replies,
//! and reduces windows of raw samples into scientific results.
//!
//! ## Architecture
//!
//! - **Backend**: One worker thread owns the port and runs the single read loop
//! - **Framing and telemetry**: Bytes become lines, lines update a shared snapshot
//! - **Commands**: One pending command at a time; newer commands supersede older ones
//! - **Sampling**: Sessions subscribe to the line stream and fill bounded windows
//! - **Analysis**: Averages, block sums, outliers, quadratic fits and intersections
//! - **Communication**: Crossbeam channels for thread-safe data transfer
//!
//! ## Configuration
//!
//! Settings are stored as `labdaq.toml` in the platform-appropriate data
//! directory under `dev.labdaq.labdaq`:
//!
//! - **Linux**: `~/.local/share/dev.labdaq.labdaq/`
//! - **macOS**: `~/Library/Application Support/dev.labdaq.labdaq/`
//! - **Windows**: `%APPDATA%\dev.labdaq.labdaq\`
//!
//! ## Example
//!
//! ```ignore
//! use labdaq::{
//!     backend::DaqBackend,
//!     config::{AppConfig, SamplingProfile},
//!     sampling::SamplingSession,
//! };
//!
//! let config = AppConfig::load_or_default();
//! let (backend, frontend) = DaqBackend::new(config);
//! std::thread::spawn(move || backend.run());
//!
//! frontend.connect()?;
//! frontend.send_parameters(1000.0, 500.0, 500.0)?;
//!
//! let lines = frontend.subscribe_lines();
//! let mut session = SamplingSession::new(SamplingProfile::quick());
//! session.start();
//! // ... pump lines until the window is full
//! let summary = session.finalize()?;
//! ```

pub mod analysis;
pub mod backend;
pub mod config;
pub mod error;
pub mod sampling;
pub mod types;

// Re-export commonly used types
pub use backend::{DaqBackend, FrontendReceiver};
pub use config::{AppConfig, SamplingProfile};
pub use error::{DaqError, Result};
pub use types::{ConnectionStatus, FramedLine, TelemetryField, TelemetrySnapshot};
