//! Backend module for serial instrument acquisition
//!
//! This module runs the single read loop of a connection in its own thread
//! and exposes it to the rest of the application through crossbeam channels.
//!
//! # Architecture
//!
//! The backend runs in a separate thread from its consumers:
//!
//! - [`BackendCommand`] - Messages sent to the backend (connect, write, send, subscribe)
//! - [`BackendMessage`] - Messages sent from the backend (status, lines, telemetry, outcomes)
//! - [`FrontendReceiver`] - Consumer-side handle for commands, messages and shared state
//! - [`DaqBackend`] - Backend entry point that owns the transport until `run` is called
//!
//! The worker is the only writer of the connection state, the telemetry
//! snapshot and the line stream. Everything else reads the
//! [`SharedLinkState`], receives [`BackendMessage`]s, or subscribes to the
//! ordered line stream with [`FrontendReceiver::subscribe_lines`].
//!
//! # Components
//!
//! - [`LineFramer`] - Splits the byte stream into CR/LF/CRLF terminated lines
//! - [`TelemetryParser`] - Extracts named fields into the [`TelemetrySnapshot`]
//! - [`CommandCoordinator`] - Correlates commands with device responses
//! - [`SerialTransport`] - Real hardware via the `serialport` crate
//! - [`MockTransport`] - In-memory instrument for tests and demos
//! - [`BackendWorker`] - The read loop itself
//!
//! # Example
//!
//! ```ignore
//! use labdaq::backend::DaqBackend;
//! use labdaq::config::AppConfig;
//!
//! let config = AppConfig::load_or_default();
//! let (backend, frontend) = DaqBackend::new(config);
//!
//! // Spawn backend thread
//! std::thread::spawn(move || backend.run());
//!
//! frontend.connect()?;
//! let lines = frontend.subscribe_lines();
//! frontend.send_parameters(1000.0, 500.0, 500.0)?;
//!
//! for line in lines.iter() {
//!     println!("{}: {:?}", line.text, line.value);
//! }
//! ```

pub mod coordinator;
pub mod framer;
pub mod mock_transport;
pub mod protocol;
pub mod serial;
pub mod telemetry;
pub mod transport;
pub mod worker;

pub use coordinator::{
    CommandCoordinator, CommandHandle, CommandOutcome, CommandRequest, Correlation, Settled,
};
pub use framer::LineFramer;
pub use mock_transport::{MockHandle, MockSignal, MockTransport, OpenRefusal};
pub use protocol::ParameterSet;
pub use serial::{PortInfo, SerialTransport};
pub use telemetry::TelemetryParser;
pub use transport::{Transport, TransportStats};
pub use worker::BackendWorker;

use crate::config::AppConfig;
use crate::error::{DaqError, Result};
use crate::types::{CollectionStats, ConnectionStatus, FramedLine, TelemetrySnapshot};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Capacity of each line subscription
pub const SUBSCRIPTION_CAPACITY: usize = 4096;

/// Message sent to the backend
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Open the channel and start reading
    Connect {
        /// Receives the open result
        reply: Option<Sender<Result<()>>>,
    },
    /// Stop reading and close the channel
    Disconnect,
    /// Write a raw line without correlation
    WriteLine {
        line: String,
        reply: Option<Sender<Result<()>>>,
    },
    /// Write a command and track it until it settles
    Send {
        request: CommandRequest,
        reply: Sender<CommandOutcome>,
    },
    /// Receive every framed line from now on
    Subscribe(Sender<FramedLine>),
    /// Request current statistics
    RequestStats,
    /// Shutdown the backend
    Shutdown,
}

/// Message sent from the backend
#[derive(Debug, Clone)]
pub enum BackendMessage {
    /// Connection status changed
    ConnectionStatus(ConnectionStatus),
    /// The channel failed; sent once per failure
    ConnectionError(String),
    /// A complete line was framed
    Line(FramedLine),
    /// The telemetry snapshot changed
    Telemetry(TelemetrySnapshot),
    /// A command reached its final state
    CommandSettled(Settled),
    /// Statistics update
    Stats(CollectionStats),
    /// Backend is shutting down
    Shutdown,
}

/// State published by the worker for any number of readers
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    /// Current connection status
    pub status: ConnectionStatus,
    /// Cause of the most recent channel failure
    pub last_error: Option<String>,
    /// Most recently framed line
    pub last_line: Option<FramedLine>,
    /// Live telemetry
    pub telemetry: TelemetrySnapshot,
    /// Latest statistics
    pub stats: CollectionStats,
}

/// Shared, read-mostly view of the link; the worker is the only writer
#[derive(Debug, Clone, Default)]
pub struct SharedLinkState {
    inner: Arc<RwLock<LinkState>>,
}

impl SharedLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access
    pub fn read(&self) -> RwLockReadGuard<'_, LinkState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, LinkState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumer-side handle to the backend
pub struct FrontendReceiver {
    /// Receiver for backend messages
    pub receiver: Receiver<BackendMessage>,
    /// Sender for commands to the backend
    pub command_sender: Sender<BackendCommand>,
    /// Shared link state
    shared: SharedLinkState,
    /// Configuration used to format and validate commands
    config: AppConfig,
}

impl FrontendReceiver {
    /// Try to receive a message without blocking
    pub fn try_recv(&self) -> Option<BackendMessage> {
        self.receiver.try_recv().ok()
    }

    /// Receive all pending messages
    pub fn drain(&self) -> Vec<BackendMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Send a command to the backend
    pub fn send_command(&self, cmd: BackendCommand) -> bool {
        self.command_sender.send(cmd).is_ok()
    }

    fn request<T>(&self, make: impl FnOnce(Sender<Result<T>>) -> BackendCommand) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.command_sender
            .send(make(tx))
            .map_err(|_| DaqError::Channel("backend is not running".to_string()))?;
        rx.recv()
            .map_err(|_| DaqError::Channel("backend stopped before replying".to_string()))?
    }

    /// Open the channel; blocks until the port is opened or refused
    pub fn connect(&self) -> Result<()> {
        self.request(|reply| BackendCommand::Connect { reply: Some(reply) })
    }

    /// Request disconnection; idempotent
    pub fn disconnect(&self) {
        let _ = self.command_sender.send(BackendCommand::Disconnect);
    }

    /// Write a raw line; fails with `WriteFailed` if the channel is not open
    pub fn write_line(&self, line: impl Into<String>) -> Result<()> {
        let line = line.into();
        self.request(|reply| BackendCommand::WriteLine {
            line,
            reply: Some(reply),
        })
    }

    /// Write a command and get a handle that settles on correlation or timeout
    pub fn send(
        &self,
        line: impl Into<String>,
        correlation: Correlation,
        timeout: Duration,
    ) -> Result<CommandHandle> {
        let request = CommandRequest {
            line: line.into(),
            correlation,
            timeout,
        };
        let (handle, reply) = CommandHandle::channel(request.line.clone());
        self.command_sender
            .send(BackendCommand::Send { request, reply })
            .map_err(|_| DaqError::Channel("backend is not running".to_string()))?;
        Ok(handle)
    }

    /// Validate, format and send drive parameters without waiting
    pub fn issue_parameters(&self, params: ParameterSet) -> Result<CommandHandle> {
        params.validate(&self.config.limits)?;
        let line = params.format(&self.config.protocol.parameters_template);
        let correlation = protocol::parameters_correlation(
            &params,
            &self.config.protocol,
            self.config.command.echo_tolerance,
        );
        self.send(line, correlation, self.config.command.timeout())
    }

    /// Set the drive parameters and wait until the device settles
    pub fn send_parameters(&self, amplitude: f64, frequency: f64, offset: f64) -> Result<TelemetrySnapshot> {
        self.issue_parameters(ParameterSet::new(amplitude, frequency, offset))?
            .wait()
    }

    /// Drive a constant current for a V-A characteristic point
    pub fn send_va_point(&self, current: f64) -> Result<TelemetrySnapshot> {
        let params = ParameterSet::va_point(current, &self.config.limits)?;
        self.issue_parameters(params)?.wait()
    }

    /// Set a frequency characteristic point; the arm must be at zero angle
    pub fn send_frequency_point(&self, amplitude: f64, frequency: f64) -> Result<TelemetrySnapshot> {
        protocol::ensure_zero_angle(&self.telemetry(), self.config.limits.zero_angle_tolerance)?;
        self.issue_parameters(ParameterSet::frequency_point(amplitude, frequency))?
            .wait()
    }

    /// Send a named action command without waiting
    pub fn issue_action(&self, name: &str) -> Result<CommandHandle> {
        let line = protocol::action_command(&self.config.protocol, name)?;
        let correlation = protocol::action_correlation(&self.config.protocol);
        self.send(line, correlation, self.config.command.timeout())
    }

    /// Trigger a named action (e.g. zero-angle calibration) and wait for it
    pub fn trigger_action(&self, name: &str) -> Result<TelemetrySnapshot> {
        self.issue_action(name)?.wait()
    }

    /// Subscribe to the ordered stream of framed lines
    pub fn subscribe_lines(&self) -> Receiver<FramedLine> {
        let (tx, rx) = bounded(SUBSCRIPTION_CAPACITY);
        let _ = self.command_sender.send(BackendCommand::Subscribe(tx));
        rx
    }

    /// Ask for a statistics message
    pub fn request_stats(&self) {
        let _ = self.command_sender.send(BackendCommand::RequestStats);
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.shared.read().status.clone()
    }

    /// Cause of the most recent channel failure
    pub fn last_error(&self) -> Option<String> {
        self.shared.read().last_error.clone()
    }

    /// Most recently framed line
    pub fn last_line(&self) -> Option<FramedLine> {
        self.shared.read().last_line.clone()
    }

    /// Copy of the live telemetry snapshot
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.shared.read().telemetry.clone()
    }

    /// Latest published statistics
    pub fn stats(&self) -> CollectionStats {
        self.shared.read().stats.clone()
    }

    /// Shared link state, for consumers that want to hold the read guard
    pub fn shared(&self) -> &SharedLinkState {
        &self.shared
    }

    /// Configuration the handle formats commands with
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Request shutdown
    pub fn shutdown(&self) {
        let _ = self.command_sender.send(BackendCommand::Shutdown);
    }
}

/// The acquisition backend that runs in a separate thread
pub struct DaqBackend {
    /// Configuration
    config: AppConfig,
    /// Channel to the instrument
    transport: Box<dyn Transport>,
    /// Receiver for commands
    command_receiver: Receiver<BackendCommand>,
    /// Sender for messages
    message_sender: Sender<BackendMessage>,
    /// Shared link state
    shared: SharedLinkState,
    /// Running flag
    running: Arc<AtomicBool>,
}

impl DaqBackend {
    /// Create a backend that talks to the configured serial port
    pub fn new(config: AppConfig) -> (Self, FrontendReceiver) {
        let transport = Box::new(SerialTransport::new(config.serial.clone()));
        Self::with_transport(config, transport)
    }

    /// Create a backend over any transport
    pub fn with_transport(config: AppConfig, transport: Box<dyn Transport>) -> (Self, FrontendReceiver) {
        let (cmd_tx, cmd_rx) = bounded(256);
        // Bounded for backpressure; the worker drops rather than blocks when full
        let (msg_tx, msg_rx) = bounded(10_000);
        let shared = SharedLinkState::new();

        let backend = Self {
            config: config.clone(),
            transport,
            command_receiver: cmd_rx,
            message_sender: msg_tx,
            shared: shared.clone(),
            running: Arc::new(AtomicBool::new(true)),
        };

        let frontend = FrontendReceiver {
            receiver: msg_rx,
            command_sender: cmd_tx,
            shared,
            config,
        };

        (backend, frontend)
    }

    /// Run the backend loop until shutdown
    pub fn run(self) {
        let mut worker = BackendWorker::new(
            self.config,
            self.transport,
            self.command_receiver,
            self.message_sender,
            self.shared,
            self.running,
        );
        worker.run();
    }

    /// Get a handle to stop the backend
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}
