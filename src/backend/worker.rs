//! Backend Worker Thread Implementation
//!
//! This module contains the read loop that runs in a separate thread and
//! owns the transport. It communicates with consumers through crossbeam
//! channels and the [`SharedLinkState`].
//!
//! # Responsibilities
//!
//! - **Command processing**: connect, disconnect, raw writes, correlated commands
//! - **Reading**: one bounded read per iteration while the channel is open
//! - **Framing**: bytes to lines, then telemetry, subscribers and the coordinator
//! - **Failure handling**: a read or write failure closes the channel exactly once
//! - **Statistics tracking**: byte, line and command counters
//!
//! # Ordering
//!
//! Lines are delivered to subscribers in the order they were framed. The
//! telemetry snapshot is updated before a line is broadcast, so a subscriber
//! that reads [`SharedLinkState`] after receiving a line never sees an older
//! snapshot than that line produced.

use crate::backend::coordinator::{CommandCoordinator, CommandOutcome, CommandRequest, Settled};
use crate::backend::framer::LineFramer;
use crate::backend::telemetry::TelemetryParser;
use crate::backend::transport::Transport;
use crate::backend::{BackendCommand, BackendMessage, SharedLinkState};
use crate::config::AppConfig;
use crate::error::{DaqError, Result};
use crate::sampling::extract::first_number;
use crate::types::{CollectionStats, ConnectionStatus, FramedLine};
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Size of the read buffer handed to the transport
const READ_BUFFER_SIZE: usize = 4096;

/// Interval between periodic statistics messages
const STATS_INTERVAL: Duration = Duration::from_millis(500);

/// Message queue slots kept free of stream traffic so status changes and
/// failures still reach a consumer that has fallen behind
const CONTROL_RESERVE: usize = 16;

/// The backend worker that runs the read loop
pub struct BackendWorker {
    /// Application configuration
    config: AppConfig,
    /// Command receiver
    command_rx: Receiver<BackendCommand>,
    /// Message sender
    message_tx: Sender<BackendMessage>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Channel to the instrument
    transport: Box<dyn Transport>,
    framer: LineFramer,
    parser: TelemetryParser,
    coordinator: CommandCoordinator,
    /// State published to consumers
    shared: SharedLinkState,
    /// Line subscribers, pruned when their receiver is dropped
    subscribers: Vec<Sender<FramedLine>>,
    /// Current connection status
    status: ConnectionStatus,
    /// Statistics
    stats: CollectionStats,
    /// Sequence number of the last framed line
    line_seq: u64,
    read_buf: Vec<u8>,
    /// Last time stats were published
    last_stats_time: Instant,
}

impl BackendWorker {
    /// Create a new backend worker
    pub fn new(
        config: AppConfig,
        transport: Box<dyn Transport>,
        command_rx: Receiver<BackendCommand>,
        message_tx: Sender<BackendMessage>,
        shared: SharedLinkState,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            command_rx,
            message_tx,
            running,
            transport,
            framer: LineFramer::new(),
            parser: TelemetryParser::new(),
            coordinator: CommandCoordinator::new(),
            shared,
            subscribers: Vec::new(),
            status: ConnectionStatus::Closed,
            stats: CollectionStats::default(),
            line_seq: 0,
            read_buf: vec![0; READ_BUFFER_SIZE],
            last_stats_time: Instant::now(),
        }
    }

    /// Run the main worker loop
    pub fn run(&mut self) {
        tracing::info!("Backend worker started ({})", self.transport.describe());

        while self.running.load(Ordering::SeqCst) {
            self.run_once();
        }

        // Cleanup
        if self.status.is_open() {
            self.close_channel("backend shutting down");
            self.update_connection_status(ConnectionStatus::Closed);
        }
        self.send_stats();

        let _ = self.message_tx.send(BackendMessage::Shutdown);
        tracing::info!("Backend worker stopped");
    }

    /// One loop iteration: commands, one read, time-based command outcomes
    pub fn run_once(&mut self) {
        self.process_commands();

        if self.status.is_open() {
            self.read_once();
            if let Some(settled) = self.coordinator.poll(Instant::now(), self.parser.snapshot()) {
                self.report_settled(settled);
            }
        } else {
            std::thread::sleep(self.config.command.idle_poll());
        }

        if self.last_stats_time.elapsed() >= STATS_INTERVAL {
            self.send_stats();
        }
    }

    /// Process pending commands
    fn process_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => self.handle_command(cmd),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Handle a single command
    fn handle_command(&mut self, cmd: BackendCommand) {
        match cmd {
            BackendCommand::Connect { reply } => {
                let result = self.handle_connect();
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BackendCommand::Disconnect => {
                self.handle_disconnect();
            }
            BackendCommand::WriteLine { line, reply } => {
                let result = self.handle_write_line(&line);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            BackendCommand::Send { request, reply } => {
                self.handle_send(request, reply);
            }
            BackendCommand::Subscribe(sender) => {
                self.subscribers.push(sender);
                tracing::debug!("Line subscriber added ({} total)", self.subscribers.len());
            }
            BackendCommand::RequestStats => {
                self.send_stats();
            }
            BackendCommand::Shutdown => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Handle connect command
    fn handle_connect(&mut self) -> Result<()> {
        if self.status.is_open() {
            return Ok(());
        }

        self.update_connection_status(ConnectionStatus::Opening);

        match self.transport.open() {
            Ok(()) => {
                self.framer.reset();
                self.shared.write().last_error = None;
                self.update_connection_status(ConnectionStatus::Open);
                tracing::info!("Connected to {}", self.transport.describe());
                Ok(())
            }
            Err(e) => {
                let cause = e.to_string();
                tracing::error!("Failed to connect: {}", cause);
                self.shared.write().last_error = Some(cause.clone());
                self.update_connection_status(ConnectionStatus::ClosedWithError(cause.clone()));
                self.emit(BackendMessage::ConnectionError(cause));
                Err(e)
            }
        }
    }

    /// Handle disconnect command; a no-op when already closed
    fn handle_disconnect(&mut self) {
        if self.status == ConnectionStatus::Closed {
            return;
        }
        if self.status.is_open() {
            self.close_channel("disconnected");
        }
        self.update_connection_status(ConnectionStatus::Closed);
        tracing::info!("Disconnected");
    }

    /// Flush the framer, cancel the pending command and release the port
    fn close_channel(&mut self, reason: &str) {
        if let Some(line) = self.framer.flush() {
            self.handle_line(line);
        }
        if let Some(settled) = self.coordinator.cancel(reason) {
            self.report_settled(settled);
        }
        self.transport.close();
    }

    /// Close the channel after a read or write failure
    fn fail_link(&mut self, cause: String) {
        tracing::error!("Channel failed: {}", cause);
        self.close_channel(&cause);
        self.shared.write().last_error = Some(cause.clone());
        self.update_connection_status(ConnectionStatus::ClosedWithError(cause.clone()));
        self.emit(BackendMessage::ConnectionError(cause));
    }

    fn handle_write_line(&mut self, line: &str) -> Result<()> {
        if !self.status.is_open() {
            return Err(DaqError::WriteFailed("channel is not open".to_string()));
        }
        self.write_line(line)
    }

    /// Write one line with the configured terminator
    fn write_line(&mut self, line: &str) -> Result<()> {
        let data = format!("{}{}", line, self.config.protocol.line_ending);
        match self.transport.write_all(data.as_bytes()) {
            Ok(()) => {
                self.stats.bytes_written += data.len() as u64;
                tracing::debug!("Wrote {:?}", line);
                Ok(())
            }
            Err(e) => {
                let cause = match e {
                    DaqError::WriteFailed(cause) => cause,
                    other => other.to_string(),
                };
                self.fail_link(cause.clone());
                Err(DaqError::WriteFailed(cause))
            }
        }
    }

    /// Write a command and hand it to the coordinator
    fn handle_send(&mut self, request: CommandRequest, reply: Sender<CommandOutcome>) {
        if !self.status.is_open() {
            let _ = reply.try_send(CommandOutcome::WriteFailed("channel is not open".to_string()));
            return;
        }

        // The previous command is superseded even if this write fails
        if let Some(settled) = self.coordinator.supersede() {
            self.report_settled(settled);
        }

        match self.write_line(&request.line) {
            Ok(()) => {}
            Err(DaqError::WriteFailed(cause)) => {
                let _ = reply.try_send(CommandOutcome::WriteFailed(cause));
                return;
            }
            Err(other) => {
                let _ = reply.try_send(CommandOutcome::WriteFailed(other.to_string()));
                return;
            }
        }

        let (id, _) = self
            .coordinator
            .issue(request, reply, Instant::now(), self.parser.snapshot());
        tracing::trace!("Command #{} pending", id);
    }

    /// Perform one bounded read
    fn read_once(&mut self) {
        match self.transport.read_chunk(&mut self.read_buf) {
            Ok(0) => {}
            Ok(n) => {
                self.stats.bytes_read += n as u64;
                let lines = self.framer.feed(&self.read_buf[..n]);
                for line in lines {
                    self.handle_line(line);
                }
            }
            Err(e) => {
                self.stats.read_errors += 1;
                self.fail_link(e.to_string());
            }
        }
    }

    /// Route one framed line to telemetry, subscribers and the coordinator
    fn handle_line(&mut self, text: String) {
        self.line_seq += 1;
        self.stats.lines_framed += 1;

        let received_at = Utc::now();
        let updated = self.parser.apply(&text, received_at);
        if updated {
            self.stats.telemetry_updates += 1;
        }

        let line = FramedLine {
            sequence: self.line_seq,
            value: first_number(&text),
            text,
            received_at,
        };

        {
            let mut shared = self.shared.write();
            shared.last_line = Some(line.clone());
            if updated {
                shared.telemetry = self.parser.snapshot().clone();
            }
        }

        let dropped = &mut self.stats.dropped_messages;
        self.subscribers.retain(|tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                *dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });

        if let Some(settled) = self.coordinator.on_line(&line.text, self.parser.snapshot()) {
            self.report_settled(settled);
        }

        self.emit_stream(BackendMessage::Line(line));
        if updated {
            self.emit_stream(BackendMessage::Telemetry(self.parser.snapshot().clone()));
        }
    }

    fn report_settled(&mut self, settled: Settled) {
        let stats = self.coordinator.stats();
        self.stats.commands_resolved = stats.resolved;
        self.stats.commands_timed_out = stats.timed_out;
        self.stats.commands_superseded = stats.superseded;
        self.emit(BackendMessage::CommandSettled(settled));
    }

    /// Update connection status and notify consumers
    fn update_connection_status(&mut self, status: ConnectionStatus) {
        self.status = status.clone();
        self.shared.write().status = status.clone();
        self.emit(BackendMessage::ConnectionStatus(status));
    }

    /// Publish statistics
    fn send_stats(&mut self) {
        self.last_stats_time = Instant::now();
        let transport = self.transport.stats();
        tracing::trace!(
            "Transport: {} chunks, avg {:.1} bytes, {} write errors",
            transport.chunks_read,
            transport.avg_chunk(),
            transport.write_errors
        );
        let stats = self.stats.clone();
        self.shared.write().stats = stats.clone();
        self.emit_stream(BackendMessage::Stats(stats));
    }

    /// Send a high-volume message, leaving the control reserve untouched
    fn emit_stream(&mut self, msg: BackendMessage) {
        let reserved = self
            .message_tx
            .capacity()
            .is_some_and(|cap| self.message_tx.len() + CONTROL_RESERVE >= cap);
        if reserved {
            self.stats.dropped_messages += 1;
            return;
        }
        self.emit(msg);
    }

    /// Try to send a message, tracking dropped messages if the queue is full
    fn emit(&mut self, msg: BackendMessage) {
        if let Err(TrySendError::Full(_)) = self.message_tx.try_send(msg) {
            self.stats.dropped_messages += 1;
        }
    }
}
