//! Command/response coordination
//!
//! A command is written to the device and then stays pending until its
//! correlation condition holds, its timeout elapses, a newer command
//! supersedes it or the connection closes. Exactly one command is pending at
//! a time; issuing another resolves the previous one as superseded
//! immediately, so a user changing inputs quickly never stacks up stale
//! settling delays.
//!
//! The coordinator lives on the worker thread and is driven from the read
//! loop:
//!
//! - [`CommandCoordinator::issue`] after the command line was written
//! - [`CommandCoordinator::on_line`] for every framed line
//! - [`CommandCoordinator::poll`] once per loop iteration for time-based outcomes
//! - [`CommandCoordinator::cancel`] on disconnect or link failure
//!
//! The issuing side holds a [`CommandHandle`] and blocks on it until the
//! outcome arrives.

use crate::error::{DaqError, Result};
use crate::types::{TelemetryField, TelemetrySnapshot};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// What marks a command as applied by the device
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    /// A telemetry update newer than the command reports these parameters
    Parameters {
        amplitude: f64,
        frequency: f64,
        offset: f64,
        tolerance: f64,
    },
    /// A telemetry update newer than the command reports this field value
    Field {
        field: TelemetryField,
        value: f64,
        tolerance: f64,
    },
    /// A line containing this token arrives
    Ack(String),
    /// No acknowledgement; the command counts as applied after this delay
    Settle(Duration),
}

impl Correlation {
    fn matches_line(&self, line: &str) -> bool {
        match self {
            Correlation::Ack(token) => !token.is_empty() && line.contains(token.as_str()),
            _ => false,
        }
    }

    fn matches_snapshot(&self, snapshot: &TelemetrySnapshot) -> bool {
        let near = |field: TelemetryField, want: f64, tolerance: f64| {
            snapshot
                .get(field)
                .is_some_and(|got| (got - want).abs() <= tolerance)
        };
        match *self {
            Correlation::Parameters {
                amplitude,
                frequency,
                offset,
                tolerance,
            } => {
                near(TelemetryField::Amplitude, amplitude, tolerance)
                    && near(TelemetryField::Frequency, frequency, tolerance)
                    && near(TelemetryField::Offset, offset, tolerance)
            }
            Correlation::Field {
                field,
                value,
                tolerance,
            } => near(field, value, tolerance),
            _ => false,
        }
    }
}

/// Final state of a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The correlation condition held; carries the snapshot at that moment
    Resolved(TelemetrySnapshot),
    /// The device did not acknowledge in time
    TimedOut { waited: Duration },
    /// A newer command took precedence
    Superseded,
    /// The connection closed while waiting
    Cancelled(String),
    /// The command could not be written
    WriteFailed(String),
}

impl CommandOutcome {
    /// Short label for logs and messages
    pub fn label(&self) -> &'static str {
        match self {
            CommandOutcome::Resolved(_) => "resolved",
            CommandOutcome::TimedOut { .. } => "timed out",
            CommandOutcome::Superseded => "superseded",
            CommandOutcome::Cancelled(_) => "cancelled",
            CommandOutcome::WriteFailed(_) => "write failed",
        }
    }
}

/// A command to write and correlate
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Line to write, without terminator
    pub line: String,
    /// Condition that settles the command
    pub correlation: Correlation,
    /// Maximum wait after the write
    pub timeout: Duration,
}

/// Issuer-side handle for one command
#[derive(Debug)]
pub struct CommandHandle {
    command: String,
    receiver: Receiver<CommandOutcome>,
}

impl CommandHandle {
    /// Create a handle and the sender the worker resolves it through
    pub fn channel(command: impl Into<String>) -> (Self, Sender<CommandOutcome>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                command: command.into(),
                receiver: rx,
            },
            tx,
        )
    }

    /// The command line this handle waits on
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Block until the command settles
    ///
    /// A timeout means the device state is unknown, not that the command
    /// failed; callers may retry or warn.
    pub fn wait(self) -> Result<TelemetrySnapshot> {
        let outcome = self
            .receiver
            .recv()
            .unwrap_or_else(|_| CommandOutcome::Cancelled("backend stopped".to_string()));
        outcome_to_result(&self.command, outcome)
    }

    /// Block for at most `limit`; `None` if the command is still pending
    pub fn wait_timeout(&self, limit: Duration) -> Option<CommandOutcome> {
        match self.receiver.recv_timeout(limit) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(CommandOutcome::Cancelled("backend stopped".to_string()))
            }
        }
    }

    /// The outcome, if it has already arrived
    pub fn try_outcome(&self) -> Option<CommandOutcome> {
        self.receiver.try_recv().ok()
    }
}

/// Map a command outcome onto the crate error taxonomy
pub fn outcome_to_result(command: &str, outcome: CommandOutcome) -> Result<TelemetrySnapshot> {
    match outcome {
        CommandOutcome::Resolved(snapshot) => Ok(snapshot),
        CommandOutcome::TimedOut { waited } => Err(DaqError::Timeout {
            command: command.to_string(),
            waited_ms: waited.as_millis() as u64,
        }),
        CommandOutcome::Superseded => Err(DaqError::Superseded(command.to_string())),
        CommandOutcome::Cancelled(reason) => Err(DaqError::Cancelled(reason)),
        CommandOutcome::WriteFailed(reason) => Err(DaqError::WriteFailed(reason)),
    }
}

/// A command that reached its final state
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub id: u64,
    pub command: String,
    pub outcome: CommandOutcome,
}

#[derive(Debug)]
struct PendingCommand {
    id: u64,
    request: CommandRequest,
    issued_at: Instant,
    /// Snapshot sequence at issue time; only newer updates can correlate
    baseline_sequence: u64,
    reply: Sender<CommandOutcome>,
}

/// Counters for command traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub issued: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub superseded: u64,
    pub cancelled: u64,
}

/// Tracks the single in-flight command of a channel
#[derive(Debug, Default)]
pub struct CommandCoordinator {
    pending: Option<PendingCommand>,
    next_id: u64,
    stats: CoordinatorStats,
}

impl CommandCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a command that has just been written
    ///
    /// A command still pending is resolved as superseded first.
    pub fn issue(
        &mut self,
        request: CommandRequest,
        reply: Sender<CommandOutcome>,
        now: Instant,
        snapshot: &TelemetrySnapshot,
    ) -> (u64, Option<Settled>) {
        let superseded = self.supersede();
        self.next_id += 1;
        let id = self.next_id;
        tracing::debug!(
            "Command #{} issued: {:?} (timeout {:?})",
            id,
            request.line,
            request.timeout
        );
        self.pending = Some(PendingCommand {
            id,
            request,
            issued_at: now,
            baseline_sequence: snapshot.sequence,
            reply,
        });
        self.stats.issued += 1;
        (id, superseded)
    }

    /// Resolve the pending command, if any, as superseded
    pub fn supersede(&mut self) -> Option<Settled> {
        self.finish(CommandOutcome::Superseded)
    }

    /// Check the pending command against a newly framed line and the
    /// snapshot after that line was applied
    pub fn on_line(&mut self, line: &str, snapshot: &TelemetrySnapshot) -> Option<Settled> {
        let pending = self.pending.as_ref()?;
        let correlation = &pending.request.correlation;
        let settled = correlation.matches_line(line)
            || (snapshot.sequence > pending.baseline_sequence
                && correlation.matches_snapshot(snapshot));
        if settled {
            self.finish(CommandOutcome::Resolved(snapshot.clone()))
        } else {
            None
        }
    }

    /// Apply time-based outcomes: settle delays and timeouts
    pub fn poll(&mut self, now: Instant, snapshot: &TelemetrySnapshot) -> Option<Settled> {
        let pending = self.pending.as_ref()?;
        let waited = now.saturating_duration_since(pending.issued_at);
        if let Correlation::Settle(delay) = pending.request.correlation {
            if waited >= delay {
                return self.finish(CommandOutcome::Resolved(snapshot.clone()));
            }
        }
        if waited >= pending.request.timeout {
            tracing::warn!(
                "Command {:?} not acknowledged after {:?}",
                pending.request.line,
                waited
            );
            return self.finish(CommandOutcome::TimedOut { waited });
        }
        None
    }

    /// Fail the pending command because the connection closed
    pub fn cancel(&mut self, reason: &str) -> Option<Settled> {
        self.finish(CommandOutcome::Cancelled(reason.to_string()))
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_id(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.id)
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    fn finish(&mut self, outcome: CommandOutcome) -> Option<Settled> {
        let pending = self.pending.take()?;
        match outcome {
            CommandOutcome::Resolved(_) => self.stats.resolved += 1,
            CommandOutcome::TimedOut { .. } => self.stats.timed_out += 1,
            CommandOutcome::Superseded => self.stats.superseded += 1,
            CommandOutcome::Cancelled(_) | CommandOutcome::WriteFailed(_) => {
                self.stats.cancelled += 1
            }
        }
        tracing::debug!("Command #{} {}", pending.id, outcome.label());
        // The issuer may have dropped its handle
        let _ = pending.reply.try_send(outcome.clone());
        Some(Settled {
            id: pending.id,
            command: pending.request.line,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::telemetry::TelemetryParser;
    use chrono::Utc;

    fn request(line: &str, correlation: Correlation) -> CommandRequest {
        CommandRequest {
            line: line.to_string(),
            correlation,
            timeout: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_settle_resolves_after_delay() {
        let mut coord = CommandCoordinator::new();
        let snap = TelemetrySnapshot::new();
        let (handle, tx) = CommandHandle::channel("SET 1 2 3");
        let t0 = Instant::now();
        coord.issue(
            request("SET 1 2 3", Correlation::Settle(Duration::from_millis(100))),
            tx,
            t0,
            &snap,
        );

        assert!(coord.poll(t0 + Duration::from_millis(50), &snap).is_none());
        assert!(handle.try_outcome().is_none());

        let settled = coord.poll(t0 + Duration::from_millis(100), &snap).unwrap();
        assert_eq!(settled.outcome, CommandOutcome::Resolved(snap.clone()));
        assert!(!coord.is_pending());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_timeout() {
        let mut coord = CommandCoordinator::new();
        let snap = TelemetrySnapshot::new();
        let (handle, tx) = CommandHandle::channel("ZERO");
        let t0 = Instant::now();
        coord.issue(request("ZERO", Correlation::Ack("OK".into())), tx, t0, &snap);

        assert!(coord.poll(t0 + Duration::from_millis(499), &snap).is_none());
        let settled = coord.poll(t0 + Duration::from_millis(500), &snap).unwrap();
        assert!(matches!(settled.outcome, CommandOutcome::TimedOut { .. }));

        let err = handle.wait().unwrap_err();
        assert!(matches!(err, DaqError::Timeout { waited_ms: 500, .. }));
        assert!(err.is_recoverable());
        assert_eq!(coord.stats().timed_out, 1);
    }

    #[test]
    fn test_ack_token() {
        let mut coord = CommandCoordinator::new();
        let snap = TelemetrySnapshot::new();
        let (handle, tx) = CommandHandle::channel("ZERO");
        coord.issue(request("ZERO", Correlation::Ack("OK".into())), tx, Instant::now(), &snap);

        assert!(coord.on_line("voltage=1.0", &snap).is_none());
        assert!(coord.on_line("OK zero", &snap).is_some());
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_parameter_echo_requires_fresh_update() {
        let mut parser = TelemetryParser::new();
        parser.apply("amplitude=1000 frequency=500 offset=500", Utc::now());

        let mut coord = CommandCoordinator::new();
        let (handle, tx) = CommandHandle::channel("SET 1000 500 500");
        coord.issue(
            request(
                "SET 1000 500 500",
                Correlation::Parameters {
                    amplitude: 1000.0,
                    frequency: 500.0,
                    offset: 500.0,
                    tolerance: 0.5,
                },
            ),
            tx,
            Instant::now(),
            parser.snapshot(),
        );

        // Stale values from before the command do not count
        assert!(coord.on_line("", parser.snapshot()).is_none());

        parser.apply("amplitude=1000 frequency=499.8 offset=500", Utc::now());
        let settled = coord.on_line("amplitude=1000 frequency=499.8 offset=500", parser.snapshot());
        assert!(settled.is_some());

        let snap = handle.wait().unwrap();
        assert_eq!(snap.frequency(), Some(499.8));
    }

    #[test]
    fn test_field_correlation() {
        let mut parser = TelemetryParser::new();
        let mut coord = CommandCoordinator::new();
        let (_handle, tx) = CommandHandle::channel("ANGLE 90");
        coord.issue(
            request(
                "ANGLE 90",
                Correlation::Field {
                    field: TelemetryField::Angle,
                    value: 90.0,
                    tolerance: 1.0,
                },
            ),
            tx,
            Instant::now(),
            parser.snapshot(),
        );
        parser.apply("angle=45", Utc::now());
        assert!(coord.on_line("angle=45", parser.snapshot()).is_none());
        parser.apply("angle=89.5", Utc::now());
        assert!(coord.on_line("angle=89.5", parser.snapshot()).is_some());
    }

    #[test]
    fn test_new_command_supersedes_pending() {
        let mut coord = CommandCoordinator::new();
        let snap = TelemetrySnapshot::new();
        let t0 = Instant::now();

        let (handle_a, tx_a) = CommandHandle::channel("SET A");
        let (id_a, superseded) =
            coord.issue(request("SET A", Correlation::Ack("OK".into())), tx_a, t0, &snap);
        assert!(superseded.is_none());

        let (handle_b, tx_b) = CommandHandle::channel("SET B");
        let (id_b, superseded) =
            coord.issue(request("SET B", Correlation::Ack("OK".into())), tx_b, t0, &snap);
        let superseded = superseded.unwrap();
        assert_eq!(superseded.id, id_a);
        assert_eq!(superseded.outcome, CommandOutcome::Superseded);
        assert_eq!(coord.pending_id(), Some(id_b));

        assert!(matches!(handle_a.wait(), Err(DaqError::Superseded(_))));
        assert!(handle_b.try_outcome().is_none());

        let settled = coord.poll(t0 + Duration::from_secs(1), &snap).unwrap();
        assert_eq!(settled.id, id_b);
        assert!(matches!(handle_b.wait(), Err(DaqError::Timeout { .. })));
        assert_eq!(coord.stats().superseded, 1);
    }

    #[test]
    fn test_cancel() {
        let mut coord = CommandCoordinator::new();
        let snap = TelemetrySnapshot::new();
        let (handle, tx) = CommandHandle::channel("SET");
        coord.issue(request("SET", Correlation::Settle(Duration::from_secs(5))), tx, Instant::now(), &snap);
        assert!(coord.cancel("disconnected").is_some());
        assert!(coord.cancel("again").is_none());
        assert!(matches!(handle.wait(), Err(DaqError::Cancelled(_))));
    }

    #[test]
    fn test_dropped_handle_does_not_block() {
        let mut coord = CommandCoordinator::new();
        let snap = TelemetrySnapshot::new();
        let (handle, tx) = CommandHandle::channel("SET");
        drop(handle);
        coord.issue(request("SET", Correlation::Settle(Duration::ZERO)), tx, Instant::now(), &snap);
        assert!(coord.poll(Instant::now(), &snap).is_some());
    }

    #[test]
    fn test_handle_reports_stopped_backend() {
        let (handle, tx) = CommandHandle::channel("SET");
        drop(tx);
        assert!(matches!(handle.wait(), Err(DaqError::Cancelled(_))));
    }
}
