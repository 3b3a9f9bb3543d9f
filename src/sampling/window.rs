//! Sample window and the sampling session state machine
//!
//! ```text
//!            start()                capacity reached
//!   Idle ───────────────▶ Armed ─────────────────────▶ Full
//!    ▲                      │
//!    │ reset()              │ stop()
//!    │                      ▼
//!    └──────────────────  Stopped
//! ```
//!
//! `start()` is accepted from every state and always begins a fresh window.
//! The first value after `start()` is discarded as a settling sample. Lines
//! framed before the most recent `start()` are never collected, even when
//! they are still queued on the subscription.

use crate::analysis::{self, OutlierReport, TimingRow};
use crate::config::SamplingProfile;
use crate::error::{DaqError, Result};
use crate::sampling::extract::first_number;
use crate::types::FramedLine;
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;

/// Ordered raw samples bounded by a capacity
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWindow {
    samples: Vec<f64>,
    capacity: usize,
    minimum: usize,
    must_restart: bool,
}

impl SampleWindow {
    pub fn new(capacity: usize, minimum: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            minimum,
            must_restart: false,
        }
    }

    /// Append a sample, dropping the oldest beyond capacity; returns whether
    /// the window is now full
    pub fn push(&mut self, value: f64) -> bool {
        self.samples.push(value);
        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
        self.is_full()
    }

    /// Remove the sample at `index`, keeping the order of the rest
    ///
    /// Dropping below the minimum sets the must-restart flag.
    pub fn remove(&mut self, index: usize) -> Result<f64> {
        if index >= self.samples.len() {
            return Err(DaqError::SampleIndex {
                index,
                len: self.samples.len(),
            });
        }
        let value = self.samples.remove(index);
        if self.samples.len() < self.minimum {
            self.must_restart = true;
        }
        Ok(value)
    }

    /// Empty the window and clear the must-restart flag
    pub fn clear(&mut self) {
        self.samples.clear();
        self.must_restart = false;
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn minimum(&self) -> usize {
        self.minimum
    }

    pub fn must_restart(&self) -> bool {
        self.must_restart
    }

    /// Whether a result may be produced from the current contents
    pub fn check(&self) -> Result<()> {
        if self.must_restart {
            return Err(DaqError::MustRestart);
        }
        if self.samples.len() < self.minimum {
            return Err(DaqError::InsufficientSamples {
                have: self.samples.len(),
                need: self.minimum,
            });
        }
        Ok(())
    }
}

/// Lifecycle of a sampling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not collecting; window empty
    #[default]
    Idle,
    /// Collecting values
    Armed,
    /// Capacity reached; collection stopped
    Full,
    /// Stopped early by the user
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Armed => write!(f, "Collecting"),
            SessionState::Full => write!(f, "Full"),
            SessionState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Reduced result of a finished window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    /// Profile the window was collected with
    pub profile: String,
    /// Samples in collection order
    pub samples: Vec<f64>,
    /// Mean of all samples
    pub average: Option<f64>,
    /// Block sums over the most recent samples, when the profile has blocks
    pub block_sums: Vec<f64>,
    /// Cumulative time at every block boundary
    pub timing: Vec<TimingRow>,
    /// Informational outlier flags
    pub outliers: OutlierReport,
}

/// One measurement session over a live line stream
#[derive(Debug, Clone)]
pub struct SamplingSession {
    profile: SamplingProfile,
    state: SessionState,
    window: SampleWindow,
    /// Set once the settling sample has been discarded
    settled: bool,
    /// Wall-clock time of the most recent `start()`
    armed_at: Option<DateTime<Utc>>,
}

impl SamplingSession {
    pub fn new(profile: SamplingProfile) -> Self {
        let window = SampleWindow::new(profile.capacity, profile.minimum);
        Self {
            profile,
            state: SessionState::Idle,
            window,
            settled: false,
            armed_at: None,
        }
    }

    /// Clear the window and begin collecting
    pub fn start(&mut self) {
        self.window.clear();
        self.settled = false;
        self.armed_at = Some(Utc::now());
        self.state = SessionState::Armed;
        tracing::info!(
            "Sampling '{}' started (capacity {}, minimum {})",
            self.profile.name,
            self.profile.capacity,
            self.profile.minimum
        );
    }

    /// Stop collecting, keeping the samples
    pub fn stop(&mut self) {
        if self.state == SessionState::Armed {
            self.state = SessionState::Stopped;
            tracing::info!("Sampling stopped with {} samples", self.window.len());
        }
    }

    /// Return to Idle with an empty window
    pub fn reset(&mut self) {
        self.window.clear();
        self.settled = false;
        self.armed_at = None;
        self.state = SessionState::Idle;
    }

    /// Feed a raw line; lines without a number are ignored
    pub fn observe_line(&mut self, line: &str) -> bool {
        match first_number(line) {
            Some(value) => self.observe_value(value),
            None => false,
        }
    }

    /// Feed a raw value; returns whether it was added to the window
    pub fn observe_value(&mut self, value: f64) -> bool {
        if self.state != SessionState::Armed {
            return false;
        }
        if !self.settled {
            self.settled = true;
            tracing::debug!("Discarded settling sample {}", value);
            return false;
        }
        if self.window.push(value) {
            self.state = SessionState::Full;
            tracing::info!("Sampling window full ({} samples)", self.window.len());
        }
        true
    }

    /// Drain a line subscription without blocking; returns samples added
    ///
    /// Lines framed before the current `start()` are consumed and dropped.
    pub fn pump(&mut self, lines: &Receiver<FramedLine>) -> usize {
        let mut added = 0;
        let mut stale = 0;
        for line in lines.try_iter() {
            if !self.is_current(&line) {
                stale += 1;
                continue;
            }
            if line.value.is_some_and(|v| self.observe_value(v)) {
                added += 1;
            }
        }
        if stale > 0 {
            tracing::debug!("Skipped {} line(s) framed before start", stale);
        }
        added
    }

    /// Whether a line was framed while the current window was armed
    fn is_current(&self, line: &FramedLine) -> bool {
        self.armed_at.is_some_and(|armed_at| line.received_at >= armed_at)
    }

    /// Remove a sample by position
    pub fn remove_sample(&mut self, index: usize) -> Result<f64> {
        let value = self.window.remove(index)?;
        if self.window.must_restart() {
            tracing::warn!(
                "Window dropped to {} samples (minimum {}); restart required",
                self.window.len(),
                self.window.minimum()
            );
        }
        Ok(value)
    }

    /// Reduce the window; fails while the sampling invariants do not hold
    pub fn finalize(&self) -> Result<WindowSummary> {
        self.window.check()?;

        let samples = self.window.samples();
        let block_sums = if self.profile.has_blocks() {
            analysis::block_sums(samples, self.profile.block_size, self.profile.block_count)?
        } else {
            Vec::new()
        };
        let timing = if block_sums.is_empty() {
            Vec::new()
        } else {
            analysis::timing_table(&block_sums, self.profile.block_size)
        };
        let outliers = analysis::detect_outliers(
            samples,
            self.profile.outlier_window,
            self.profile.outlier_threshold,
        );
        if outliers.has_outliers() {
            tracing::warn!(
                "{} sample(s) deviate more than {:.0}% from the mean",
                outliers.flagged.len(),
                self.profile.outlier_threshold * 100.0
            );
        }

        Ok(WindowSummary {
            profile: self.profile.name.clone(),
            samples: samples.to_vec(),
            average: analysis::average(samples),
            block_sums,
            timing,
            outliers,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn samples(&self) -> &[f64] {
        self.window.samples()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn must_restart(&self) -> bool {
        self.window.must_restart()
    }

    /// Whether `finalize` would currently succeed
    pub fn can_finalize(&self) -> bool {
        self.window.check().is_ok()
    }

    pub fn profile(&self) -> &SamplingProfile {
        &self.profile
    }

    /// Outlier flags for the current contents
    pub fn outliers(&self) -> OutlierReport {
        analysis::detect_outliers(
            self.window.samples(),
            self.profile.outlier_window,
            self.profile.outlier_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn feed(session: &mut SamplingSession, values: impl IntoIterator<Item = f64>) {
        for v in values {
            session.observe_value(v);
        }
    }

    #[test]
    fn test_window_truncates_oldest() {
        let mut window = SampleWindow::new(3, 2);
        assert!(!window.push(1.0));
        assert!(!window.push(2.0));
        assert!(window.push(3.0));
        assert!(window.push(4.0));
        assert_eq!(window.samples(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_window_remove_out_of_range() {
        let mut window = SampleWindow::new(3, 1);
        window.push(1.0);
        assert!(matches!(
            window.remove(1),
            Err(DaqError::SampleIndex { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_first_value_is_discarded() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        assert!(!session.observe_value(999.0));
        assert!(session.observe_value(1.0));
        assert_eq!(session.samples(), &[1.0]);
    }

    #[test]
    fn test_values_ignored_unless_armed() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        assert!(!session.observe_value(1.0));
        assert_eq!(session.state(), SessionState::Idle);

        session.start();
        feed(&mut session, [0.0, 1.0, 2.0]);
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.observe_value(3.0));
        assert_eq!(session.samples(), &[1.0, 2.0]);
    }

    #[test]
    fn test_capacity_collects_samples_two_through_capacity_plus_one() {
        let profile = SamplingProfile::quick();
        let mut session = SamplingSession::new(profile.clone());
        session.start();
        feed(&mut session, (1..=profile.capacity + 1).map(|i| i as f64));

        assert_eq!(session.state(), SessionState::Full);
        let expected: Vec<f64> = (2..=profile.capacity + 1).map(|i| i as f64).collect();
        assert_eq!(session.samples(), expected.as_slice());

        // Full stops collection
        assert!(!session.observe_value(1000.0));
        assert_eq!(session.len(), profile.capacity);
    }

    #[test]
    fn test_observe_line_uses_first_number() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        assert!(!session.observe_line("T=1.0 s"));
        assert!(session.observe_line("T=1.523 s (ch 2)"));
        assert!(!session.observe_line("no numbers here"));
        assert_eq!(session.samples(), &[1.523]);
    }

    #[test]
    fn test_must_restart_after_pruning_below_minimum() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        feed(&mut session, (0..=6).map(f64::from));
        assert_eq!(session.len(), 6);

        while session.len() >= 5 {
            session.remove_sample(0).unwrap();
        }
        assert!(session.must_restart());
        assert!(matches!(session.finalize(), Err(DaqError::MustRestart)));

        // Refilling the window does not clear the flag
        feed(&mut session, (10..20).map(f64::from));
        assert_eq!(session.len(), 14);
        assert!(matches!(session.finalize(), Err(DaqError::MustRestart)));

        session.start();
        assert!(!session.must_restart());
        assert!(session.is_empty());
    }

    #[test]
    fn test_must_restart_after_pruning_full_window() {
        let profile = SamplingProfile::period_blocks();
        let mut session = SamplingSession::new(profile.clone());
        session.start();
        feed(&mut session, (0..=100).map(f64::from));
        assert_eq!(session.state(), SessionState::Full);

        for _ in 0..10 {
            session.remove_sample(50).unwrap();
        }
        assert_eq!(session.len(), 90);
        assert!(!session.must_restart());
        assert!(session.finalize().is_ok());

        session.remove_sample(0).unwrap();
        assert!(session.must_restart());
        assert!(matches!(session.finalize(), Err(DaqError::MustRestart)));
    }

    #[test]
    fn test_removal_keeps_order() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        feed(&mut session, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(session.remove_sample(2).unwrap(), 3.0);
        assert_eq!(session.samples(), &[1.0, 2.0, 4.0, 5.0, 6.0]);
        assert!(!session.must_restart());
        assert!(session.can_finalize());
    }

    #[test]
    fn test_finalize_requires_minimum() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        feed(&mut session, [0.0, 1.0, 2.0]);
        assert!(matches!(
            session.finalize(),
            Err(DaqError::InsufficientSamples { have: 2, need: 5 })
        ));
    }

    #[test]
    fn test_quick_summary() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        feed(&mut session, [9.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        session.stop();

        let summary = session.finalize().unwrap();
        assert_eq!(summary.average, Some(3.0));
        assert!(summary.block_sums.is_empty());
        assert!(summary.timing.is_empty());
        assert_eq!(summary.samples.len(), 5);
    }

    #[test]
    fn test_period_blocks_summary() {
        let mut session = SamplingSession::new(SamplingProfile::period_blocks());
        session.start();
        session.observe_value(0.0);
        feed(&mut session, (1..=90).map(f64::from));
        session.stop();

        let summary = session.finalize().unwrap();
        assert_eq!(summary.block_sums.len(), 9);
        assert_eq!(summary.block_sums[0], 55.0);
        assert_eq!(summary.block_sums[8], 855.0);
        assert_eq!(summary.timing.len(), 10);
        assert_eq!(summary.timing[1].time, 55.0);
        assert_eq!(summary.timing[9].periods, 90);
        assert_eq!(summary.timing[9].time, 4095.0);
    }

    fn framed(sequence: u64, text: &str, received_at: DateTime<Utc>) -> FramedLine {
        FramedLine {
            sequence,
            text: text.to_string(),
            received_at,
            value: first_number(text),
        }
    }

    #[test]
    fn test_pump_drains_subscription() {
        let (tx, rx) = bounded(16);
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        for (i, text) in ["settling 7", "status ok", "1.5", "2.5"].iter().enumerate() {
            tx.send(framed(i as u64 + 1, text, Utc::now())).unwrap();
        }

        assert_eq!(session.pump(&rx), 2);
        assert_eq!(session.samples(), &[1.5, 2.5]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_pump_skips_lines_framed_before_start() {
        let (tx, rx) = bounded(64);
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        for i in 0..=20 {
            tx.send(framed(i + 1, &format!("{}.0", i), Utc::now())).unwrap();
        }
        assert_eq!(session.pump(&rx), 20);
        assert_eq!(session.state(), SessionState::Full);

        // Device keeps streaming while the window sits full
        let earlier = Utc::now() - chrono::Duration::seconds(1);
        for i in 0..10 {
            tx.send(framed(22 + i, "999.0", earlier)).unwrap();
        }

        session.start();
        assert_eq!(session.pump(&rx), 0);
        assert!(session.is_empty());
        assert!(rx.is_empty());

        // The settling sample is the first line framed after start
        for (i, text) in ["7.0", "1.0", "2.0"].iter().enumerate() {
            tx.send(framed(40 + i as u64, text, Utc::now())).unwrap();
        }
        assert_eq!(session.pump(&rx), 2);
        assert_eq!(session.samples(), &[1.0, 2.0]);
    }

    #[test]
    fn test_pump_before_start_collects_nothing() {
        let (tx, rx) = bounded(4);
        tx.send(framed(1, "1.0", Utc::now())).unwrap();
        let mut session = SamplingSession::new(SamplingProfile::quick());
        assert_eq!(session.pump(&rx), 0);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_reset() {
        let mut session = SamplingSession::new(SamplingProfile::quick());
        session.start();
        feed(&mut session, [0.0, 1.0]);
        session.reset();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.is_empty());
    }
}
