//! Mock Transport Implementation for Testing
//!
//! This module provides an in-memory instrument that can be used to exercise
//! the backend without real hardware. It is driven through a cloneable
//! [`MockHandle`], so a test keeps control of the device after the transport
//! has been moved into the worker thread.
//!
//! # Features
//!
//! - **Scripted input**: Queue raw chunks or whole lines for the read loop
//! - **Fault injection**: Refuse to open, fail a read, fail writes
//! - **Write capture**: Inspect every line the backend wrote
//! - **Instrument echo**: Answer parameter commands with matching telemetry
//! - **Acknowledgements**: Answer every command with a token line
//! - **Pattern generation**: Emit a periodic stream of generated readings
//!
//! # Data Patterns
//!
//! - [`MockSignal::Constant`] - Fixed value
//! - [`MockSignal::Sine`] - Sinusoid sampled once per emitted line
//! - [`MockSignal::Counter`] - Incrementing counter with wrap-around
//!
//! # Example
//!
//! ```ignore
//! use labdaq::backend::mock_transport::{MockTransport, MockSignal};
//!
//! let (transport, handle) = MockTransport::new();
//! handle.push_line("voltage=1.25 angle=0.4");
//! handle.set_signal(Some(MockSignal::Constant(1523.0)), "period");
//!
//! let (backend, frontend) = DaqBackend::with_transport(config, Box::new(transport));
//! ```

use crate::backend::transport::{Transport, TransportStats};
use crate::error::{DaqError, Result};
use crate::sampling::extract::numbers;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Pattern for generated readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockSignal {
    /// Constant value
    Constant(f64),
    /// Sine wave over `period` emitted lines
    Sine {
        period: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments once per line
    Counter { step: f64, min: f64, max: f64 },
}

impl MockSignal {
    fn value_at(&self, tick: u64, counter: &mut f64) -> f64 {
        match *self {
            MockSignal::Constant(v) => v,
            MockSignal::Sine {
                period,
                amplitude,
                offset,
            } => {
                let phase = if period > 0.0 { tick as f64 / period } else { 0.0 };
                offset + amplitude * (2.0 * std::f64::consts::PI * phase).sin()
            }
            MockSignal::Counter { step, min, max } => {
                *counter += step;
                if *counter > max {
                    *counter = min;
                } else if *counter < min {
                    *counter = max;
                }
                *counter
            }
        }
    }
}

/// Why the mock refuses to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenRefusal {
    PermissionDenied,
    Unavailable,
}

#[derive(Debug)]
struct MockState {
    open: bool,
    open_count: usize,
    refusal: Option<OpenRefusal>,
    chunks: VecDeque<Vec<u8>>,
    read_error: Option<String>,
    fail_writes: bool,
    written: Vec<String>,
    echo: bool,
    ack: Option<String>,
    signal: Option<MockSignal>,
    signal_key: String,
    signal_interval: Duration,
    last_emit: Option<Instant>,
    tick: u64,
    counter: f64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            open: false,
            open_count: 0,
            refusal: None,
            chunks: VecDeque::new(),
            read_error: None,
            fail_writes: false,
            written: Vec::new(),
            echo: false,
            ack: None,
            signal: None,
            signal_key: "value".to_string(),
            signal_interval: Duration::from_millis(10),
            last_emit: None,
            tick: 0,
            counter: 0.0,
        }
    }
}

/// Shared control over a [`MockTransport`]
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a raw chunk exactly as given
    pub fn push_chunk(&self, chunk: impl AsRef<[u8]>) {
        self.lock().chunks.push_back(chunk.as_ref().to_vec());
    }

    /// Queue a line followed by CRLF
    pub fn push_line(&self, line: &str) {
        self.push_chunk(format!("{}\r\n", line));
    }

    /// Queue several lines as one chunk
    pub fn push_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        let mut chunk = String::new();
        for line in lines {
            chunk.push_str(line);
            chunk.push('\n');
        }
        self.push_chunk(chunk);
    }

    /// Fail the next read once the queued chunks are drained
    pub fn inject_read_error(&self, message: &str) {
        self.lock().read_error = Some(message.to_string());
    }

    /// Make every write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make `open` fail
    pub fn refuse_open(&self, refusal: Option<OpenRefusal>) {
        self.lock().refusal = refusal;
    }

    /// Answer commands carrying three numbers with `amplitude=.. frequency=.. offset=..`
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Answer every command with a line containing `token`
    pub fn set_ack(&self, token: Option<&str>) {
        self.lock().ack = token.map(str::to_string);
    }

    /// Emit generated readings as `<key>=<value>` lines while idle
    pub fn set_signal(&self, signal: Option<MockSignal>, key: &str) {
        let mut state = self.lock();
        state.signal = signal;
        state.signal_key = key.to_string();
        state.tick = 0;
        state.counter = 0.0;
        state.last_emit = None;
    }

    /// Minimum spacing between generated readings
    pub fn set_signal_interval(&self, interval: Duration) {
        self.lock().signal_interval = interval;
    }

    /// Lines written by the backend, without terminators
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// How many times the transport was opened
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Chunks queued but not yet read
    pub fn pending_chunks(&self) -> usize {
        self.lock().chunks.len()
    }
}

/// Mock transport for testing without real hardware
pub struct MockTransport {
    handle: MockHandle,
    /// How long an idle read blocks, standing in for the serial read timeout
    idle_delay: Duration,
    stats: TransportStats,
}

impl MockTransport {
    /// Create a mock transport and the handle that controls it
    pub fn new() -> (Self, MockHandle) {
        let handle = MockHandle::default();
        let transport = Self {
            handle: handle.clone(),
            idle_delay: Duration::from_millis(1),
            stats: TransportStats::default(),
        };
        (transport, handle)
    }

    /// A mock that emits a generated reading every `interval`
    pub fn with_signal(signal: MockSignal, key: &str, interval: Duration) -> (Self, MockHandle) {
        let (transport, handle) = Self::new();
        handle.set_signal(Some(signal), key);
        handle.set_signal_interval(interval);
        (transport, handle)
    }

    fn respond(state: &mut MockState, line: &str) {
        if state.echo {
            let values = numbers(line);
            if let [amplitude, frequency, offset, ..] = values[..] {
                state.chunks.push_back(
                    format!(
                        "amplitude={} frequency={} offset={}\r\n",
                        amplitude, frequency, offset
                    )
                    .into_bytes(),
                );
            }
        }
        if let Some(ref token) = state.ack {
            state.chunks.push_back(format!("{}\r\n", token).into_bytes());
        }
    }

    fn generate(state: &mut MockState) -> Option<Vec<u8>> {
        let signal = state.signal?;
        let now = Instant::now();
        if let Some(last) = state.last_emit {
            if now.duration_since(last) < state.signal_interval {
                return None;
            }
        }
        state.last_emit = Some(now);
        state.tick += 1;
        let value = signal.value_at(state.tick, &mut state.counter);
        Some(format!("{}={:.4}\r\n", state.signal_key, value).into_bytes())
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<()> {
        let mut state = self.handle.lock();
        match state.refusal {
            Some(OpenRefusal::PermissionDenied) => {
                return Err(DaqError::PermissionDenied("mock device refused access".to_string()))
            }
            Some(OpenRefusal::Unavailable) => {
                return Err(DaqError::DeviceUnavailable("mock device not present".to_string()))
            }
            None => {}
        }
        state.open = true;
        state.open_count += 1;
        self.stats.reset();
        tracing::debug!("Mock transport opened");
        Ok(())
    }

    fn close(&mut self) {
        self.handle.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let chunk = {
            let mut state = self.handle.lock();
            if !state.open {
                return Err(DaqError::NotConnected);
            }
            match state.chunks.pop_front() {
                Some(chunk) => Some(chunk),
                None => match state.read_error.take() {
                    Some(message) => {
                        self.stats.read_errors += 1;
                        return Err(DaqError::Io(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            message,
                        )));
                    }
                    None => Self::generate(&mut state),
                },
            }
        };

        let Some(mut chunk) = chunk else {
            std::thread::sleep(self.idle_delay);
            return Ok(0);
        };

        if chunk.len() > buf.len() {
            let rest = chunk.split_off(buf.len());
            self.handle.lock().chunks.push_front(rest);
        }
        buf[..chunk.len()].copy_from_slice(&chunk);
        self.stats.record_read(chunk.len());
        Ok(chunk.len())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.handle.lock();
        if !state.open {
            return Err(DaqError::WriteFailed("mock device is not open".to_string()));
        }
        if state.fail_writes {
            self.stats.write_errors += 1;
            return Err(DaqError::WriteFailed("mock write failure".to_string()));
        }
        let line = String::from_utf8_lossy(data)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        Self::respond(&mut state, &line);
        state.written.push(line);
        self.stats.record_write(data.len());
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
