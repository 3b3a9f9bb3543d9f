//! Transport trait for the instrument channel
//!
//! This module provides a common trait for everything the backend worker can
//! read lines from and write commands to: the real serial port and the
//! in-memory mock used by tests and the demo mode.

use crate::error::Result;

/// Counters for transport operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total bytes read
    pub bytes_read: u64,
    /// Total bytes written
    pub bytes_written: u64,
    /// Number of reads that returned data
    pub chunks_read: u64,
    /// Number of failed reads
    pub read_errors: u64,
    /// Number of failed writes
    pub write_errors: u64,
    /// Largest chunk seen
    pub max_chunk: usize,
}

impl TransportStats {
    /// Record a successful read of `bytes` bytes
    pub fn record_read(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.chunks_read += 1;
        self.bytes_read += bytes as u64;
        self.max_chunk = self.max_chunk.max(bytes);
    }

    /// Record a successful write
    pub fn record_write(&mut self, bytes: usize) {
        self.bytes_written += bytes as u64;
    }

    /// Average chunk size in bytes
    pub fn avg_chunk(&self) -> f64 {
        if self.chunks_read == 0 {
            0.0
        } else {
            self.bytes_read as f64 / self.chunks_read as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Unified interface for instrument channels
///
/// Implementations must be `Send` so the worker thread can own them.
///
/// # Example
///
/// ```ignore
/// fn pump(transport: &mut dyn Transport, framer: &mut LineFramer) -> Result<Vec<String>> {
///     let mut buf = [0u8; 256];
///     let n = transport.read_chunk(&mut buf)?;
///     Ok(framer.feed(&buf[..n]))
/// }
/// ```
pub trait Transport: Send {
    /// Open the channel
    ///
    /// Fails with `PermissionDenied` or `DeviceUnavailable` when the
    /// platform refuses or no device is present.
    fn open(&mut self) -> Result<()>;

    /// Close the channel; idempotent
    fn close(&mut self);

    /// Whether the channel is open
    fn is_open(&self) -> bool;

    /// Read whatever is available into `buf`
    ///
    /// Returns `Ok(0)` when the poll timeout elapsed without data. Any error
    /// means the channel is no longer usable.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all bytes to the channel
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Human-readable description of the channel (port name, mock label)
    fn describe(&self) -> String;

    /// Get transport statistics
    fn stats(&self) -> TransportStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_read_ignores_empty() {
        let mut stats = TransportStats::default();
        stats.record_read(0);
        assert_eq!(stats.chunks_read, 0);
        stats.record_read(8);
        stats.record_read(4);
        assert_eq!(stats.chunks_read, 2);
        assert_eq!(stats.bytes_read, 12);
        assert_eq!(stats.max_chunk, 8);
        assert!((stats.avg_chunk() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut stats = TransportStats::default();
        stats.record_write(5);
        stats.read_errors = 2;
        stats.reset();
        assert_eq!(stats, TransportStats::default());
    }
}
