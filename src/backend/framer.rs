//! Line framing for the serial byte stream
//!
//! The instrument terminates lines with CR, LF or CRLF. Reads return
//! arbitrary slices of the stream, so a terminator pair may be split across
//! two chunks and a multi-byte UTF-8 character may be split anywhere. The
//! framer buffers raw bytes and only decodes a line once its terminator has
//! been seen, so neither split produces a spurious or mangled line.

/// Splits a chunked byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Bytes of the current, not yet terminated line
    buffer: Vec<u8>,
    /// The previous chunk ended in CR; a leading LF belongs to that terminator
    pending_cr: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }

            match byte {
                b'\r' => {
                    lines.push(self.take_line());
                    self.pending_cr = true;
                }
                b'\n' => lines.push(self.take_line()),
                _ => self.buffer.push(byte),
            }
        }

        lines
    }

    /// Convenience wrapper for text input
    pub fn feed_str(&mut self, chunk: &str) -> Vec<String> {
        self.feed(chunk.as_bytes())
    }

    /// Emit the trailing partial line at end of stream, if non-empty
    pub fn flush(&mut self) -> Option<String> {
        self.pending_cr = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    /// Drop any buffered partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_cr = false;
    }

    /// Number of buffered bytes not yet terminated
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.buffer);
        match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}
