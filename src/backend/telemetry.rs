//! Telemetry parsing
//!
//! Structured telemetry lines are sequences of `key=value` or `key:value`
//! pairs separated by whitespace, commas or semicolons:
//!
//! ```text
//! U=1.254 angle=-0.5; freq:500, amp=1000
//! ```
//!
//! Known keys and their short aliases map onto [`TelemetryField`]s; anything
//! else is stored under its lower-cased key. Lines without any pair leave the
//! snapshot untouched.

use crate::types::{TelemetryField, TelemetrySnapshot};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

static PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*[=:]\s*([+-]?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?)")
        .expect("telemetry pair pattern is valid")
});

/// Owns the telemetry snapshot and applies lines to it
#[derive(Debug, Default)]
pub struct TelemetryParser {
    snapshot: TelemetrySnapshot,
}

impl TelemetryParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract `(key, value)` pairs from a line, with keys canonicalised
    pub fn parse_fields(line: &str) -> Vec<(String, f64)> {
        PAIR.captures_iter(line)
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str();
                let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
                let key = match TelemetryField::from_alias(key) {
                    Some(field) => field.key().to_string(),
                    None => key.to_ascii_lowercase(),
                };
                Some((key, value))
            })
            .collect()
    }

    /// Apply a line to the snapshot; returns whether the line carried telemetry
    pub fn apply(&mut self, line: &str, at: DateTime<Utc>) -> bool {
        let fields = Self::parse_fields(line);
        if fields.is_empty() {
            return false;
        }
        for (key, value) in fields {
            self.snapshot.values.insert(key, value);
        }
        self.snapshot.sequence += 1;
        self.snapshot.updated_at = Some(at);
        tracing::trace!("Telemetry update #{}: {}", self.snapshot.sequence, line);
        true
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }
}
