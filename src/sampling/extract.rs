//! Numeric token extraction from raw device lines

use regex::Regex;
use std::sync::LazyLock;

/// A signed integer or decimal, e.g. `-12`, `+0.5`, `1523.25`
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[+-]?\d+(?:\.\d+)?").expect("number pattern is valid")
});

/// The first signed integer-or-decimal token in `line`
///
/// Returns `None` for lines without a numeric token.
pub fn first_number(line: &str) -> Option<f64> {
    NUMBER
        .find(line)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Every signed integer-or-decimal token in `line`, in order
pub fn numbers(line: &str) -> Vec<f64> {
    NUMBER
        .find_iter(line)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .collect()
}
