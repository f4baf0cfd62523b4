use std::fmt;

use serde::Serialize;

/// Method-level coverage counters for one analyzed class.
///
/// The total is derived from the two counters, so `covered + missed ==
/// total` holds for every record whose sum fits in a `u64`; larger sums
/// saturate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRecord {
    /// Fully qualified class name (e.g. `com.example.MainActivity`).
    pub class_name: String,
    /// Number of methods executed at least once.
    pub covered: u64,
    /// Number of methods never executed.
    pub missed: u64,
}

impl CoverageRecord {
    pub fn new(class_name: impl Into<String>, covered: u64, missed: u64) -> Self {
        Self {
            class_name: class_name.into(),
            covered,
            missed,
        }
    }

    /// Total number of methods in the class.
    pub fn total(&self) -> u64 {
        self.covered.saturating_add(self.missed)
    }
}

/// Fraction of covered methods, always in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct CoverageRatio(f64);

impl CoverageRatio {
    /// Build a ratio from counters. Returns `None` when `total` is zero.
    pub fn from_counts(covered: u64, total: u64) -> Option<Self> {
        if total == 0 {
            return None;
        }
        let covered = covered.min(total);
        Some(Self(covered as f64 / total as f64))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// The ratio as a percentage.
    pub fn percent(self) -> f64 {
        self.0 * 100.0
    }

    /// The result-log line for this ratio: five decimals, a percent sign
    /// and a trailing newline.
    pub fn output_line(self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for CoverageRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5}%", self.percent())
    }
}
