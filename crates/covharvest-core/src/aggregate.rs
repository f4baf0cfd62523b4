//! Coverage aggregator: a fold over the records of one harvest cycle.

use crate::error::{HarvestError, Result};
use crate::record::{CoverageRatio, CoverageRecord};

/// Running method counters for exactly one harvest cycle.
///
/// A fresh aggregator starts at zero. Counters only grow; nothing carries
/// over between cycles because each cycle builds its own aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageAggregator {
    sum_covered: u64,
    sum_missed: u64,
    sum_total: u64,
    classes: u64,
}

impl CoverageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one class's counters to the running totals.
    pub fn accept(&mut self, record: &CoverageRecord) {
        self.sum_covered = self.sum_covered.saturating_add(record.covered);
        self.sum_missed = self.sum_missed.saturating_add(record.missed);
        self.sum_total = self.sum_total.saturating_add(record.total());
        self.classes += 1;
    }

    /// Covered / total over everything accepted so far.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::NoSamples`] when no methods were observed,
    /// either because nothing was accepted or every record had zero methods.
    pub fn ratio(&self) -> Result<CoverageRatio> {
        CoverageRatio::from_counts(self.sum_covered, self.sum_total).ok_or(HarvestError::NoSamples)
    }

    pub fn sum_covered(&self) -> u64 {
        self.sum_covered
    }

    pub fn sum_missed(&self) -> u64 {
        self.sum_missed
    }

    pub fn sum_total(&self) -> u64 {
        self.sum_total
    }

    /// Number of records accepted.
    pub fn classes(&self) -> u64 {
        self.classes
    }
}

impl<'a> Extend<&'a CoverageRecord> for CoverageAggregator {
    fn extend<I: IntoIterator<Item = &'a CoverageRecord>>(&mut self, iter: I) {
        for record in iter {
            self.accept(record);
        }
    }
}

impl<'a> FromIterator<&'a CoverageRecord> for CoverageAggregator {
    fn from_iter<I: IntoIterator<Item = &'a CoverageRecord>>(iter: I) -> Self {
        let mut agg = Self::new();
        agg.extend(iter);
        agg
    }
}
