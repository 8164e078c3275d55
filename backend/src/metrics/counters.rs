use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use signals::error::RejectReason;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub submitted: Arc<AtomicU64>,
    pub accepted: Arc<AtomicU64>,

    // rejection reasons
    pub rejected_quality: Arc<AtomicU64>,
    pub rejected_tier_minimum: Arc<AtomicU64>,
    pub rejected_duplicate: Arc<AtomicU64>,
    pub rejected_store_full: Arc<AtomicU64>,
    pub rejected_invalid: Arc<AtomicU64>,

    // distribution
    pub published: Arc<AtomicU64>,
    pub publish_failed: Arc<AtomicU64>,
    pub deferred: Arc<AtomicU64>,
    pub skipped_overlap: Arc<AtomicU64>,
    pub skipped_no_publisher: Arc<AtomicU64>,

    // housekeeping
    pub candidates_aged_out: Arc<AtomicU64>,
    pub lifecycle_swept: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub submitted: u64,
    pub accepted: u64,
    pub rejected_quality: u64,
    pub rejected_tier_minimum: u64,
    pub rejected_duplicate: u64,
    pub rejected_store_full: u64,
    pub rejected_invalid: u64,
    pub published: u64,
    pub publish_failed: u64,
    pub deferred: u64,
    pub skipped_overlap: u64,
    pub skipped_no_publisher: u64,
    pub candidates_aged_out: u64,
    pub lifecycle_swept: u64,
}

pub fn inc(c: &AtomicU64) {
    add(c, 1);
}

pub fn add(c: &AtomicU64, n: u64) {
    c.fetch_add(n, Ordering::Relaxed);
}

impl Counters {
    pub fn record_rejection(&self, reason: RejectReason) {
        let c = match reason {
            RejectReason::QualityTooLow => &self.rejected_quality,
            RejectReason::BelowTierMinimum => &self.rejected_tier_minimum,
            RejectReason::Duplicate => &self.rejected_duplicate,
            RejectReason::StoreFull => &self.rejected_store_full,
            RejectReason::InvalidSymbol | RejectReason::InvalidFactor | RejectReason::InvalidLevels => {
                &self.rejected_invalid
            }
        };
        inc(c);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CounterSnapshot {
            submitted: get(&self.submitted),
            accepted: get(&self.accepted),
            rejected_quality: get(&self.rejected_quality),
            rejected_tier_minimum: get(&self.rejected_tier_minimum),
            rejected_duplicate: get(&self.rejected_duplicate),
            rejected_store_full: get(&self.rejected_store_full),
            rejected_invalid: get(&self.rejected_invalid),
            published: get(&self.published),
            publish_failed: get(&self.publish_failed),
            deferred: get(&self.deferred),
            skipped_overlap: get(&self.skipped_overlap),
            skipped_no_publisher: get(&self.skipped_no_publisher),
            candidates_aged_out: get(&self.candidates_aged_out),
            lifecycle_swept: get(&self.lifecycle_swept),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_land_in_their_bucket() {
        let c = Counters::default();
        c.record_rejection(RejectReason::Duplicate);
        c.record_rejection(RejectReason::InvalidSymbol);
        c.record_rejection(RejectReason::InvalidLevels);

        let s = c.snapshot();
        assert_eq!(s.rejected_duplicate, 1);
        assert_eq!(s.rejected_invalid, 2);
        assert_eq!(s.rejected_quality, 0);
    }
}
