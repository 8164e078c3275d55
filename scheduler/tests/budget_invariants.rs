use common::time::{DAY_MS, MINUTE_MS};
use proptest::prelude::*;
use scheduler::eligibility::check_tier_eligibility;
use scheduler::state::TierBudget;
use scheduler::types::TierConfig;

proptest! {
    /// However ticks are spaced, no rolling window ever holds more
    /// publications than the cap.
    #[test]
    fn rolling_count_never_exceeds_cap(
        cap in 1u32..40,
        gaps in prop::collection::vec(0u64..(3 * 60 * MINUTE_MS), 1..400),
        dry in prop::collection::vec(any::<bool>(), 400),
    ) {
        let mut budget = TierBudget::new(&TierConfig::new("T", cap, 50.0));
        let mut now = 0u64;
        let mut published = Vec::new();

        for (i, gap) in gaps.iter().enumerate() {
            now += gap;
            budget.prune(now, DAY_MS);
            if !check_tier_eligibility(&budget, DAY_MS, now).is_eligible() {
                continue;
            }
            if dry[i] {
                budget.defer(now, 10 * MINUTE_MS);
            } else {
                prop_assert!(budget.consume(now, DAY_MS));
                published.push(now);
            }
        }

        for (i, start) in published.iter().enumerate() {
            let in_window = published[i..]
                .iter()
                .take_while(|ts| **ts - start < DAY_MS)
                .count();
            prop_assert!(in_window <= cap as usize);
        }
    }

    /// Consecutive publications are never closer than the even spacing.
    #[test]
    fn publications_respect_spacing(
        cap in 1u32..40,
        gaps in prop::collection::vec(0u64..(2 * 60 * MINUTE_MS), 1..200),
    ) {
        let mut budget = TierBudget::new(&TierConfig::new("T", cap, 50.0));
        let spacing = DAY_MS / cap as u64;
        let mut now = 0u64;
        let mut last: Option<u64> = None;

        for gap in gaps {
            now += gap;
            if check_tier_eligibility(&budget, DAY_MS, now).is_eligible() {
                prop_assert!(budget.consume(now, DAY_MS));
                if let Some(prev) = last {
                    prop_assert!(now - prev >= spacing);
                }
                last = Some(now);
            }
        }
    }
}
