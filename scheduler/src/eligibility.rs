//! Determines whether a tier may publish at this tick.
//
//  This module is deliberately pure: no async, no IO.

use super::state::TierBudget;

/// Result of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierEligibility {
    Eligible,
    /// Daily cap of zero.
    Disabled,
    /// Rolling-window count has reached the daily cap.
    CapReached,
    /// Spacing (or a retry delay) has not elapsed yet.
    SpacingNotElapsed,
}

impl TierEligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, TierEligibility::Eligible)
    }
}

/// Check whether a tier may publish *one* signal at this tick.
///
/// This enforces:
///   - the tier is enabled (cap > 0)
///   - publications inside the rolling window stay below the cap
///   - `now_ms` has reached the tier's next eligible instant
pub fn check_tier_eligibility(budget: &TierBudget, window_ms: u64, now_ms: u64) -> TierEligibility {
    if budget.daily_cap == 0 {
        return TierEligibility::Disabled;
    }

    if budget.published_in_window(now_ms, window_ms) >= budget.daily_cap {
        return TierEligibility::CapReached;
    }

    if now_ms < budget.next_eligible_ms {
        return TierEligibility::SpacingNotElapsed;
    }

    TierEligibility::Eligible
}
