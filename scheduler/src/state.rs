//! Per-tier publication budgets.
//!
//! Each tier keeps the instants of its publications inside the rolling
//! window plus the next instant it may publish again. Consumption spaces
//! publications `window / daily_cap` apart so a quota is spread over the
//! window instead of being burned in one burst.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{TierConfig, TierId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TierPhase {
    Waiting,
    Eligible,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBudget {
    pub tier: TierId,
    pub daily_cap: u32,
    pub min_quality: f64,
    /// Publication instants inside the window, oldest first.
    pub publications: VecDeque<u64>,
    pub next_eligible_ms: u64,
}

impl TierBudget {
    pub fn new(cfg: &TierConfig) -> Self {
        Self {
            tier: cfg.name.clone(),
            daily_cap: cfg.daily_cap,
            min_quality: cfg.min_quality,
            publications: VecDeque::new(),
            next_eligible_ms: 0,
        }
    }

    pub fn apply_config(&mut self, cfg: &TierConfig) {
        if self.daily_cap != cfg.daily_cap || self.min_quality != cfg.min_quality {
            info!(
                tier = %self.tier,
                old_cap = self.daily_cap,
                new_cap = cfg.daily_cap,
                min_quality = cfg.min_quality,
                "tier quota updated"
            );
        }
        self.daily_cap = cfg.daily_cap;
        self.min_quality = cfg.min_quality;
    }

    /// Even-spacing interval. `None` for a disabled tier.
    pub fn spacing_ms(&self, window_ms: u64) -> Option<u64> {
        (self.daily_cap > 0).then(|| window_ms / self.daily_cap as u64)
    }

    /// Drops publications that have aged out of the window.
    pub fn prune(&mut self, now_ms: u64, window_ms: u64) -> usize {
        let mut removed = 0;
        while let Some(&oldest) = self.publications.front() {
            if now_ms.saturating_sub(oldest) >= window_ms {
                self.publications.pop_front();
                removed += 1;
            } else {
                break;
            }
        }
        removed
    }

    /// Publications within `(now - window, now]`, without mutating.
    pub fn published_in_window(&self, now_ms: u64, window_ms: u64) -> u32 {
        self.publications
            .iter()
            .filter(|&&ts| now_ms.saturating_sub(ts) < window_ms)
            .count() as u32
    }

    pub fn remaining(&self, now_ms: u64, window_ms: u64) -> u32 {
        self.daily_cap
            .saturating_sub(self.published_in_window(now_ms, window_ms))
    }

    pub fn phase(&self, now_ms: u64, window_ms: u64) -> TierPhase {
        if now_ms >= self.next_eligible_ms && self.remaining(now_ms, window_ms) > 0 {
            TierPhase::Eligible
        } else {
            TierPhase::Waiting
        }
    }

    /// Earliest instant this tier could become eligible, taking both the
    /// spacing and the rolling cap into account.
    pub fn effective_next_eligible(&self, now_ms: u64, window_ms: u64) -> Option<u64> {
        if self.daily_cap == 0 {
            return None;
        }

        let in_window: Vec<u64> = self
            .publications
            .iter()
            .copied()
            .filter(|ts| now_ms.saturating_sub(*ts) < window_ms)
            .collect();

        let cap = self.daily_cap as usize;
        let cap_free_at = if in_window.len() >= cap {
            // The slot frees when enough of the oldest publications age out.
            in_window[in_window.len() - cap] + window_ms
        } else {
            0
        };

        Some(self.next_eligible_ms.max(cap_free_at))
    }

    /// Records a publication. Returns false, without recording, if the cap is
    /// already reached.
    pub fn consume(&mut self, now_ms: u64, window_ms: u64) -> bool {
        let Some(spacing) = self.spacing_ms(window_ms) else {
            return false;
        };
        if self.published_in_window(now_ms, window_ms) >= self.daily_cap {
            return false;
        }

        self.publications.push_back(now_ms);
        self.next_eligible_ms = now_ms.saturating_add(spacing);

        debug!(
            tier = %self.tier,
            used = self.published_in_window(now_ms, window_ms),
            cap = self.daily_cap,
            next_eligible_ms = self.next_eligible_ms,
            "tier slot consumed"
        );
        true
    }

    /// Pushes the next check out by `retry_ms` without spending quota.
    pub fn defer(&mut self, now_ms: u64, retry_ms: u64) {
        self.next_eligible_ms = self.next_eligible_ms.max(now_ms.saturating_add(retry_ms));
    }
}

/// Budgets for every configured tier.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TierBudgets {
    inner: BTreeMap<TierId, TierBudget>,
}

impl TierBudgets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aligns the budget set with the configured tiers: adds new tiers,
    /// updates caps of existing ones, drops tiers no longer configured.
    pub fn sync_config(&mut self, tiers: &[TierConfig]) {
        for cfg in tiers {
            match self.inner.get_mut(&cfg.name) {
                Some(b) => b.apply_config(cfg),
                None => {
                    info!(tier = %cfg.name, cap = cfg.daily_cap, "tier budget created");
                    self.inner.insert(cfg.name.clone(), TierBudget::new(cfg));
                }
            }
        }

        self.inner.retain(|id, _| {
            let keep = tiers.iter().any(|t| &t.name == id);
            if !keep {
                info!(tier = %id, "tier removed from configuration; dropping budget");
            }
            keep
        });
    }

    pub fn get(&self, tier: &TierId) -> Option<&TierBudget> {
        self.inner.get(tier)
    }

    pub fn get_mut(&mut self, tier: &TierId) -> Option<&mut TierBudget> {
        self.inner.get_mut(tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TierBudget> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn prune_all(&mut self, now_ms: u64, window_ms: u64) -> usize {
        self.inner
            .values_mut()
            .map(|b| b.prune(now_ms, window_ms))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::time::{DAY_MS, HOUR_MS, MINUTE_MS};

    fn budget(cap: u32) -> TierBudget {
        TierBudget::new(&TierConfig::new("MAX", cap, 55.0))
    }

    #[test]
    fn fresh_budget_is_eligible() {
        let b = budget(30);
        assert_eq!(b.phase(0, DAY_MS), TierPhase::Eligible);
        assert_eq!(b.remaining(0, DAY_MS), 30);
    }

    #[test]
    fn consume_spaces_evenly() {
        let mut b = budget(24);
        assert!(b.consume(1_000, DAY_MS));
        assert_eq!(b.next_eligible_ms, 1_000 + HOUR_MS);
        assert_eq!(b.phase(1_000 + HOUR_MS - 1, DAY_MS), TierPhase::Waiting);
        assert_eq!(b.phase(1_000 + HOUR_MS, DAY_MS), TierPhase::Eligible);
    }

    #[test]
    fn cap_blocks_until_oldest_ages_out() {
        let mut b = budget(2);
        assert!(b.consume(0, DAY_MS));
        assert!(b.consume(12 * HOUR_MS, DAY_MS));

        assert_eq!(b.phase(23 * HOUR_MS, DAY_MS), TierPhase::Waiting);
        assert!(!b.consume(23 * HOUR_MS, DAY_MS));
        assert_eq!(b.effective_next_eligible(23 * HOUR_MS, DAY_MS), Some(DAY_MS));

        assert_eq!(b.phase(DAY_MS, DAY_MS), TierPhase::Eligible);
    }

    #[test]
    fn prune_removes_only_aged_entries() {
        let mut b = budget(5);
        b.publications.extend([0, HOUR_MS, 2 * HOUR_MS]);
        assert_eq!(b.prune(DAY_MS + HOUR_MS, DAY_MS), 2);
        assert_eq!(b.publications, VecDeque::from([2 * HOUR_MS]));
    }

    #[test]
    fn defer_never_moves_backwards() {
        let mut b = budget(5);
        b.next_eligible_ms = 5 * HOUR_MS;
        b.defer(0, 10 * MINUTE_MS);
        assert_eq!(b.next_eligible_ms, 5 * HOUR_MS);

        b.defer(5 * HOUR_MS, 10 * MINUTE_MS);
        assert_eq!(b.next_eligible_ms, 5 * HOUR_MS + 10 * MINUTE_MS);
    }

    #[test]
    fn zero_cap_is_never_eligible() {
        let mut b = budget(0);
        assert_eq!(b.phase(0, DAY_MS), TierPhase::Waiting);
        assert!(!b.consume(0, DAY_MS));
        assert_eq!(b.effective_next_eligible(0, DAY_MS), None);
    }

    #[test]
    fn sync_config_adds_updates_and_drops() {
        let mut budgets = TierBudgets::new();
        budgets.sync_config(&[TierConfig::new("FREE", 2, 75.0), TierConfig::new("PRO", 10, 65.0)]);
        assert_eq!(budgets.len(), 2);

        budgets
            .get_mut(&TierId::from("PRO"))
            .unwrap()
            .consume(0, DAY_MS);

        budgets.sync_config(&[TierConfig::new("PRO", 20, 60.0)]);
        assert_eq!(budgets.len(), 1);

        let pro = budgets.get(&TierId::from("PRO")).unwrap();
        assert_eq!(pro.daily_cap, 20);
        assert_eq!(pro.min_quality, 60.0);
        // history survives a quota change
        assert_eq!(pro.publications.len(), 1);
    }

    #[test]
    fn budgets_serialize_round_trip() {
        let mut budgets = TierBudgets::new();
        budgets.sync_config(&[TierConfig::new("MAX", 30, 55.0)]);
        budgets
            .get_mut(&TierId::from("MAX"))
            .unwrap()
            .consume(HOUR_MS, DAY_MS);

        let json = serde_json::to_vec(&budgets).unwrap();
        let back: TierBudgets = serde_json::from_slice(&json).unwrap();
        assert_eq!(
            back.get(&TierId::from("MAX")),
            budgets.get(&TierId::from("MAX"))
        );
    }
}
