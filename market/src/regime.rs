//! Regime compatibility scoring.
//!
//! A candidate remembers the regime it was produced in. At distribution time
//! the live regime may have moved on; this module turns the pair into a
//! 0..=100 compatibility score. Pure: no async, no IO.

use std::collections::HashMap;

use common::validation::{ValidationError, check_score};
use serde::{Deserialize, Serialize};

use crate::types::MarketRegime;

/// Tunable scores for the compatibility table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeMatchConfig {
    /// Score when stored and live regimes are identical.
    pub exact_score: f64,
    /// Score for the first entry of a compatibility list.
    pub first_compatible_score: f64,
    /// Each subsequent entry scores this much less.
    pub step: f64,
    /// Score when the regimes are not related at all. Never 0: a stale
    /// regime tag is uncertainty, not proof the signal is wrong.
    pub floor_score: f64,
    /// Ordered compatibility list per stored regime, best first.
    pub compatibility: HashMap<MarketRegime, Vec<MarketRegime>>,
}

impl Default for RegimeMatchConfig {
    fn default() -> Self {
        use MarketRegime::*;

        let compatibility = HashMap::from([
            (BullishTrend, vec![LowVolatility, Sideways, HighVolatility]),
            (BearishTrend, vec![HighVolatility, Sideways, LowVolatility]),
            (Sideways, vec![LowVolatility, BullishTrend, BearishTrend]),
            (HighVolatility, vec![BearishTrend, BullishTrend, Sideways]),
            (LowVolatility, vec![Sideways, BullishTrend, BearishTrend]),
        ]);

        Self {
            exact_score: 100.0,
            first_compatible_score: 80.0,
            step: 10.0,
            floor_score: 30.0,
            compatibility,
        }
    }
}

impl RegimeMatchConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_score("regime exact_score", self.exact_score)?;
        check_score("regime first_compatible_score", self.first_compatible_score)?;
        check_score("regime floor_score", self.floor_score)?;
        if !self.step.is_finite() || self.step < 0.0 {
            return Err(ValidationError::Negative { field: "regime step" });
        }
        if self.floor_score > self.first_compatible_score {
            return Err(ValidationError::Misordered {
                lower: "regime floor_score",
                upper: "first_compatible_score",
            });
        }
        Ok(())
    }
}

/// Scores stored-vs-live regime compatibility from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct RegimeMatcher {
    cfg: RegimeMatchConfig,
}

impl RegimeMatcher {
    pub fn new(cfg: RegimeMatchConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RegimeMatchConfig {
        &self.cfg
    }

    /// Compatibility of a candidate tagged `stored` under the `live` regime.
    ///
    /// Exact match scores `exact_score`; the i-th compatible entry scores
    /// `first_compatible_score - i * step`, never below `floor_score`;
    /// anything else scores `floor_score`.
    pub fn score(&self, stored: MarketRegime, live: MarketRegime) -> f64 {
        if stored == live {
            return self.cfg.exact_score;
        }

        let position = self
            .cfg
            .compatibility
            .get(&stored)
            .and_then(|list| list.iter().position(|r| *r == live));

        match position {
            Some(i) => {
                let s = self.cfg.first_compatible_score - self.cfg.step * i as f64;
                s.max(self.cfg.floor_score)
            }
            None => self.cfg.floor_score,
        }
    }
}
