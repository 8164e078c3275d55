//! Shared types used by the distribution scheduler.

use std::collections::HashSet;
use std::fmt;

use common::time::{DAY_MS, MINUTE_MS, SECOND_MS};
use common::validation::{ValidationError, check_score};
use market::regime::RegimeMatchConfig;
use market::types::MarketRegime;
use serde::{Deserialize, Serialize};
use signals::model::StoredSignal;

/// Subscriber tier name, e.g. `FREE`, `PRO`, `MAX`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(String);

impl TierId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TierId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Quota and quality bar for one subscriber tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    pub name: TierId,
    /// Publications allowed per rolling window.
    pub daily_cap: u32,
    /// Candidates below this score are never offered to the tier.
    pub min_quality: f64,
}

impl TierConfig {
    pub fn new(name: &str, daily_cap: u32, min_quality: f64) -> Self {
        Self {
            name: TierId::new(name),
            daily_cap,
            min_quality,
        }
    }
}

/// Blend of quality and regime compatibility used to rank eligible candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeWeights {
    pub quality: f64,
    pub regime: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            quality: 0.6,
            regime: 0.4,
        }
    }
}

/// Configuration knobs for the distribution scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the distribution tick.
    pub tick_interval_ms: u64,

    /// How far an eligible tier is pushed when no candidate qualifies.
    pub retry_delay_ms: u64,

    /// Rolling window the daily caps apply to.
    pub window_ms: u64,

    pub composite: CompositeWeights,

    pub regime: RegimeMatchConfig,

    /// Evaluated in this order on every tick.
    pub tiers: Vec<TierConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 30 * SECOND_MS,
            retry_delay_ms: 10 * MINUTE_MS,
            window_ms: DAY_MS,
            composite: CompositeWeights::default(),
            regime: RegimeMatchConfig::default(),
            tiers: vec![
                TierConfig::new("FREE", 2, 75.0),
                TierConfig::new("PRO", 12, 65.0),
                TierConfig::new("MAX", 30, 55.0),
            ],
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tiers.is_empty() {
            return Err(ValidationError::NoTiers);
        }

        let mut seen = HashSet::new();
        for t in &self.tiers {
            if t.name.as_str().trim().is_empty() {
                return Err(ValidationError::EmptyTierName);
            }
            if !seen.insert(&t.name) {
                return Err(ValidationError::DuplicateTier(t.name.to_string()));
            }
            check_score(format!("tier {} min_quality", t.name), t.min_quality)?;
        }

        if self.tick_interval_ms == 0 {
            return Err(ValidationError::NotPositive { field: "tick_interval_ms" });
        }
        if self.window_ms == 0 {
            return Err(ValidationError::NotPositive { field: "window_ms" });
        }

        let w = &self.composite;
        if [w.quality, w.regime].iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ValidationError::NegativeWeight { what: "composite" });
        }
        let sum = w.quality + w.regime;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ValidationError::WeightSum { what: "composite", sum });
        }

        self.regime.validate()
    }
}

/// A candidate handed to the publish interface for one tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedSignal {
    pub signal: StoredSignal,
    pub tier: TierId,
    pub published_at_ms: u64,
    /// Live regime at selection time, if one was known.
    pub live_regime: Option<MarketRegime>,
    pub regime_score: f64,
    pub composite_score: f64,
}
