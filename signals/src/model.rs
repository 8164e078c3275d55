use std::fmt;

use market::types::{Direction, MarketRegime};
use serde::{Deserialize, Serialize};

pub type SignalId = uuid::Uuid;

/// Raw quality sub-factors as produced by a strategy detector.
///
/// Every factor is optional; the scorer substitutes configured neutral
/// values for anything missing. All factors are in `[0, 1]` except
/// `risk_reward`, which is the raw reward/risk ratio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityFactors {
    pub confidence: Option<f64>,
    pub ml_probability: Option<f64>,
    pub volatility_fit: Option<f64>,
    pub regime_fit: Option<f64>,
    pub risk_reward: Option<f64>,
    pub strategy_win_rate: Option<f64>,
    pub time_of_day: Option<f64>,
    pub recent_performance: Option<f64>,
}

impl QualityFactors {
    pub fn all_finite(&self) -> bool {
        [
            self.confidence,
            self.ml_probability,
            self.volatility_fit,
            self.regime_fit,
            self.risk_reward,
            self.strategy_win_rate,
            self.time_of_day,
            self.recent_performance,
        ]
        .iter()
        .flatten()
        .all(|v| v.is_finite())
    }
}

/// Entry / exit levels watched by the price tracker once published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeLevels {
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub targets: Vec<f64>,
}

impl TradeLevels {
    pub fn is_valid(&self) -> bool {
        self.entry_price.is_finite()
            && self.entry_price > 0.0
            && self.stop_loss.is_none_or(|s| s.is_finite() && s > 0.0)
            && self.targets.iter().all(|t| t.is_finite() && *t > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Reject,
    Queue,
    Publish,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::Reject => "REJECT",
            Recommendation::Queue => "QUEUE",
            Recommendation::Publish => "PUBLISH",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Weighted score in `[0, 100]`.
    pub score: f64,
    pub recommendation: Recommendation,
}

/// What a detector hands to the ingestion interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInput {
    pub symbol: String,
    pub direction: Direction,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub factors: QualityFactors,
    #[serde(default)]
    pub levels: TradeLevels,
    /// Regime the detector saw. When absent the live regime is used.
    #[serde(default)]
    pub regime: Option<MarketRegime>,
}

/// A scored candidate. Never mutated after construction; the candidate
/// store owns it until it is evicted or distributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSignal {
    pub id: SignalId,
    /// Symbol as submitted.
    pub symbol: String,
    /// Normalized base asset used for deduplication.
    pub base: String,
    pub direction: Direction,
    pub strategy: String,
    pub factors: QualityFactors,
    pub quality: QualityScore,
    pub regime: MarketRegime,
    pub levels: TradeLevels,
    pub created_at_ms: u64,
}

impl CandidateSignal {
    pub fn score(&self) -> f64 {
        self.quality.score
    }
}

/// A candidate as held by the candidate store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSignal {
    pub candidate: CandidateSignal,
    pub inserted_at_ms: u64,
}

impl StoredSignal {
    pub fn id(&self) -> SignalId {
        self.candidate.id
    }

    pub fn score(&self) -> f64 {
        self.candidate.quality.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factors_deserialize_partially() {
        let f: QualityFactors = serde_json::from_str(r#"{"confidence": 0.9}"#).unwrap();
        assert_eq!(f.confidence, Some(0.9));
        assert_eq!(f.risk_reward, None);
    }

    #[test]
    fn non_finite_factor_detected() {
        let f = QualityFactors {
            ml_probability: Some(f64::NAN),
            ..Default::default()
        };
        assert!(!f.all_finite());
        assert!(QualityFactors::default().all_finite());
    }

    #[test]
    fn trade_levels_validation() {
        let ok = TradeLevels {
            entry_price: 100.0,
            stop_loss: Some(95.0),
            targets: vec![105.0, 110.0],
        };
        assert!(ok.is_valid());

        let zero_entry = TradeLevels::default();
        assert!(!zero_entry.is_valid());

        let bad_target = TradeLevels {
            targets: vec![f64::INFINITY],
            ..ok
        };
        assert!(!bad_target.is_valid());
    }
}
