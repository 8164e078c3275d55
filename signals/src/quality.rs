//! Quality scoring for candidate signals.
//!
//! Combines normalized sub-factors into one `[0, 100]` score with a fixed
//! weight vector, then maps the score onto a recommendation using two
//! thresholds. Pure and deterministic for a given configuration.

use common::validation::{ValidationError, check_score};
use serde::{Deserialize, Serialize};

use crate::model::{QualityFactors, QualityScore, Recommendation};

const WEIGHT_EPSILON: f64 = 1e-6;

/// Weight of each factor in the final score. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub confidence: f64,
    pub ml_probability: f64,
    pub volatility_fit: f64,
    pub regime_fit: f64,
    pub risk_reward: f64,
    pub strategy_win_rate: f64,
    pub time_of_day: f64,
    pub recent_performance: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            ml_probability: 0.20,
            volatility_fit: 0.10,
            regime_fit: 0.15,
            risk_reward: 0.10,
            strategy_win_rate: 0.10,
            time_of_day: 0.05,
            recent_performance: 0.05,
        }
    }
}

impl QualityWeights {
    fn as_array(&self) -> [f64; 8] {
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
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

/// Neutral values substituted for missing factors.
///
/// Same units as [`QualityFactors`]: `risk_reward` is a raw ratio, the rest
/// are in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorDefaults {
    pub confidence: f64,
    pub ml_probability: f64,
    pub volatility_fit: f64,
    pub regime_fit: f64,
    pub risk_reward: f64,
    pub strategy_win_rate: f64,
    pub time_of_day: f64,
    pub recent_performance: f64,
}

impl Default for FactorDefaults {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            ml_probability: 0.5,
            volatility_fit: 0.7,
            regime_fit: 0.6,
            risk_reward: 2.0,
            strategy_win_rate: 0.5,
            time_of_day: 0.6,
            recent_performance: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: QualityWeights,
    pub defaults: FactorDefaults,
    /// Risk/reward ratios above this are treated as equal to it.
    pub max_risk_reward: f64,
    /// Scores below this are `REJECT`.
    pub reject_below: f64,
    /// Scores at or above this are `PUBLISH`; in between is `QUEUE`.
    pub publish_at: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            defaults: FactorDefaults::default(),
            max_risk_reward: 3.0,
            reject_below: 50.0,
            publish_at: 70.0,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.weights.as_array().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ValidationError::NegativeWeight { what: "quality" });
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ValidationError::WeightSum { what: "quality", sum });
        }
        if !(self.max_risk_reward.is_finite() && self.max_risk_reward > 0.0) {
            return Err(ValidationError::NotPositive { field: "max_risk_reward" });
        }
        check_score("reject_below", self.reject_below)?;
        check_score("publish_at", self.publish_at)?;
        if self.reject_below > self.publish_at {
            return Err(ValidationError::Misordered {
                lower: "reject_below",
                upper: "publish_at",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    cfg: QualityConfig,
}

impl QualityScorer {
    pub fn new(cfg: QualityConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.cfg
    }

    pub fn score(&self, factors: &QualityFactors) -> QualityScore {
        let d = &self.cfg.defaults;
        let w = &self.cfg.weights;

        let rr_raw = pick(factors.risk_reward, d.risk_reward);
        let rr = rr_raw.clamp(0.0, self.cfg.max_risk_reward) / self.cfg.max_risk_reward;

        let normalized = [
            unit(pick(factors.confidence, d.confidence)),
            unit(pick(factors.ml_probability, d.ml_probability)),
            unit(pick(factors.volatility_fit, d.volatility_fit)),
            unit(pick(factors.regime_fit, d.regime_fit)),
            rr,
            unit(pick(factors.strategy_win_rate, d.strategy_win_rate)),
            unit(pick(factors.time_of_day, d.time_of_day)),
            unit(pick(factors.recent_performance, d.recent_performance)),
        ];

        let weighted: f64 = normalized
            .iter()
            .zip(w.as_array())
            .map(|(v, w)| v * w)
            .sum();

        let score = (weighted * 100.0).clamp(0.0, 100.0);

        QualityScore {
            score,
            recommendation: self.recommend(score),
        }
    }

    pub fn recommend(&self, score: f64) -> Recommendation {
        if score < self.cfg.reject_below {
            Recommendation::Reject
        } else if score < self.cfg.publish_at {
            Recommendation::Queue
        } else {
            Recommendation::Publish
        }
    }
}

fn pick(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => default,
    }
}

fn unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(v: f64) -> QualityFactors {
        QualityFactors {
            confidence: Some(v),
            ml_probability: Some(v),
            volatility_fit: Some(v),
            regime_fit: Some(v),
            risk_reward: Some(v * 3.0),
            strategy_win_rate: Some(v),
            time_of_day: Some(v),
            recent_performance: Some(v),
        }
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((QualityWeights::default().sum() - 1.0).abs() < 1e-9);
        assert!(QualityConfig::default().validate().is_ok());
    }

    #[test]
    fn perfect_factors_score_100() {
        let s = QualityScorer::default().score(&all(1.0));
        assert!((s.score - 100.0).abs() < 1e-9);
        assert_eq!(s.recommendation, Recommendation::Publish);
    }

    #[test]
    fn zero_factors_score_0() {
        let s = QualityScorer::default().score(&all(0.0));
        assert_eq!(s.score, 0.0);
        assert_eq!(s.recommendation, Recommendation::Reject);
    }

    #[test]
    fn missing_factors_use_neutral_defaults() {
        let scorer = QualityScorer::default();
        let s = scorer.score(&QualityFactors::default());

        // 0.25*.5 + .2*.5 + .1*.7 + .15*.6 + .1*(2/3) + .1*.5 + .05*.6 + .05*.5
        let expected = (0.125 + 0.1 + 0.07 + 0.09 + 0.1 * (2.0 / 3.0) + 0.05 + 0.03 + 0.025) * 100.0;
        assert!((s.score - expected).abs() < 1e-9, "{} vs {}", s.score, expected);
        assert_eq!(s.recommendation, Recommendation::Queue);
    }

    #[test]
    fn risk_reward_is_capped_before_normalizing() {
        let scorer = QualityScorer::default();
        let capped = scorer.score(&QualityFactors {
            risk_reward: Some(3.0),
            ..Default::default()
        });
        let huge = scorer.score(&QualityFactors {
            risk_reward: Some(50.0),
            ..Default::default()
        });
        assert_eq!(capped.score, huge.score);
    }

    #[test]
    fn out_of_range_and_nan_factors_are_tamed() {
        let scorer = QualityScorer::default();
        let wild = scorer.score(&QualityFactors {
            confidence: Some(7.0),
            ml_probability: Some(f64::NAN),
            ..Default::default()
        });
        let tame = scorer.score(&QualityFactors {
            confidence: Some(1.0),
            ..Default::default()
        });
        assert_eq!(wild.score, tame.score);
    }

    #[test]
    fn thresholds_are_inclusive_at_publish() {
        let scorer = QualityScorer::default();
        assert_eq!(scorer.recommend(49.99), Recommendation::Reject);
        assert_eq!(scorer.recommend(50.0), Recommendation::Queue);
        assert_eq!(scorer.recommend(69.99), Recommendation::Queue);
        assert_eq!(scorer.recommend(70.0), Recommendation::Publish);
    }

    #[test]
    fn scoring_is_deterministic() {
        let scorer = QualityScorer::default();
        let f = QualityFactors {
            confidence: Some(0.81),
            ml_probability: Some(0.66),
            risk_reward: Some(1.7),
            ..Default::default()
        };
        assert_eq!(scorer.score(&f), scorer.score(&f));
    }

    #[test]
    fn validate_rejects_bad_weights() {
        let mut cfg = QualityConfig::default();
        cfg.weights.confidence = 0.5;
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::WeightSum { what: "quality", .. })
        ));

        let mut cfg = QualityConfig::default();
        cfg.reject_below = 80.0;
        assert_eq!(
            cfg.validate(),
            Err(ValidationError::Misordered {
                lower: "reject_below",
                upper: "publish_at",
            })
        );
    }
}
