//! Selection policy: given the candidates that clear a tier's quality bar,
//! rank them by the quality/regime composite and pick one.

use std::cmp::Ordering;

use market::regime::RegimeMatcher;
use market::types::MarketRegime;
use signals::model::StoredSignal;

use super::types::CompositeWeights;

/// A candidate with its selection scores.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub signal: StoredSignal,
    pub regime_score: f64,
    pub composite: f64,
}

pub fn composite_score(quality: f64, regime_score: f64, weights: &CompositeWeights) -> f64 {
    quality * weights.quality + regime_score * weights.regime
}

/// Ranks candidates best first.
///
/// Order: composite descending, then quality descending, then earlier
/// arrival. With no known live regime every candidate scores as an exact
/// match, so ranking falls back to quality alone.
pub fn rank_candidates(
    candidates: Vec<StoredSignal>,
    live: Option<MarketRegime>,
    matcher: &RegimeMatcher,
    weights: &CompositeWeights,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|signal| {
            let stored = signal.candidate.regime;
            let regime_score = matcher.score(stored, live.unwrap_or(stored));
            let composite = composite_score(signal.score(), regime_score, weights);
            RankedCandidate {
                signal,
                regime_score,
                composite,
            }
        })
        .collect();

    ranked.sort_by(compare);
    ranked
}

pub fn select_best(
    candidates: Vec<StoredSignal>,
    live: Option<MarketRegime>,
    matcher: &RegimeMatcher,
    weights: &CompositeWeights,
) -> Option<RankedCandidate> {
    rank_candidates(candidates, live, matcher, weights)
        .into_iter()
        .next()
}

fn compare(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then(b.signal.score().total_cmp(&a.signal.score()))
        .then(
            a.signal
                .candidate
                .created_at_ms
                .cmp(&b.signal.candidate.created_at_ms),
        )
}
