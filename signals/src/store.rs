use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use common::time::HOUR_MS;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::model::{CandidateSignal, SignalId, StoredSignal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of held candidates.
    pub capacity: usize,
    /// Global quality floor applied before insertion, regardless of tier.
    pub min_quality: f64,
    /// Candidates older than this are pruned.
    pub max_age_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            min_quality: 50.0,
            max_age_ms: 4 * HOUR_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { evicted: Option<SignalId> },
    BelowFloor,
    /// Store full and the candidate does not strictly beat the minimum.
    NotBetterThanMinimum,
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }
}

/// Sort key: score descending, then arrival ascending, then insertion order.
#[derive(Debug, Clone, Copy)]
struct RankKey {
    score: f64,
    arrival_ms: u64,
    seq: u64,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.arrival_ms.cmp(&other.arrival_ms))
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

#[derive(Default)]
struct Inner {
    ranked: BTreeMap<RankKey, StoredSignal>,
    by_id: HashMap<SignalId, RankKey>,
    next_seq: u64,
}

impl Inner {
    fn remove_key(&mut self, key: &RankKey) -> Option<StoredSignal> {
        let s = self.ranked.remove(key)?;
        self.by_id.remove(&s.id());
        Some(s)
    }

    fn pop_worst(&mut self) -> Option<StoredSignal> {
        let key = *self.ranked.last_key_value()?.0;
        self.remove_key(&key)
    }
}

/// Bounded, score-ordered holding area for accepted candidates.
///
/// Every public call is a single mutation under one lock, so submissions can
/// interleave with a distribution pass without exposing partial state.
pub struct CandidateStore {
    cfg: Mutex<StoreConfig>,
    inner: Mutex<Inner>,
}

impl CandidateStore {
    pub fn new(cfg: StoreConfig) -> Self {
        Self {
            cfg: Mutex::new(cfg),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> StoreConfig {
        self.cfg.lock().clone()
    }

    /// Applies new limits. Shrinking capacity evicts the lowest entries.
    pub fn reconfigure(&self, cfg: StoreConfig) -> Vec<SignalId> {
        let capacity = cfg.capacity;
        *self.cfg.lock() = cfg;

        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();
        while inner.ranked.len() > capacity {
            match inner.pop_worst() {
                Some(s) => evicted.push(s.id()),
                None => break,
            }
        }

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                capacity, "candidate store shrunk; evicted lowest entries"
            );
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ranked.is_empty()
    }

    pub fn contains(&self, id: &SignalId) -> bool {
        self.inner.lock().by_id.contains_key(id)
    }

    /// Inserts a candidate, enforcing the quality floor and capacity.
    #[instrument(
        skip(self, candidate),
        target = "candidate_store",
        fields(signal_id = %candidate.id, score = candidate.score())
    )]
    pub fn submit(&self, candidate: CandidateSignal, now_ms: u64) -> SubmitOutcome {
        let cfg = self.cfg.lock().clone();
        let score = candidate.score();

        if score < cfg.min_quality {
            debug!(floor = cfg.min_quality, "candidate below global quality floor");
            return SubmitOutcome::BelowFloor;
        }

        let mut inner = self.inner.lock();

        if inner.by_id.contains_key(&candidate.id) {
            debug!("candidate already stored; ignoring resubmission");
            return SubmitOutcome::Accepted { evicted: None };
        }

        let mut evicted = None;
        if inner.ranked.len() >= cfg.capacity {
            let worst_score = match inner.ranked.last_key_value() {
                Some((k, _)) => k.score,
                None => {
                    // zero capacity
                    return SubmitOutcome::NotBetterThanMinimum;
                }
            };

            if score <= worst_score {
                debug!(worst_score, "store full; candidate does not improve the set");
                return SubmitOutcome::NotBetterThanMinimum;
            }

            evicted = inner.pop_worst().map(|s| s.id());
            debug!(evicted = ?evicted, "store full; evicted lowest-scoring candidate");
        }

        let key = RankKey {
            score,
            arrival_ms: candidate.created_at_ms,
            seq: inner.next_seq,
        };
        inner.next_seq += 1;
        inner.by_id.insert(candidate.id, key);
        inner.ranked.insert(
            key,
            StoredSignal {
                candidate,
                inserted_at_ms: now_ms,
            },
        );

        SubmitOutcome::Accepted { evicted }
    }

    /// Highest score, earliest arrival on ties.
    pub fn peek_best(&self) -> Option<StoredSignal> {
        self.inner
            .lock()
            .ranked
            .first_key_value()
            .map(|(_, s)| s.clone())
    }

    pub fn remove_best(&self) -> Option<StoredSignal> {
        let mut inner = self.inner.lock();
        let key = *inner.ranked.first_key_value()?.0;
        inner.remove_key(&key)
    }

    /// Removes a specific candidate. `None` if it is already gone.
    pub fn remove(&self, id: &SignalId) -> Option<StoredSignal> {
        let mut inner = self.inner.lock();
        let key = *inner.by_id.get(id)?;
        inner.remove_key(&key)
    }

    /// Candidates with `score >= threshold`, best first.
    pub fn filter_by_min_quality(&self, threshold: f64) -> Vec<StoredSignal> {
        self.inner
            .lock()
            .ranked
            .values()
            .take_while(|s| s.score() >= threshold)
            .cloned()
            .collect()
    }

    /// All candidates, best first.
    pub fn snapshot(&self) -> Vec<StoredSignal> {
        self.inner.lock().ranked.values().cloned().collect()
    }

    /// Drops candidates that arrived more than `max_age_ms` ago.
    pub fn prune_stale(&self, now_ms: u64) -> Vec<SignalId> {
        let max_age = self.cfg.lock().max_age_ms;
        let mut inner = self.inner.lock();

        let stale: Vec<RankKey> = inner
            .ranked
            .iter()
            .filter(|(_, s)| now_ms.saturating_sub(s.candidate.created_at_ms) > max_age)
            .map(|(k, _)| *k)
            .collect();

        let removed: Vec<SignalId> = stale
            .iter()
            .filter_map(|k| inner.remove_key(k))
            .map(|s| s.id())
            .collect();

        if !removed.is_empty() {
            debug!(removed = removed.len(), "pruned stale candidates");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{QualityFactors, QualityScore, Recommendation, TradeLevels};
    use market::types::{Direction, MarketRegime};
    use uuid::Uuid;

    fn mk(score: f64, arrival: u64) -> CandidateSignal {
        CandidateSignal {
            id: Uuid::new_v4(),
            symbol: "BTCUSDT".into(),
            base: "BTC".into(),
            direction: Direction::Long,
            strategy: "test".into(),
            factors: QualityFactors::default(),
            quality: QualityScore {
                score,
                recommendation: Recommendation::Queue,
            },
            regime: MarketRegime::Sideways,
            levels: TradeLevels {
                entry_price: 100.0,
                stop_loss: None,
                targets: vec![],
            },
            created_at_ms: arrival,
        }
    }

    fn store(capacity: usize) -> CandidateStore {
        CandidateStore::new(StoreConfig {
            capacity,
            ..Default::default()
        })
    }

    #[test]
    fn below_floor_is_rejected() {
        let s = store(10);
        assert_eq!(s.submit(mk(49.9, 0), 0), SubmitOutcome::BelowFloor);
        assert!(s.is_empty());
    }

    #[test]
    fn peek_returns_highest_then_earliest() {
        let s = store(10);
        let late = mk(80.0, 20);
        let early = mk(80.0, 10);
        let low = mk(60.0, 0);
        let early_id = early.id;

        s.submit(late, 0);
        s.submit(low, 0);
        s.submit(early, 0);

        assert_eq!(s.peek_best().unwrap().id(), early_id);
    }

    #[test]
    fn remove_best_drains_in_rank_order() {
        let s = store(10);
        for (score, arrival) in [(70.0, 1), (90.0, 2), (70.0, 0), (55.0, 3)] {
            s.submit(mk(score, arrival), 0);
        }

        let order: Vec<(f64, u64)> = std::iter::from_fn(|| s.remove_best())
            .map(|x| (x.score(), x.candidate.created_at_ms))
            .collect();

        assert_eq!(order, vec![(90.0, 2), (70.0, 0), (70.0, 1), (55.0, 3)]);
        assert!(s.remove_best().is_none());
    }

    #[test]
    fn full_store_evicts_minimum_for_better_candidate() {
        let s = store(2);
        let worst = mk(60.0, 0);
        let worst_id = worst.id;
        s.submit(worst, 0);
        s.submit(mk(70.0, 0), 0);

        let out = s.submit(mk(65.0, 0), 0);
        assert_eq!(
            out,
            SubmitOutcome::Accepted {
                evicted: Some(worst_id)
            }
        );
        assert_eq!(s.len(), 2);
        assert!(!s.contains(&worst_id));
    }

    #[test]
    fn full_store_rejects_equal_or_worse() {
        let s = store(2);
        s.submit(mk(60.0, 0), 0);
        s.submit(mk(70.0, 0), 0);

        assert_eq!(s.submit(mk(60.0, 0), 0), SubmitOutcome::NotBetterThanMinimum);
        assert_eq!(s.submit(mk(55.0, 0), 0), SubmitOutcome::NotBetterThanMinimum);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn zero_capacity_accepts_nothing() {
        let s = store(0);
        assert_eq!(s.submit(mk(99.0, 0), 0), SubmitOutcome::NotBetterThanMinimum);
    }

    #[test]
    fn filter_by_min_quality_is_ordered_and_inclusive() {
        let s = store(10);
        for score in [52.0, 75.0, 60.0, 90.0] {
            s.submit(mk(score, 0), 0);
        }
        let scores: Vec<f64> = s
            .filter_by_min_quality(60.0)
            .iter()
            .map(|x| x.score())
            .collect();
        assert_eq!(scores, vec![90.0, 75.0, 60.0]);
        // filtering does not remove
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn remove_by_id_is_idempotent() {
        let s = store(10);
        let c = mk(80.0, 0);
        let id = c.id;
        s.submit(c, 0);

        assert!(s.remove(&id).is_some());
        assert!(s.remove(&id).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn shrinking_capacity_evicts_lowest() {
        let s = store(5);
        for score in [51.0, 52.0, 53.0, 54.0, 55.0] {
            s.submit(mk(score, 0), 0);
        }
        let evicted = s.reconfigure(StoreConfig {
            capacity: 2,
            ..Default::default()
        });
        assert_eq!(evicted.len(), 3);
        let left: Vec<f64> = s.snapshot().iter().map(|x| x.score()).collect();
        assert_eq!(left, vec![55.0, 54.0]);
    }

    #[test]
    fn prune_stale_drops_old_arrivals() {
        let s = store(10);
        let old = mk(90.0, 0);
        let old_id = old.id;
        s.submit(old, 0);
        s.submit(mk(60.0, 3 * HOUR_MS), 0);

        let removed = s.prune_stale(4 * HOUR_MS + 1);
        assert_eq!(removed, vec![old_id]);
        assert_eq!(s.len(), 1);
    }
}
