//! Signal distribution service.
//!
//! One explicit service object, built once at startup with every external
//! collaborator injected:
//! - candidate ingestion (`submit_candidate`): validate, score, dedup, store
//! - the periodic tick: housekeeping, one distribution pass, lifecycle
//!   registration of whatever was published
//! - hot-reloaded configuration, applied at the start of each tick
//!
//! Nothing in here returns an error to the caller of a tick; failures are
//! logged and the loop keeps running.

use std::sync::Arc;
use std::time::Duration;

use common::kv::KvStore;
use common::logger::{TraceId, root_span};
use common::time::Clock;
use lifecycle::price::PriceTracker;
use lifecycle::sink::OutcomeSink;
use lifecycle::tracker::SignalLifecycleTracker;
use market::provider::MarketContextProvider;
use market::types::MarketRegime;
use parking_lot::Mutex;
use scheduler::engine::{DistributionEngine, TickReport, TierStatus};
use scheduler::publisher::SignalPublisher;
use signals::dedup::{Admission, DedupCache, DedupKey};
use signals::error::RejectReason;
use signals::model::{CandidateInput, CandidateSignal, Recommendation, SignalId};
use signals::quality::QualityScorer;
use signals::store::{CandidateStore, SubmitOutcome};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::metrics::counters::{Counters, add, inc};
use crate::config::DistributionConfig;
use crate::reload::ConfigHandle;

/// Regime assigned to a candidate when neither the detector nor the
/// market-context provider supplies one.
const NEUTRAL_REGIME: MarketRegime = MarketRegime::Sideways;

/// Answer to a detector's submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub accepted: bool,
    pub reason: Option<RejectReason>,
    /// Computed quality score, when scoring got that far.
    pub score: Option<f64>,
    pub recommendation: Option<Recommendation>,
    pub signal_id: Option<SignalId>,
}

impl SubmissionResult {
    fn accepted(id: SignalId, score: f64, recommendation: Recommendation) -> Self {
        Self {
            accepted: true,
            reason: None,
            score: Some(score),
            recommendation: Some(recommendation),
            signal_id: Some(id),
        }
    }

    fn rejected(reason: RejectReason, score: Option<(f64, Recommendation)>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            score: score.map(|s| s.0),
            recommendation: score.map(|s| s.1),
            signal_id: None,
        }
    }

    /// Machine-readable rejection code.
    pub fn reason_code(&self) -> Option<&'static str> {
        self.reason.map(|r| r.as_str())
    }
}

/// External collaborators.
pub struct ServiceDeps {
    pub clock: Arc<dyn Clock>,
    pub kv: Arc<dyn KvStore>,
    pub regime_provider: Arc<dyn MarketContextProvider>,
    pub prices: Arc<dyn PriceTracker>,
    pub sink: Arc<dyn OutcomeSink>,
}

pub struct SignalService {
    clock: Arc<dyn Clock>,
    config: ConfigHandle,
    /// Config version last pushed into the components.
    applied_version: Mutex<u64>,
    dedup: Arc<DedupCache>,
    store: Arc<CandidateStore>,
    engine: Arc<DistributionEngine>,
    tracker: Arc<SignalLifecycleTracker>,
    counters: Counters,
}

impl SignalService {
    pub fn new(config: ConfigHandle, deps: ServiceDeps) -> Self {
        let (version, cfg) = config.snapshot();

        let store = Arc::new(CandidateStore::new(cfg.store.clone()));
        let dedup = Arc::new(DedupCache::new(cfg.dedup.clone(), deps.kv.clone()));
        let engine = Arc::new(DistributionEngine::new(
            store.clone(),
            deps.regime_provider,
            deps.kv,
        ));
        let tracker = Arc::new(SignalLifecycleTracker::new(
            cfg.lifecycle.clone(),
            deps.clock.clone(),
            deps.prices,
            deps.sink,
        ));

        Self {
            clock: deps.clock,
            applied_version: Mutex::new(version),
            config,
            dedup,
            store,
            engine,
            tracker,
            counters: Counters::default(),
        }
    }

    /// Restores dedup entries and tier budgets from the durable store.
    pub async fn restore(&self) {
        let now = self.clock.now_ms();
        let cfg = self.config.current();
        let dedup = self.dedup.load(now).await;
        let publications = self.engine.load_budgets(&cfg.scheduler, now).await;
        info!(dedup, publications, "service state restored");
    }

    /// Registers the publish interface.
    pub fn on_publish(&self, publisher: Arc<dyn SignalPublisher>) {
        self.engine.on_publish(publisher);
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn tracker(&self) -> &Arc<SignalLifecycleTracker> {
        &self.tracker
    }

    pub fn candidates(&self) -> &Arc<CandidateStore> {
        &self.store
    }

    pub fn dedup(&self) -> &Arc<DedupCache> {
        &self.dedup
    }

    pub fn tier_status(&self) -> Vec<TierStatus> {
        let cfg = self.config.current();
        self.engine.tier_status(&cfg.scheduler, self.clock.now_ms())
    }

    /// Candidate ingestion.
    pub async fn submit_candidate(&self, input: CandidateInput) -> SubmissionResult {
        let span = root_span("submit_candidate", &TraceId::new());
        async move {
            inc(&self.counters.submitted);
            let cfg = self.apply_config();
            let result = self.evaluate(input, &cfg).await;

            match result.reason {
                None => inc(&self.counters.accepted),
                Some(reason) => {
                    self.counters.record_rejection(reason);
                    debug!(reason = reason.as_str(), score = ?result.score, "candidate rejected");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn evaluate(&self, input: CandidateInput, cfg: &DistributionConfig) -> SubmissionResult {
        let now = self.clock.now_ms();

        let Some(key) = DedupKey::new(&input.symbol, input.direction) else {
            return SubmissionResult::rejected(RejectReason::InvalidSymbol, None);
        };
        if !input.factors.all_finite() {
            return SubmissionResult::rejected(RejectReason::InvalidFactor, None);
        }
        if !input.levels.is_valid() {
            return SubmissionResult::rejected(RejectReason::InvalidLevels, None);
        }

        let quality = QualityScorer::new(cfg.quality.clone()).score(&input.factors);
        let scored = Some((quality.score, quality.recommendation));

        if quality.recommendation == Recommendation::Reject || quality.score < cfg.store.min_quality {
            return SubmissionResult::rejected(RejectReason::QualityTooLow, scored);
        }
        if cfg
            .lowest_tier_minimum()
            .is_none_or(|lowest| quality.score < lowest)
        {
            return SubmissionResult::rejected(RejectReason::BelowTierMinimum, scored);
        }

        let regime = match input.regime {
            Some(r) => r,
            None => self.engine.live_regime().await.unwrap_or(NEUTRAL_REGIME),
        };

        let candidate = CandidateSignal {
            id: Uuid::new_v4(),
            base: key.symbol.clone(),
            symbol: input.symbol,
            direction: input.direction,
            strategy: input.strategy,
            factors: input.factors,
            quality,
            regime,
            levels: input.levels,
            created_at_ms: now,
        };
        let id = candidate.id;

        let mut stored = None;
        let admission = self.dedup.admit(&key, now, || {
            let outcome = self.store.submit(candidate, now);
            stored = Some(outcome);
            outcome.is_accepted()
        });

        match admission {
            Admission::Duplicate => SubmissionResult::rejected(RejectReason::Duplicate, scored),
            Admission::Declined => {
                let reason = match stored {
                    Some(SubmitOutcome::BelowFloor) => RejectReason::QualityTooLow,
                    _ => RejectReason::StoreFull,
                };
                SubmissionResult::rejected(reason, scored)
            }
            Admission::Recorded => {
                if let Some(SubmitOutcome::Accepted { evicted: Some(old) }) = stored {
                    debug!(evicted = %old, "lower-scoring candidate displaced");
                }
                info!(
                    signal_id = %id,
                    key = %key,
                    score = quality.score,
                    %regime,
                    "candidate accepted"
                );
                self.dedup.persist().await;
                SubmissionResult::accepted(id, quality.score, quality.recommendation)
            }
        }
    }

    /// Pushes a changed configuration into every component and returns the
    /// snapshot now in force. Ingestion and ticks both go through here.
    fn apply_config(&self) -> Arc<DistributionConfig> {
        let (version, cfg) = self.config.snapshot();
        let mut applied = self.applied_version.lock();
        if *applied != version {
            self.dedup.reconfigure(cfg.dedup.clone());
            self.tracker.reconfigure(cfg.lifecycle.clone());
            let evicted = self.store.reconfigure(cfg.store.clone());
            *applied = version;
            info!(version, evicted = evicted.len(), "configuration applied");
        }
        cfg
    }

    /// One scheduling tick.
    pub async fn tick(&self) -> TickReport {
        let span = root_span("tick", &TraceId::new());
        self.tick_inner().instrument(span).await
    }

    async fn tick_inner(&self) -> TickReport {
        let cfg = self.apply_config();
        let now = self.clock.now_ms();

        let aged = self.store.prune_stale(now);
        if !aged.is_empty() {
            add(&self.counters.candidates_aged_out, aged.len() as u64);
            debug!(count = aged.len(), "aged candidates dropped");
        }
        if self.dedup.sweep(now) > 0 {
            self.dedup.persist().await;
        }

        let report = self.engine.on_tick(&cfg.scheduler, now).await;

        if report.skipped_overlap {
            inc(&self.counters.skipped_overlap);
        }
        add(&self.counters.publish_failed, report.failed as u64);
        add(&self.counters.deferred, report.deferred as u64);
        add(&self.counters.skipped_no_publisher, report.skipped_tiers as u64);

        for published in &report.published {
            inc(&self.counters.published);
            self.tracker.register(published).await;
        }

        let swept = self.tracker.sweep_expired(now).await;
        if swept > 0 {
            add(&self.counters.lifecycle_swept, swept as u64);
        }

        report
    }

    /// Ticks until `shutdown` flips to true. The interval follows the live
    /// configuration.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut period = self.config.current().scheduler.tick_interval_ms;
        let mut ticker = tokio::time::interval(Duration::from_millis(period));
        info!(tick_interval_ms = period, "distribution loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;

                    let next = self.config.current().scheduler.tick_interval_ms;
                    if next != period {
                        info!(from = period, to = next, "tick interval changed");
                        period = next;
                        ticker = tokio::time::interval_at(
                            tokio::time::Instant::now() + Duration::from_millis(period),
                            Duration::from_millis(period),
                        );
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("distribution loop stopped");
    }

    /// Stops lifecycle timers. Pending outcomes are not forced.
    pub fn shutdown(&self) {
        let cancelled = self.tracker.shutdown();
        if cancelled > 0 {
            warn!(cancelled, "expiry timers cancelled at shutdown");
        }
    }
}
