//! The distribution engine.
//!
//! On each tick, for every configured tier in order, it:
//!   1. Checks the tier budget using `eligibility`.
//!   2. Filters the candidate store by the tier's quality bar.
//!   3. Uses `policy` to rank the pool by quality and regime fit.
//!   4. Removes the winner from the store, spends one quota slot and hands
//!      the signal to the registered publisher.
//!
//! Only one pass runs at a time. A tick arriving while a pass is still
//! suspended (slow publisher, slow persistence) is skipped, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::kv::KvStore;
use common::logger::{annotate_tier, child_span, warn_if_slow};
use market::provider::MarketContextProvider;
use market::regime::RegimeMatcher;
use market::types::MarketRegime;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use signals::store::CandidateStore;
use tracing::{Instrument, debug, error, info, instrument, trace, warn};

use super::eligibility::{TierEligibility, check_tier_eligibility};
use super::policy::{RankedCandidate, rank_candidates};
use super::publisher::SignalPublisher;
use super::state::{TierBudgets, TierPhase};
use super::types::{DistributedSignal, SchedulerConfig, TierConfig, TierId};

pub const TIER_BUDGETS_KV_KEY: &str = "tier_budgets:v1";

const SLOW_PERSIST: Duration = Duration::from_millis(100);

/// What one distribution pass did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Signals accepted by the publisher, in tier order.
    pub published: Vec<DistributedSignal>,
    pub failed: usize,
    pub deferred: usize,
    /// Tiers skipped because no publisher was registered.
    pub skipped_tiers: usize,
    /// The whole pass was skipped because another one was still running.
    pub skipped_overlap: bool,
    pub regime: Option<MarketRegime>,
}

/// Point-in-time view of one tier's budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierStatus {
    pub tier: TierId,
    pub phase: TierPhase,
    pub daily_cap: u32,
    pub used: u32,
    pub remaining: u32,
    pub min_quality: f64,
    /// `None` for a disabled tier.
    pub next_eligible_ms: Option<u64>,
}

enum TierOutcome {
    NotEligible(TierEligibility),
    NoPublisher,
    Deferred,
    Published(DistributedSignal),
    Failed,
}

pub struct DistributionEngine {
    candidates: Arc<CandidateStore>,
    regime_provider: Arc<dyn MarketContextProvider>,
    kv: Arc<dyn KvStore>,
    publisher: RwLock<Option<Arc<dyn SignalPublisher>>>,
    budgets: Mutex<TierBudgets>,
    last_regime: Mutex<Option<MarketRegime>>,
    pass_lock: tokio::sync::Mutex<()>,
    persist_pending: AtomicBool,
}

impl DistributionEngine {
    pub fn new(
        candidates: Arc<CandidateStore>,
        regime_provider: Arc<dyn MarketContextProvider>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            candidates,
            regime_provider,
            kv,
            publisher: RwLock::new(None),
            budgets: Mutex::new(TierBudgets::new()),
            last_regime: Mutex::new(None),
            pass_lock: tokio::sync::Mutex::new(()),
            persist_pending: AtomicBool::new(false),
        }
    }

    pub fn candidates(&self) -> &Arc<CandidateStore> {
        &self.candidates
    }

    /// Registers the publish interface.
    pub fn on_publish(&self, publisher: Arc<dyn SignalPublisher>) {
        let mut slot = self.publisher.write();
        if slot.is_some() {
            warn!("publisher already registered; replacing it");
        } else {
            info!("publisher registered");
        }
        *slot = Some(publisher);
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.read().is_some()
    }

    /// Latest regime from the provider, falling back to the last known one.
    pub async fn live_regime(&self) -> Option<MarketRegime> {
        match self.regime_provider.current_regime().await {
            Ok(regime) => {
                let previous = self.last_regime.lock().replace(regime);
                if previous != Some(regime) {
                    info!(%regime, "live market regime");
                }
                Some(regime)
            }
            Err(e) => {
                let last = *self.last_regime.lock();
                warn!(error = ?e, last_known = ?last, "regime lookup failed; using last known regime");
                last
            }
        }
    }

    /// Restores tier budgets from the durable store. Failures and corrupt
    /// payloads start every tier fresh.
    pub async fn load_budgets(&self, cfg: &SchedulerConfig, now_ms: u64) -> usize {
        let raw = match self.kv.load(TIER_BUDGETS_KV_KEY).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to load tier budgets; starting empty");
                None
            }
        };

        let mut restored = match raw.map(|bytes| serde_json::from_slice::<TierBudgets>(&bytes)) {
            Some(Ok(b)) => b,
            Some(Err(e)) => {
                warn!(error = %e, "corrupt tier budget snapshot; starting empty");
                TierBudgets::new()
            }
            None => TierBudgets::new(),
        };

        restored.prune_all(now_ms, cfg.window_ms);
        restored.sync_config(&cfg.tiers);
        let publications: usize = restored.iter().map(|b| b.publications.len()).sum();

        *self.budgets.lock() = restored;
        info!(tiers = cfg.tiers.len(), publications, "tier budgets restored");
        publications
    }

    /// Writes the budget snapshot. A failed write is retried on the next pass.
    pub async fn persist_budgets(&self) -> bool {
        let bytes = {
            let budgets = self.budgets.lock();
            match serde_json::to_vec(&*budgets) {
                Ok(b) => b,
                Err(e) => {
                    error!(error = %e, "failed to serialize tier budgets");
                    return false;
                }
            }
        };

        let res = warn_if_slow(
            "tier_budgets_save",
            SLOW_PERSIST,
            self.kv.save(TIER_BUDGETS_KV_KEY, &bytes),
        )
        .await;

        match res {
            Ok(()) => {
                self.persist_pending.store(false, Ordering::Release);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to persist tier budgets; will retry next pass");
                self.persist_pending.store(true, Ordering::Release);
                false
            }
        }
    }

    pub fn tier_status(&self, cfg: &SchedulerConfig, now_ms: u64) -> Vec<TierStatus> {
        let budgets = self.budgets.lock();
        cfg.tiers
            .iter()
            .filter_map(|t| budgets.get(&t.name))
            .map(|b| {
                let used = b.published_in_window(now_ms, cfg.window_ms);
                TierStatus {
                    tier: b.tier.clone(),
                    phase: b.phase(now_ms, cfg.window_ms),
                    daily_cap: b.daily_cap,
                    used,
                    remaining: b.daily_cap.saturating_sub(used),
                    min_quality: b.min_quality,
                    next_eligible_ms: b.effective_next_eligible(now_ms, cfg.window_ms),
                }
            })
            .collect()
    }

    /// Runs one distribution pass.
    #[instrument(name = "distribution_pass", skip_all, fields(now_ms = now_ms))]
    pub async fn on_tick(&self, cfg: &SchedulerConfig, now_ms: u64) -> TickReport {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            warn!("previous distribution pass still running; skipping tick");
            return TickReport {
                skipped_overlap: true,
                ..Default::default()
            };
        };

        let regime = self.live_regime().await;
        let matcher = RegimeMatcher::new(cfg.regime.clone());

        {
            let mut budgets = self.budgets.lock();
            budgets.sync_config(&cfg.tiers);
            budgets.prune_all(now_ms, cfg.window_ms);
        }

        let publisher = self.publisher.read().clone();
        let mut report = TickReport {
            regime,
            ..Default::default()
        };
        let mut dirty = false;

        for tier in &cfg.tiers {
            let outcome = self
                .run_tier(tier, cfg, &matcher, regime, publisher.as_ref(), now_ms)
                .instrument(child_span("tier"))
                .await;

            match outcome {
                TierOutcome::NotEligible(_) => {}
                TierOutcome::NoPublisher => report.skipped_tiers += 1,
                TierOutcome::Deferred => {
                    report.deferred += 1;
                    dirty = true;
                }
                TierOutcome::Published(signal) => {
                    report.published.push(signal);
                    dirty = true;
                }
                TierOutcome::Failed => {
                    report.failed += 1;
                    dirty = true;
                }
            }
        }

        if dirty || self.persist_pending.load(Ordering::Acquire) {
            self.persist_budgets().await;
        }

        debug!(
            published = report.published.len(),
            failed = report.failed,
            deferred = report.deferred,
            pool = self.candidates.len(),
            "distribution pass complete"
        );
        report
    }

    async fn run_tier(
        &self,
        tier: &TierConfig,
        cfg: &SchedulerConfig,
        matcher: &RegimeMatcher,
        regime: Option<MarketRegime>,
        publisher: Option<&Arc<dyn SignalPublisher>>,
        now_ms: u64,
    ) -> TierOutcome {
        annotate_tier(tier.name.as_str(), None);

        let eligibility = {
            let budgets = self.budgets.lock();
            match budgets.get(&tier.name) {
                Some(b) => check_tier_eligibility(b, cfg.window_ms, now_ms),
                None => TierEligibility::Disabled,
            }
        };
        if !eligibility.is_eligible() {
            trace!(?eligibility, "tier not eligible");
            return TierOutcome::NotEligible(eligibility);
        }

        let Some(publisher) = publisher else {
            error!("no publisher registered; skipping tier");
            return TierOutcome::NoPublisher;
        };

        let pool = self.candidates.filter_by_min_quality(tier.min_quality);
        let ranked = rank_candidates(pool, regime, matcher, &cfg.composite);

        // A concurrent submission may have evicted a ranked entry since the
        // snapshot was taken; take the best one still present.
        let chosen = ranked.into_iter().find_map(|r| {
            self.candidates
                .remove(&r.signal.id())
                .map(|signal| RankedCandidate { signal, ..r })
        });

        let Some(chosen) = chosen else {
            if let Some(b) = self.budgets.lock().get_mut(&tier.name) {
                b.defer(now_ms, cfg.retry_delay_ms);
            }
            debug!(
                min_quality = tier.min_quality,
                retry_ms = cfg.retry_delay_ms,
                "no candidate clears tier bar; deferring"
            );
            return TierOutcome::Deferred;
        };

        let signal_id = chosen.signal.id();
        annotate_tier(tier.name.as_str(), Some(&signal_id));

        let consumed = self
            .budgets
            .lock()
            .get_mut(&tier.name)
            .is_some_and(|b| b.consume(now_ms, cfg.window_ms));
        if !consumed {
            error!("tier budget refused an eligible consumption; returning candidate");
            let RankedCandidate { signal, .. } = chosen;
            self.candidates.submit(signal.candidate, signal.inserted_at_ms);
            return TierOutcome::NotEligible(TierEligibility::CapReached);
        }

        let distributed = DistributedSignal {
            tier: tier.name.clone(),
            published_at_ms: now_ms,
            live_regime: regime,
            regime_score: chosen.regime_score,
            composite_score: chosen.composite,
            signal: chosen.signal,
        };

        match publisher.publish(&distributed).await {
            Ok(()) => {
                info!(
                    symbol = %distributed.signal.candidate.symbol,
                    direction = %distributed.signal.candidate.direction,
                    quality = distributed.signal.score(),
                    composite = distributed.composite_score,
                    "signal distributed"
                );
                TierOutcome::Published(distributed)
            }
            Err(e) => {
                error!(error = ?e, "publish failed; quota slot stays consumed");
                TierOutcome::Failed
            }
        }
    }
}
