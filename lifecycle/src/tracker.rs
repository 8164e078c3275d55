//! Signal lifecycle tracker.
//!
//! Every distributed signal is ACTIVE until exactly one of:
//! - the price tracker reports a target or stop hit (WIN / LOSS),
//! - its expiry timer fires (TIMEOUT at the entry price),
//! - the backstop sweep finds it past `expiry + grace` (TIMEOUT).
//!
//! Closing removes the signal from the active set and appends it to a
//! bounded history under one lock, so a second close for the same id is a
//! no-op.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::time::{Clock, DAY_MS, MINUTE_MS};
use parking_lot::{Mutex, RwLock};
use scheduler::types::DistributedSignal;
use serde::{Deserialize, Serialize};
use signals::model::SignalId;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::price::PriceTracker;
use crate::sink::OutcomeSink;
use crate::types::{ActiveSignal, CloseSource, ClosedSignal, OutcomeReport, OutcomeStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Time from publication to forced TIMEOUT.
    pub signal_ttl_ms: u64,
    /// Slack past expiry before the sweep force-closes a signal.
    pub monitoring_grace_ms: u64,
    pub history_limit: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            signal_ttl_ms: DAY_MS,
            monitoring_grace_ms: 5 * MINUTE_MS,
            history_limit: 500,
        }
    }
}

struct ActiveEntry {
    signal: ActiveSignal,
    timer: Option<AbortHandle>,
}

#[derive(Default)]
struct TrackerState {
    active: HashMap<SignalId, ActiveEntry>,
    history: VecDeque<ClosedSignal>,
    stats: OutcomeStats,
}

pub struct SignalLifecycleTracker {
    cfg: RwLock<LifecycleConfig>,
    clock: Arc<dyn Clock>,
    prices: Arc<dyn PriceTracker>,
    sink: Arc<dyn OutcomeSink>,
    state: Mutex<TrackerState>,
    stopped: AtomicBool,
}

impl SignalLifecycleTracker {
    pub fn new(
        cfg: LifecycleConfig,
        clock: Arc<dyn Clock>,
        prices: Arc<dyn PriceTracker>,
        sink: Arc<dyn OutcomeSink>,
    ) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            clock,
            prices,
            sink,
            state: Mutex::new(TrackerState::default()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Applies to signals registered from now on; running timers keep
    /// their expiry.
    pub fn reconfigure(&self, cfg: LifecycleConfig) {
        let mut current = self.cfg.write();
        if *current != cfg {
            info!(
                ttl_ms = cfg.signal_ttl_ms,
                grace_ms = cfg.monitoring_grace_ms,
                history_limit = cfg.history_limit,
                "lifecycle config updated"
            );
            *current = cfg;
        }
    }

    /// Starts monitoring a published signal.
    ///
    /// Returns `None` if the signal is already active or the tracker has
    /// been shut down.
    pub async fn register(self: &Arc<Self>, published: &DistributedSignal) -> Option<ActiveSignal> {
        if self.stopped.load(Ordering::Acquire) {
            warn!(signal_id = %published.signal.id(), "tracker stopped; not registering");
            return None;
        }

        let ttl_ms = self.cfg.read().signal_ttl_ms;
        let signal = ActiveSignal::from_distributed(published, ttl_ms);
        let id = signal.id;

        {
            let mut st = self.state.lock();
            if st.active.contains_key(&id) {
                warn!(signal_id = %id, "signal already active; ignoring registration");
                return None;
            }
            st.active.insert(
                id,
                ActiveEntry {
                    signal: signal.clone(),
                    timer: None,
                },
            );
        }

        let (tx, rx) = oneshot::channel();
        if let Err(e) = self.prices.track_entry(signal.clone(), tx).await {
            warn!(signal_id = %id, error = ?e, "price tracking unavailable; signal will time out");
        }

        let delay = Duration::from_millis(signal.expires_at_ms.saturating_sub(self.clock.now_ms()));
        let this = Arc::clone(self);
        let span = info_span!("lifecycle", signal_id = %id, tier = %signal.tier);
        let handle = tokio::spawn(
            async move {
                let expiry = tokio::time::sleep(delay);
                tokio::pin!(expiry);

                let mut expired = false;
                let reported = tokio::select! {
                    res = rx => res.ok(),
                    _ = &mut expiry => {
                        expired = true;
                        None
                    }
                };

                match reported {
                    Some(report) => {
                        this.close(&id, report, CloseSource::PriceTracker, false).await;
                    }
                    None => {
                        // tracker dropped its sender before expiry
                        if !expired {
                            expiry.await;
                        }
                        this.expire(&id).await;
                    }
                }
            }
            .instrument(span),
        );

        // The task may already have closed the entry.
        if let Some(entry) = self.state.lock().active.get_mut(&id) {
            entry.timer = Some(handle.abort_handle());
        }

        info!(
            component = "lifecycle",
            event = "registered",
            signal_id = %id,
            symbol = %signal.symbol,
            expires_at_ms = signal.expires_at_ms,
            "signal active"
        );
        Some(signal)
    }

    /// Closes a signal with an externally reported outcome. Idempotent:
    /// returns false if the signal is not active.
    pub async fn resolve(&self, id: &SignalId, report: OutcomeReport) -> bool {
        self.close(id, report, CloseSource::PriceTracker, true).await
    }

    /// Force-closes every signal past `expiry + grace`.
    pub async fn sweep_expired(&self, now_ms: u64) -> usize {
        let grace = self.cfg.read().monitoring_grace_ms;
        let overdue: Vec<(SignalId, f64)> = self
            .state
            .lock()
            .active
            .values()
            .filter(|e| now_ms >= e.signal.expires_at_ms.saturating_add(grace))
            .map(|e| (e.signal.id, e.signal.levels.entry_price))
            .collect();

        let mut closed = 0;
        for (id, entry_price) in overdue {
            warn!(signal_id = %id, "signal past expiry grace; forcing timeout");
            if self
                .close(&id, OutcomeReport::timeout(entry_price), CloseSource::Sweep, true)
                .await
            {
                closed += 1;
            }
        }
        closed
    }

    /// Cancels every expiry timer. Active signals stay unresolved.
    pub fn shutdown(&self) -> usize {
        self.stopped.store(true, Ordering::Release);
        let st = self.state.lock();
        let mut cancelled = 0;
        for entry in st.active.values() {
            if let Some(t) = &entry.timer {
                t.abort();
                cancelled += 1;
            }
        }
        info!(cancelled, active = st.active.len(), "lifecycle tracker stopped");
        cancelled
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn is_active(&self, id: &SignalId) -> bool {
        self.state.lock().active.contains_key(id)
    }

    pub fn active(&self) -> Vec<ActiveSignal> {
        self.state
            .lock()
            .active
            .values()
            .map(|e| e.signal.clone())
            .collect()
    }

    /// Closed signals, oldest first.
    pub fn history(&self) -> Vec<ClosedSignal> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Stats over every signal closed since start, not just retained history.
    pub fn stats(&self) -> OutcomeStats {
        self.state.lock().stats
    }

    async fn expire(&self, id: &SignalId) -> bool {
        let entry_price = match self.state.lock().active.get(id) {
            Some(e) => e.signal.levels.entry_price,
            None => return false,
        };
        self.close(id, OutcomeReport::timeout(entry_price), CloseSource::Expiry, false)
            .await
    }

    async fn close(
        &self,
        id: &SignalId,
        report: OutcomeReport,
        source: CloseSource,
        cancel_timer: bool,
    ) -> bool {
        let closed = {
            let mut st = self.state.lock();
            let Some(entry) = st.active.remove(id) else {
                debug!(signal_id = %id, ?source, "signal already closed; ignoring outcome");
                return false;
            };
            if cancel_timer {
                if let Some(t) = entry.timer {
                    t.abort();
                }
            }

            let closed = ClosedSignal {
                signal: entry.signal,
                report,
                source,
                closed_at_ms: self.clock.now_ms(),
            };

            st.stats.record(&report);
            st.history.push_back(closed.clone());
            let limit = self.cfg.read().history_limit;
            while st.history.len() > limit {
                st.history.pop_front();
            }
            closed
        };

        self.prices.untrack(id);

        info!(
            component = "lifecycle",
            event = "closed",
            signal_id = %id,
            outcome = %closed.report.outcome,
            ?source,
            return_pct = closed.report.realized_return_pct,
            "signal resolved"
        );

        if let Err(e) = self.sink.record(&closed).await {
            warn!(signal_id = %id, error = ?e, "outcome sink failed");
        }
        true
    }
}
