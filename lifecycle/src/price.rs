//! Price/outcome provider interface plus an in-process implementation that
//! resolves signals from pushed price updates.

use std::collections::HashMap;

use async_trait::async_trait;
use market::types::Direction;
use parking_lot::Mutex;
use signals::model::SignalId;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::types::{ActiveSignal, OutcomeReport, SignalOutcome};

/// Watches live price against a signal's entry, stop and targets.
///
/// The implementation sends on `on_result` at most once. Dropping the sender
/// without sending leaves the signal to time out at expiry.
#[async_trait]
pub trait PriceTracker: Send + Sync {
    async fn track_entry(
        &self,
        signal: ActiveSignal,
        on_result: oneshot::Sender<OutcomeReport>,
    ) -> anyhow::Result<()>;

    /// Stops watching a signal that closed some other way. Unknown ids are
    /// ignored.
    fn untrack(&self, id: &SignalId);
}

struct Watch {
    signal: ActiveSignal,
    on_result: oneshot::Sender<OutcomeReport>,
}

/// Resolves watched signals when a pushed price crosses the first target
/// (WIN) or the stop-loss (LOSS).
#[derive(Default)]
pub struct LevelPriceTracker {
    watches: Mutex<HashMap<SignalId, Watch>>,
}

impl LevelPriceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watching(&self) -> usize {
        self.watches.lock().len()
    }

    /// Feeds one price observation. Returns how many signals resolved.
    pub fn on_price(&self, symbol: &str, price: f64) -> usize {
        if !price.is_finite() || price <= 0.0 {
            return 0;
        }

        let hits: Vec<Watch> = {
            let mut watches = self.watches.lock();
            watches.retain(|_, w| !w.on_result.is_closed());
            let ids: Vec<SignalId> = watches
                .values()
                .filter(|w| w.signal.symbol == symbol && level_hit(&w.signal, price).is_some())
                .map(|w| w.signal.id)
                .collect();
            ids.iter().filter_map(|id| watches.remove(id)).collect()
        };

        let mut resolved = 0;
        for w in hits {
            let Some(outcome) = level_hit(&w.signal, price) else {
                continue;
            };
            let report = OutcomeReport::at_exit(
                outcome,
                w.signal.direction,
                w.signal.levels.entry_price,
                price,
            );
            debug!(signal_id = %w.signal.id, %outcome, price, "price level hit");
            // receiver gone means the signal already closed another way
            if w.on_result.send(report).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }

    /// Stops watching a signal without reporting.
    pub fn forget(&self, id: &SignalId) -> bool {
        self.watches.lock().remove(id).is_some()
    }
}

#[async_trait]
impl PriceTracker for LevelPriceTracker {
    async fn track_entry(
        &self,
        signal: ActiveSignal,
        on_result: oneshot::Sender<OutcomeReport>,
    ) -> anyhow::Result<()> {
        if signal.levels.stop_loss.is_none() && signal.levels.targets.is_empty() {
            info!(signal_id = %signal.id, "no exit levels; signal will run to expiry");
        }
        let mut watches = self.watches.lock();
        // receivers dropped without an untrack
        watches.retain(|_, w| !w.on_result.is_closed());
        watches.insert(signal.id, Watch { signal, on_result });
        Ok(())
    }

    fn untrack(&self, id: &SignalId) {
        if self.forget(id) {
            debug!(signal_id = %id, "price watch released");
        }
    }
}

fn level_hit(signal: &ActiveSignal, price: f64) -> Option<SignalOutcome> {
    let target = signal.levels.targets.first().copied();
    let stop = signal.levels.stop_loss;

    match signal.direction {
        Direction::Long => {
            if target.is_some_and(|t| price >= t) {
                Some(SignalOutcome::Win)
            } else if stop.is_some_and(|s| price <= s) {
                Some(SignalOutcome::Loss)
            } else {
                None
            }
        }
        Direction::Short => {
            if target.is_some_and(|t| price <= t) {
                Some(SignalOutcome::Win)
            } else if stop.is_some_and(|s| price >= s) {
                Some(SignalOutcome::Loss)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market::types::MarketRegime;
    use scheduler::types::TierId;
    use signals::model::TradeLevels;

    fn active(direction: Direction) -> ActiveSignal {
        let (stop, target) = match direction {
            Direction::Long => (95.0, 110.0),
            Direction::Short => (105.0, 90.0),
        };
        ActiveSignal {
            id: SignalId::new_v4(),
            tier: TierId::from("PRO"),
            symbol: "BTCUSDT".into(),
            direction,
            strategy: "test".into(),
            levels: TradeLevels {
                entry_price: 100.0,
                stop_loss: Some(stop),
                targets: vec![target],
            },
            quality: 80.0,
            regime: MarketRegime::Sideways,
            published_at_ms: 0,
            expires_at_ms: 1_000,
        }
    }

    #[test]
    fn level_hits_follow_direction() {
        let long = active(Direction::Long);
        assert_eq!(level_hit(&long, 111.0), Some(SignalOutcome::Win));
        assert_eq!(level_hit(&long, 94.0), Some(SignalOutcome::Loss));
        assert_eq!(level_hit(&long, 100.0), None);

        let short = active(Direction::Short);
        assert_eq!(level_hit(&short, 89.0), Some(SignalOutcome::Win));
        assert_eq!(level_hit(&short, 106.0), Some(SignalOutcome::Loss));
    }

    #[tokio::test]
    async fn price_update_reports_once() {
        let tracker = LevelPriceTracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.track_entry(active(Direction::Long), tx).await.unwrap();

        assert_eq!(tracker.on_price("ETHUSDT", 200.0), 0);
        assert_eq!(tracker.on_price("BTCUSDT", 101.0), 0);
        assert_eq!(tracker.on_price("BTCUSDT", 112.0), 1);
        assert_eq!(tracker.on_price("BTCUSDT", 112.0), 0);

        let report = rx.await.unwrap();
        assert_eq!(report.outcome, SignalOutcome::Win);
        assert!((report.realized_return_pct - 12.0).abs() < 1e-9);
        assert_eq!(tracker.watching(), 0);
    }

    #[tokio::test]
    async fn untrack_and_abandoned_receivers_release_watches() {
        let tracker = LevelPriceTracker::new();

        let kept = active(Direction::Long);
        let (tx, _rx) = oneshot::channel();
        tracker.track_entry(kept.clone(), tx).await.unwrap();
        tracker.untrack(&kept.id);
        assert_eq!(tracker.watching(), 0);

        let (tx, rx) = oneshot::channel();
        tracker.track_entry(active(Direction::Short), tx).await.unwrap();
        drop(rx);
        let (tx, _rx2) = oneshot::channel();
        tracker.track_entry(active(Direction::Long), tx).await.unwrap();
        assert_eq!(tracker.watching(), 1);

        tracker.untrack(&SignalId::new_v4());
        assert_eq!(tracker.watching(), 1);
    }
}
