//! Lifecycle data model: a published signal, its terminal outcome and the
//! closed record kept in history.

use std::fmt;

use market::types::{Direction, MarketRegime};
use scheduler::types::{DistributedSignal, TierId};
use serde::{Deserialize, Serialize};
use signals::model::{SignalId, TradeLevels};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalOutcome {
    Win,
    Loss,
    Timeout,
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalOutcome::Win => "WIN",
            SignalOutcome::Loss => "LOSS",
            SignalOutcome::Timeout => "TIMEOUT",
        })
    }
}

/// Result reported by the price tracker, or forced on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub outcome: SignalOutcome,
    pub exit_price: f64,
    pub realized_return_pct: f64,
}

impl OutcomeReport {
    /// Neutral exit at the entry price.
    pub fn timeout(entry_price: f64) -> Self {
        Self {
            outcome: SignalOutcome::Timeout,
            exit_price: entry_price,
            realized_return_pct: 0.0,
        }
    }

    pub fn at_exit(outcome: SignalOutcome, direction: Direction, entry: f64, exit: f64) -> Self {
        Self {
            outcome,
            exit_price: exit,
            realized_return_pct: realized_return_pct(direction, entry, exit),
        }
    }
}

/// Signed percentage move from entry to exit in the trade's favour.
pub fn realized_return_pct(direction: Direction, entry: f64, exit: f64) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    let raw = (exit - entry) / entry * 100.0;
    match direction {
        Direction::Long => raw,
        Direction::Short => -raw,
    }
}

/// A distributed signal under outcome monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSignal {
    pub id: SignalId,
    pub tier: TierId,
    pub symbol: String,
    pub direction: Direction,
    pub strategy: String,
    pub levels: TradeLevels,
    pub quality: f64,
    pub regime: MarketRegime,
    pub published_at_ms: u64,
    pub expires_at_ms: u64,
}

impl ActiveSignal {
    pub fn from_distributed(d: &DistributedSignal, ttl_ms: u64) -> Self {
        let c = &d.signal.candidate;
        Self {
            id: c.id,
            tier: d.tier.clone(),
            symbol: c.symbol.clone(),
            direction: c.direction,
            strategy: c.strategy.clone(),
            levels: c.levels.clone(),
            quality: c.quality.score,
            regime: c.regime,
            published_at_ms: d.published_at_ms,
            expires_at_ms: d.published_at_ms.saturating_add(ttl_ms),
        }
    }
}

/// Which path closed the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseSource {
    PriceTracker,
    Expiry,
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedSignal {
    pub signal: ActiveSignal,
    pub report: OutcomeReport,
    pub source: CloseSource,
    pub closed_at_ms: u64,
}

/// Aggregate over the retained history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutcomeStats {
    pub wins: u64,
    pub losses: u64,
    pub timeouts: u64,
    pub total_return_pct: f64,
}

impl OutcomeStats {
    pub fn record(&mut self, report: &OutcomeReport) {
        match report.outcome {
            SignalOutcome::Win => self.wins += 1,
            SignalOutcome::Loss => self.losses += 1,
            SignalOutcome::Timeout => self.timeouts += 1,
        }
        self.total_return_pct += report.realized_return_pct;
    }

    pub fn total(&self) -> u64 {
        self.wins + self.losses + self.timeouts
    }

    /// Wins over decided (non-timeout) outcomes.
    pub fn win_rate(&self) -> Option<f64> {
        let decided = self.wins + self.losses;
        (decided > 0).then(|| self.wins as f64 / decided as f64)
    }
}
