use async_trait::async_trait;
use tracing::info;

use crate::types::ClosedSignal;

/// Receives every closed signal, e.g. a learning / performance collaborator.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record(&self, closed: &ClosedSignal) -> anyhow::Result<()>;
}

/// Sink that only logs the outcome.
#[derive(Debug, Default)]
pub struct LogOutcomeSink;

#[async_trait]
impl OutcomeSink for LogOutcomeSink {
    async fn record(&self, closed: &ClosedSignal) -> anyhow::Result<()> {
        info!(
            component = "lifecycle",
            event = "outcome",
            signal_id = %closed.signal.id,
            symbol = %closed.signal.symbol,
            tier = %closed.signal.tier,
            outcome = %closed.report.outcome,
            return_pct = closed.report.realized_return_pct,
            "signal closed"
        );
        Ok(())
    }
}
