use anyhow::Context;
use async_trait::async_trait;
use lifecycle::sink::OutcomeSink;
use lifecycle::types::ClosedSignal;
use scheduler::publisher::SignalPublisher;
use scheduler::types::DistributedSignal;
use signals::model::SignalId;
use sqlx::{AnyPool, Row};
use tracing::{debug, warn};

/// Durable log of distributed signals.
///
/// Acts as the publisher's storage step and as the outcome sink that
/// stamps the terminal result onto the same row.
pub struct SqlxSignalLog {
    pool: AnyPool,
}

/// Terminal fields of a logged signal.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedOutcome {
    pub outcome: String,
    pub exit_price: f64,
    pub return_pct: f64,
    pub closed_ms: u64,
}

impl SqlxSignalLog {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn record_published(&self, signal: &DistributedSignal) -> anyhow::Result<bool> {
        let c = &signal.signal.candidate;
        let payload = serde_json::to_string(signal).context("encode distributed signal")?;

        let res = sqlx::query(
            r#"
INSERT INTO distributed_signals
  (signal_id, tier, symbol, direction, quality, composite, published_ms, payload)
VALUES (?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(signal_id) DO NOTHING;
"#,
        )
        .bind(c.id.to_string())
        .bind(signal.tier.to_string())
        .bind(c.symbol.clone())
        .bind(c.direction.to_string())
        .bind(c.quality.score)
        .bind(signal.composite_score)
        .bind(signal.published_at_ms as i64)
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("insert distributed signal")?;

        Ok(res.rows_affected() == 1)
    }

    /// Stamps the outcome once; a row that already has one is left alone.
    pub async fn record_outcome(&self, closed: &ClosedSignal) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
UPDATE distributed_signals
SET outcome = ?, exit_price = ?, return_pct = ?, closed_ms = ?
WHERE signal_id = ? AND outcome IS NULL;
"#,
        )
        .bind(closed.report.outcome.to_string())
        .bind(closed.report.exit_price)
        .bind(closed.report.realized_return_pct)
        .bind(closed.closed_at_ms as i64)
        .bind(closed.signal.id.to_string())
        .execute(&self.pool)
        .await
        .context("update signal outcome")?;

        Ok(res.rows_affected() == 1)
    }

    pub async fn fetch_outcome(&self, id: &SignalId) -> anyhow::Result<Option<LoggedOutcome>> {
        let row = sqlx::query(
            r#"
SELECT outcome, exit_price, return_pct, closed_ms
FROM distributed_signals
WHERE signal_id = ? AND outcome IS NOT NULL;
"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };

        Ok(Some(LoggedOutcome {
            outcome: r.try_get("outcome")?,
            exit_price: r.try_get("exit_price")?,
            return_pct: r.try_get("return_pct")?,
            closed_ms: r.try_get::<i64, _>("closed_ms")? as u64,
        }))
    }

    pub async fn count_for_tier(&self, tier: &str) -> anyhow::Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM distributed_signals WHERE tier = ?;")
            .bind(tier.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl SignalPublisher for SqlxSignalLog {
    async fn publish(&self, signal: &DistributedSignal) -> anyhow::Result<()> {
        if !self.record_published(signal).await? {
            debug!(signal_id = %signal.signal.id(), "signal already logged");
        }
        Ok(())
    }
}

#[async_trait]
impl OutcomeSink for SqlxSignalLog {
    async fn record(&self, closed: &ClosedSignal) -> anyhow::Result<()> {
        if !self.record_outcome(closed).await? {
            warn!(signal_id = %closed.signal.id, "no open log row for closed signal");
        }
        Ok(())
    }
}
