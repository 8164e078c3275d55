use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Durable key-value snapshots (dedup cache, tier budgets)
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS kv_store (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Published signals and their terminal outcome
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS distributed_signals (
  signal_id TEXT PRIMARY KEY,
  tier TEXT NOT NULL,
  symbol TEXT NOT NULL,
  direction TEXT NOT NULL,
  quality REAL NOT NULL,
  composite REAL NOT NULL,
  published_ms BIGINT NOT NULL,
  payload TEXT NOT NULL,

  outcome TEXT,
  exit_price REAL,
  return_pct REAL,
  closed_ms BIGINT
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE INDEX IF NOT EXISTS idx_distributed_signals_tier_published
ON distributed_signals (tier, published_ms);
"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
