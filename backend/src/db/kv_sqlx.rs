use anyhow::Context;
use async_trait::async_trait;
use common::kv::{KvError, KvStore};
use common::time::now_ms;
use sqlx::{AnyPool, Row};

/// SQLx-backed implementation of KvStore.
/// Values are UTF-8 snapshots (JSON) stored as TEXT.
pub struct SqlxKvStore {
    pool: AnyPool,
    max_value_bytes: Option<usize>,
}

impl SqlxKvStore {
    pub fn new(pool: AnyPool) -> Self {
        Self {
            pool,
            max_value_bytes: None,
        }
    }

    /// Rejects writes larger than `bytes` with [`KvError::QuotaExceeded`].
    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = Some(bytes);
        self
    }
}

#[async_trait]
impl KvStore for SqlxKvStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?;")
            .bind(key.to_string())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("load kv key {key}"))?;

        match row {
            Some(r) => {
                let value: String = r.try_get("value").context("decode kv value")?;
                Ok(Some(value.into_bytes()))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        if let Some(max) = self.max_value_bytes {
            if value.len() > max {
                return Err(KvError::QuotaExceeded {
                    key: key.to_string(),
                    bytes: value.len(),
                });
            }
        }

        let text = std::str::from_utf8(value).context("kv values must be UTF-8")?;

        sqlx::query(
            r#"
INSERT INTO kv_store (key, value, updated_ms)
VALUES (?, ?, ?)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_ms = excluded.updated_ms;
"#,
        )
        .bind(key.to_string())
        .bind(text.to_string())
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("save kv key {key}"))?;

        Ok(())
    }
}
