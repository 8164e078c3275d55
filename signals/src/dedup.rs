//! Rolling-window duplicate suppression keyed by normalized `(symbol, direction)`.
//!
//! Guarantees:
//! - A key accepted at `T` is a duplicate for any lookup before `T + window`.
//! - Expired entries are dropped lazily on lookup and by [`DedupCache::sweep`].
//! - Persistence never fails the caller; under size pressure only the most
//!   recent `max_persisted` entries are written.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::kv::{KvError, KvStore};
use common::logger::warn_if_slow;
use common::time::DAY_MS;
use market::types::{Direction, normalize_symbol};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub const DEDUP_KV_KEY: &str = "dedup:v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    pub symbol: String,
    pub direction: Direction,
}

impl DedupKey {
    /// `None` when the symbol normalizes to nothing.
    pub fn new(symbol: &str, direction: Direction) -> Option<Self> {
        normalize_symbol(symbol).map(|symbol| Self { symbol, direction })
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Suppression window.
    pub window_ms: u64,
    /// Entries kept when the persisted snapshot is under pressure.
    pub max_persisted: usize,
    /// Snapshots larger than this are trimmed before writing.
    pub max_snapshot_bytes: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: DAY_MS,
            max_persisted: 50,
            max_snapshot_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub key: DedupKey,
    pub accepted_at_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DedupSnapshot {
    entries: Vec<DedupEntry>,
}

/// Result of [`DedupCache::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Key seen inside the window; the admit closure was not called.
    Duplicate,
    /// Closure declined the candidate; nothing recorded.
    Declined,
    /// Closure accepted; key recorded at `now_ms`.
    Recorded,
}

pub struct DedupCache {
    cfg: RwLock<DedupConfig>,
    entries: Mutex<HashMap<DedupKey, u64>>,
    kv: Arc<dyn KvStore>,
    /// Held from snapshot to save so writes land in snapshot order.
    persist_lock: tokio::sync::Mutex<()>,
}

impl DedupCache {
    pub fn new(cfg: DedupConfig, kv: Arc<dyn KvStore>) -> Self {
        Self {
            cfg: RwLock::new(cfg),
            entries: Mutex::new(HashMap::new()),
            kv,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn reconfigure(&self, cfg: DedupConfig) {
        let mut guard = self.cfg.write();
        if *guard != cfg {
            debug!(window_ms = cfg.window_ms, "dedup configuration updated");
            *guard = cfg;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// True if an equivalent signal was accepted within the window.
    /// Unparseable symbols are never duplicates.
    pub fn is_duplicate(&self, symbol: &str, direction: Direction, now_ms: u64) -> bool {
        match DedupKey::new(symbol, direction) {
            Some(key) => self.is_duplicate_key(&key, now_ms),
            None => false,
        }
    }

    pub fn is_duplicate_key(&self, key: &DedupKey, now_ms: u64) -> bool {
        let window = self.cfg.read().window_ms;
        let mut entries = self.entries.lock();
        check_fresh(&mut entries, key, window, now_ms)
    }

    /// Overwrites the acceptance timestamp for the key unconditionally.
    pub fn record(&self, symbol: &str, direction: Direction, now_ms: u64) {
        if let Some(key) = DedupKey::new(symbol, direction) {
            self.entries.lock().insert(key, now_ms);
        }
    }

    /// Check-then-record as one step: `accept` runs under the cache lock and
    /// the key is recorded only if it returns true. Two racing submissions of
    /// the same key can therefore never both be admitted.
    pub fn admit<F>(&self, key: &DedupKey, now_ms: u64, accept: F) -> Admission
    where
        F: FnOnce() -> bool,
    {
        let window = self.cfg.read().window_ms;
        let mut entries = self.entries.lock();

        if check_fresh(&mut entries, key, window, now_ms) {
            return Admission::Duplicate;
        }

        if !accept() {
            return Admission::Declined;
        }

        entries.insert(key.clone(), now_ms);
        Admission::Recorded
    }

    /// Drops every entry older than the window. Returns how many were removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let window = self.cfg.read().window_ms;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, ts| !is_expired(*ts, window, now_ms));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "dedup sweep evicted entries");
        }
        removed
    }

    /// Restores entries from the durable store, dropping anything already
    /// outside the window. Failures start from empty.
    #[instrument(skip(self), target = "dedup")]
    pub async fn load(&self, now_ms: u64) -> usize {
        let raw = match self.kv.load(DEDUP_KV_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!("no persisted dedup state; starting empty");
                return 0;
            }
            Err(e) => {
                warn!(error = %e, "failed to load dedup state; starting empty");
                return 0;
            }
        };

        let snapshot: DedupSnapshot = match serde_json::from_slice(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "corrupt dedup snapshot; starting empty");
                return 0;
            }
        };

        let window = self.cfg.read().window_ms;
        let total = snapshot.entries.len();
        let mut entries = self.entries.lock();
        for e in snapshot.entries {
            if is_expired(e.accepted_at_ms, window, now_ms) {
                continue;
            }
            let slot = entries.entry(e.key).or_insert(e.accepted_at_ms);
            *slot = (*slot).max(e.accepted_at_ms);
        }

        info!(
            restored = entries.len(),
            dropped = total.saturating_sub(entries.len()),
            "dedup state restored"
        );
        entries.len()
    }

    /// Writes the current entries to the durable store. Returns whether
    /// anything was written; errors are logged, never returned.
    #[instrument(skip(self), target = "dedup")]
    pub async fn persist(&self) -> bool {
        let _writer = self.persist_lock.lock().await;
        let cfg = self.cfg.read().clone();
        let ordered = self.most_recent_first();

        let full = match encode(&ordered) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode dedup snapshot");
                return false;
            }
        };

        let (payload, trimmed) = if full.len() > cfg.max_snapshot_bytes {
            warn!(
                bytes = full.len(),
                limit = cfg.max_snapshot_bytes,
                keep = cfg.max_persisted,
                "dedup snapshot over budget; keeping most recent entries"
            );
            match encode(&ordered[..ordered.len().min(cfg.max_persisted)]) {
                Ok(b) => (b, true),
                Err(e) => {
                    warn!(error = %e, "failed to encode trimmed dedup snapshot");
                    return false;
                }
            }
        } else {
            (full, false)
        };

        match self.save(&payload).await {
            Ok(()) => true,
            Err(KvError::QuotaExceeded { bytes, .. }) if !trimmed => {
                warn!(
                    bytes,
                    keep = cfg.max_persisted,
                    "storage quota hit; retrying with most recent dedup entries"
                );
                let Ok(small) = encode(&ordered[..ordered.len().min(cfg.max_persisted)]) else {
                    return false;
                };
                match self.save(&small).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "failed to persist trimmed dedup snapshot");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to persist dedup snapshot");
                false
            }
        }
    }

    async fn save(&self, payload: &[u8]) -> Result<(), KvError> {
        warn_if_slow("kv_save_dedup", Duration::from_millis(100), async {
            self.kv.save(DEDUP_KV_KEY, payload).await
        })
        .await
    }

    /// Entries ordered newest first; ties broken by key so trimming is deterministic.
    fn most_recent_first(&self) -> Vec<DedupEntry> {
        let mut out: Vec<DedupEntry> = self
            .entries
            .lock()
            .iter()
            .map(|(k, ts)| DedupEntry {
                key: k.clone(),
                accepted_at_ms: *ts,
            })
            .collect();

        out.sort_by(|a, b| {
            b.accepted_at_ms
                .cmp(&a.accepted_at_ms)
                .then_with(|| a.key.cmp(&b.key))
        });
        out
    }
}

fn is_expired(accepted_at_ms: u64, window_ms: u64, now_ms: u64) -> bool {
    now_ms.saturating_sub(accepted_at_ms) >= window_ms
}

/// Lazy eviction: an expired entry is deleted and reported as not fresh.
fn check_fresh(entries: &mut HashMap<DedupKey, u64>, key: &DedupKey, window_ms: u64, now_ms: u64) -> bool {
    match entries.get(key) {
        Some(ts) if is_expired(*ts, window_ms, now_ms) => {
            entries.remove(key);
            false
        }
        Some(_) => true,
        None => false,
    }
}

fn encode(entries: &[DedupEntry]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&DedupSnapshot {
        entries: entries.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::kv::InMemoryKvStore;
    use common::time::HOUR_MS;

    fn cache() -> DedupCache {
        DedupCache::new(DedupConfig::default(), Arc::new(InMemoryKvStore::new()))
    }

    #[test]
    fn duplicate_within_window_only() {
        let c = cache();
        c.record("BTCUSDT", Direction::Long, 0);

        assert!(c.is_duplicate("BTCUSDT", Direction::Long, HOUR_MS));
        assert!(c.is_duplicate("btc/usdt", Direction::Long, DAY_MS - 1));
        assert!(!c.is_duplicate("BTCUSDT", Direction::Long, DAY_MS));
    }

    #[test]
    fn direction_is_part_of_the_key() {
        let c = cache();
        c.record("BTCUSDT", Direction::Long, 0);
        assert!(!c.is_duplicate("BTCUSDT", Direction::Short, 1));
    }

    #[test]
    fn expired_lookup_deletes_entry() {
        let c = cache();
        c.record("ETH", Direction::Short, 0);
        assert_eq!(c.len(), 1);

        assert!(!c.is_duplicate("ETH", Direction::Short, DAY_MS + 1));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn record_overwrites_timestamp() {
        let c = cache();
        c.record("SOL", Direction::Long, 0);
        c.record("SOL", Direction::Long, 10 * HOUR_MS);

        assert!(c.is_duplicate("SOL", Direction::Long, DAY_MS + HOUR_MS));
    }

    #[test]
    fn admit_records_only_when_accepted() {
        let c = cache();
        let key = DedupKey::new("BTCUSDT", Direction::Long).unwrap();

        assert_eq!(c.admit(&key, 0, || false), Admission::Declined);
        assert!(c.is_empty());

        assert_eq!(c.admit(&key, 0, || true), Admission::Recorded);

        let mut called = false;
        let out = c.admit(&key, HOUR_MS, || {
            called = true;
            true
        });
        assert_eq!(out, Admission::Duplicate);
        assert!(!called);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let c = cache();
        c.record("A", Direction::Long, 0);
        c.record("B", Direction::Long, 12 * HOUR_MS);

        assert_eq!(c.sweep(DAY_MS), 1);
        assert_eq!(c.len(), 1);
        assert!(c.is_duplicate("B", Direction::Long, DAY_MS));
    }

    #[test]
    fn window_follows_reconfigure() {
        let c = cache();
        c.record("A", Direction::Long, 0);
        c.reconfigure(DedupConfig {
            window_ms: HOUR_MS,
            ..Default::default()
        });
        assert!(!c.is_duplicate("A", Direction::Long, HOUR_MS));
    }

    #[tokio::test]
    async fn persist_then_load_drops_stale_entries() {
        let kv = Arc::new(InMemoryKvStore::new());
        let c = DedupCache::new(DedupConfig::default(), kv.clone());
        c.record("OLD", Direction::Long, 0);
        c.record("NEW", Direction::Long, 20 * HOUR_MS);
        assert!(c.persist().await);

        let restored = DedupCache::new(DedupConfig::default(), kv);
        assert_eq!(restored.load(DAY_MS + HOUR_MS).await, 1);
        assert!(restored.is_duplicate("NEW", Direction::Long, DAY_MS + HOUR_MS));
        assert!(!restored.is_duplicate("OLD", Direction::Long, DAY_MS + HOUR_MS));
    }

    #[tokio::test]
    async fn load_survives_corrupt_payload() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.insert_raw(DEDUP_KV_KEY, b"not json".to_vec());

        let c = DedupCache::new(DedupConfig::default(), kv);
        assert_eq!(c.load(0).await, 0);
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn oversized_snapshot_keeps_most_recent() {
        let kv = Arc::new(InMemoryKvStore::new());
        let cfg = DedupConfig {
            max_persisted: 3,
            max_snapshot_bytes: 200,
            ..Default::default()
        };
        let c = DedupCache::new(cfg.clone(), kv.clone());
        for i in 0..20u64 {
            c.record(&format!("SYM{i}"), Direction::Long, i);
        }
        assert!(c.persist().await);

        let restored = DedupCache::new(cfg, kv);
        assert_eq!(restored.load(20).await, 3);
        for i in 17..20u64 {
            assert!(restored.is_duplicate(&format!("SYM{i}"), Direction::Long, 20));
        }
        assert!(!restored.is_duplicate("SYM16", Direction::Long, 20));
        // live cache is untouched by the trim
        assert_eq!(c.len(), 20);
    }

    #[tokio::test]
    async fn quota_error_retries_with_trimmed_snapshot() {
        let kv = Arc::new(InMemoryKvStore::with_quota(400));
        let cfg = DedupConfig {
            max_persisted: 2,
            ..Default::default()
        };
        let c = DedupCache::new(cfg.clone(), kv.clone());
        for i in 0..30u64 {
            c.record(&format!("COIN{i}"), Direction::Short, 100 + i);
        }

        assert!(c.persist().await);

        let restored = DedupCache::new(cfg, kv);
        assert_eq!(restored.load(200).await, 2);
    }

    /// Parks the first save until released.
    struct GatedKv {
        inner: InMemoryKvStore,
        saves: std::sync::atomic::AtomicUsize,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl KvStore for GatedKv {
        async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
            self.inner.load(key).await
        }

        async fn save(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
            let n = self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.save(key, value).await
        }
    }

    #[tokio::test]
    async fn concurrent_persists_land_in_order() {
        let kv = Arc::new(GatedKv {
            inner: InMemoryKvStore::new(),
            saves: Default::default(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let c = Arc::new(DedupCache::new(DedupConfig::default(), kv.clone()));

        c.record("BTC", Direction::Long, 0);
        let first = tokio::spawn({
            let c = c.clone();
            async move { c.persist().await }
        });
        kv.entered.notified().await;

        // newer state persisted while the older write is still in flight
        c.record("ETH", Direction::Long, 1);
        let second = tokio::spawn({
            let c = c.clone();
            async move { c.persist().await }
        });
        tokio::task::yield_now().await;
        kv.release.notify_one();

        assert!(first.await.unwrap());
        assert!(second.await.unwrap());

        let restored = DedupCache::new(DedupConfig::default(), kv);
        assert_eq!(restored.load(2).await, 2);
        assert!(restored.is_duplicate("ETH", Direction::Long, 2));
    }
}
