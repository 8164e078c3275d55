use std::sync::Arc;

use backend::db::{kv_sqlx::SqlxKvStore, schema, signal_log::SqlxSignalLog};
use common::kv::{KvError, KvStore};
use common::time::HOUR_MS;
use lifecycle::types::{ActiveSignal, CloseSource, ClosedSignal, OutcomeReport, SignalOutcome};
use market::types::{Direction, MarketRegime};
use scheduler::types::{DistributedSignal, TierId};
use signals::dedup::{DedupCache, DedupConfig};
use signals::model::{
    CandidateSignal, QualityFactors, QualityScore, Recommendation, StoredSignal, TradeLevels,
};
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use uuid::Uuid;

const T0: u64 = 1_700_000_000_000;

async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    // Unique shared in-memory DB per test.
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect sqlite");

    schema::migrate(&pool).await.expect("migrate");
    pool
}

fn distributed(symbol: &str, tier: &str) -> DistributedSignal {
    let candidate = CandidateSignal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        base: symbol.trim_end_matches("USDT").to_string(),
        direction: Direction::Long,
        strategy: "breakout".into(),
        factors: QualityFactors::default(),
        quality: QualityScore {
            score: 82.0,
            recommendation: Recommendation::Publish,
        },
        regime: MarketRegime::BullishTrend,
        levels: TradeLevels {
            entry_price: 100.0,
            stop_loss: Some(95.0),
            targets: vec![110.0],
        },
        created_at_ms: T0,
    };

    DistributedSignal {
        signal: StoredSignal {
            candidate,
            inserted_at_ms: T0,
        },
        tier: TierId::from(tier),
        published_at_ms: T0 + 1_000,
        live_regime: Some(MarketRegime::BullishTrend),
        regime_score: 1.0,
        composite_score: 89.2,
    }
}

fn closed(d: &DistributedSignal, outcome: SignalOutcome, exit: f64) -> ClosedSignal {
    let signal = ActiveSignal::from_distributed(d, 24 * HOUR_MS);
    ClosedSignal {
        report: OutcomeReport::at_exit(outcome, signal.direction, 100.0, exit),
        signal,
        source: CloseSource::PriceTracker,
        closed_at_ms: T0 + HOUR_MS,
    }
}

#[tokio::test]
async fn kv_missing_key_loads_none() {
    let kv = SqlxKvStore::new(setup_db().await);
    assert!(kv.load("nope").await.unwrap().is_none());
}

#[tokio::test]
async fn kv_save_overwrites_previous_value() {
    let pool = setup_db().await;
    let kv = SqlxKvStore::new(pool.clone());

    kv.save("tier_budgets:v1", br#"{"a":1}"#).await.unwrap();
    kv.save("tier_budgets:v1", br#"{"a":2}"#).await.unwrap();

    assert_eq!(
        kv.load("tier_budgets:v1").await.unwrap().as_deref(),
        Some(&br#"{"a":2}"#[..])
    );

    let row = sqlx::query("SELECT COUNT(*) AS n FROM kv_store;")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
}

#[tokio::test]
async fn kv_rejects_oversized_values() {
    let kv = SqlxKvStore::new(setup_db().await).with_max_value_bytes(8);

    let err = kv.save("big", b"0123456789").await.unwrap_err();
    assert!(matches!(err, KvError::QuotaExceeded { bytes: 10, .. }));
    assert!(kv.load("big").await.unwrap().is_none());
}

#[tokio::test]
async fn dedup_cache_round_trips_through_sqlite() {
    let pool = setup_db().await;
    let kv: Arc<dyn KvStore> = Arc::new(SqlxKvStore::new(pool));

    let cache = DedupCache::new(DedupConfig::default(), kv.clone());
    cache.record("BTCUSDT", Direction::Long, T0);
    cache.record("ETH/USDT", Direction::Short, T0 + HOUR_MS);
    assert!(cache.persist().await);

    let restored = DedupCache::new(DedupConfig::default(), kv);
    assert_eq!(restored.load(T0 + 2 * HOUR_MS).await, 2);
    assert!(restored.is_duplicate("BTC-USDT", Direction::Long, T0 + 2 * HOUR_MS));
    assert!(restored.is_duplicate("ETHUSDT", Direction::Short, T0 + 2 * HOUR_MS));
    assert!(!restored.is_duplicate("ETHUSDT", Direction::Long, T0 + 2 * HOUR_MS));
}

#[tokio::test]
async fn signal_log_insert_is_idempotent() {
    let log = SqlxSignalLog::new(setup_db().await);
    let d = distributed("BTCUSDT", "PRO");

    assert!(log.record_published(&d).await.unwrap());
    assert!(!log.record_published(&d).await.unwrap());

    log.record_published(&distributed("ETHUSDT", "PRO")).await.unwrap();
    log.record_published(&distributed("SOLUSDT", "MAX")).await.unwrap();

    assert_eq!(log.count_for_tier("PRO").await.unwrap(), 2);
    assert_eq!(log.count_for_tier("MAX").await.unwrap(), 1);
    assert_eq!(log.count_for_tier("FREE").await.unwrap(), 0);
}

#[tokio::test]
async fn first_outcome_wins() {
    let log = SqlxSignalLog::new(setup_db().await);
    let d = distributed("BTCUSDT", "FREE");
    let id = d.signal.id();

    log.record_published(&d).await.unwrap();
    assert!(log.fetch_outcome(&id).await.unwrap().is_none());

    assert!(log.record_outcome(&closed(&d, SignalOutcome::Win, 110.0)).await.unwrap());
    assert!(!log.record_outcome(&closed(&d, SignalOutcome::Loss, 95.0)).await.unwrap());

    let got = log.fetch_outcome(&id).await.unwrap().unwrap();
    assert_eq!(got.outcome, "WIN");
    assert_eq!(got.exit_price, 110.0);
    assert!((got.return_pct - 10.0).abs() < 1e-9);
    assert_eq!(got.closed_ms, T0 + HOUR_MS);
}

#[tokio::test]
async fn outcome_for_unknown_signal_updates_nothing() {
    let log = SqlxSignalLog::new(setup_db().await);
    let d = distributed("BTCUSDT", "FREE");

    assert!(!log.record_outcome(&closed(&d, SignalOutcome::Timeout, 100.0)).await.unwrap());
    assert!(log.fetch_outcome(&d.signal.id()).await.unwrap().is_none());
}
