use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backend::{
    config::{AppConfig, load_distribution_config},
    db::{Db, kv_sqlx::SqlxKvStore, signal_log::SqlxSignalLog},
    reload::{ConfigHandle, spawn_config_reloader},
    service::{ServiceDeps, SignalService},
};
use common::logger::init_logger;
use common::time::SystemClock;
use lifecycle::price::LevelPriceTracker;
use market::provider::StaticRegimeProvider;
use market::types::MarketRegime;
use scheduler::publisher::{ChannelPublisher, SignalPublisher};
use scheduler::types::DistributedSignal;
use tokio::sync::{mpsc, watch};

/// Stores the signal durably, then queues it for subscriber notification.
struct AppPublisher {
    log: Arc<SqlxSignalLog>,
    notify: ChannelPublisher,
}

#[async_trait]
impl SignalPublisher for AppPublisher {
    async fn publish(&self, signal: &DistributedSignal) -> anyhow::Result<()> {
        self.log.publish(signal).await?;
        self.notify.publish(signal).await
    }
}

/// Drains the notification queue. Push delivery to subscribers plugs in here.
fn start_notifier(mut rx: mpsc::Receiver<DistributedSignal>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(s) = rx.recv().await {
            tracing::info!(
                tier = %s.tier,
                signal_id = %s.signal.id(),
                symbol = %s.signal.candidate.symbol,
                direction = %s.signal.candidate.direction,
                "notify subscribers"
            );
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let cfg = AppConfig::from_env();
    init_logger("signal-distributor", cfg.is_production());

    tracing::info!("Starting signal distributor...");

    // Fatal: without a valid document the tier quota structure is undefined.
    let distribution = load_distribution_config(cfg.config_path.as_deref())?;
    let config = ConfigHandle::new(distribution);

    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let signal_log = Arc::new(SqlxSignalLog::new(db.pool.clone()));
    let prices = Arc::new(LevelPriceTracker::new());

    let service = Arc::new(SignalService::new(
        config.clone(),
        ServiceDeps {
            clock: Arc::new(SystemClock),
            kv: Arc::new(SqlxKvStore::new(db.pool.clone())),
            regime_provider: Arc::new(StaticRegimeProvider::new(MarketRegime::Sideways)),
            prices,
            sink: signal_log.clone(),
        },
    ));
    service.restore().await;

    let (notify_tx, notify_rx) = mpsc::channel(cfg.publish_queue_capacity);
    let notifier = start_notifier(notify_rx);
    service.on_publish(Arc::new(AppPublisher {
        log: signal_log,
        notify: ChannelPublisher::new(notify_tx),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reloader = cfg.config_path.clone().map(|path| {
        spawn_config_reloader(
            config.clone(),
            path,
            Duration::from_millis(cfg.reload_interval_ms),
            shutdown_rx.clone(),
        )
    });

    let run_loop = tokio::spawn(service.clone().run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    service.shutdown();

    if let Err(e) = run_loop.await {
        tracing::error!(error = ?e, "distribution loop ended abnormally");
    }
    if let Some(r) = reloader {
        let _ = r.await;
    }

    tracing::info!(counters = ?service.counters().snapshot(), "final counters");

    // Dropping the service drops the last publish sender and ends the notifier.
    drop(service);
    let _ = notifier.await;

    Ok(())
}
