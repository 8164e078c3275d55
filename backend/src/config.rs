use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clap::Parser;
use common::validation::{ValidationError, check_score};
use lifecycle::tracker::LifecycleConfig;
use scheduler::types::SchedulerConfig;
use serde::{Deserialize, Serialize};
use signals::dedup::DedupConfig;
use signals::quality::QualityConfig;
use signals::store::StoreConfig;
use tracing::warn;

use crate::error::ConfigError;

/// Process-level settings. Read once at startup.
#[derive(Parser, Clone, Debug)]
#[command(name = "signal-distributor", about = "Tiered trading-signal distribution service")]
pub struct AppConfig {
    /// Database connection string (durable KV store and signal log).
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://signals_dev.db?mode=rwc")]
    pub database_url: String,

    /// JSON distribution document. Defaults apply when unset or missing.
    #[arg(long, env = "SIGNAL_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// `production` switches logging to JSON.
    #[arg(long, env = "APP_ENV", default_value = "development")]
    pub app_env: String,

    /// How often the distribution document is re-read.
    #[arg(long, env = "CONFIG_RELOAD_INTERVAL_MS", default_value_t = 30_000)]
    pub reload_interval_ms: u64,

    /// Capacity of the channel between the publisher and the notifier.
    ///
    /// Acts as backpressure: a slow notifier holds the distribution pass
    /// open, and overlapping ticks are skipped.
    #[arg(long, env = "PUBLISH_QUEUE_CAPACITY", default_value_t = 256)]
    pub publish_queue_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::parse()
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

/// Everything that shapes distribution. Hot-reloadable; every field has a
/// default so a partial document is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    pub quality: QualityConfig,
    pub store: StoreConfig,
    pub dedup: DedupConfig,
    pub scheduler: SchedulerConfig,
    pub lifecycle: LifecycleConfig,
}

impl DistributionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quality.validate()?;
        self.scheduler.validate()?;

        if self.store.capacity == 0 {
            return Err(ValidationError::NotPositive { field: "store capacity" }.into());
        }
        check_score("global quality floor", self.store.min_quality)?;
        if self.dedup.window_ms == 0 {
            return Err(ValidationError::NotPositive { field: "dedup window_ms" }.into());
        }
        if self.lifecycle.signal_ttl_ms == 0 {
            return Err(ValidationError::NotPositive { field: "signal_ttl_ms" }.into());
        }
        Ok(())
    }

    /// Lowest tier bar among enabled tiers, if any tier is enabled.
    pub fn lowest_tier_minimum(&self) -> Option<f64> {
        self.scheduler
            .tiers
            .iter()
            .filter(|t| t.daily_cap > 0)
            .map(|t| t.min_quality)
            .min_by(f64::total_cmp)
    }
}

pub fn parse_distribution_config(text: &str) -> Result<DistributionConfig, ConfigError> {
    let cfg: DistributionConfig = serde_json::from_str(text)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Reads the document at `path`, which must exist and be valid.
pub fn read_distribution_config(path: &Path) -> Result<DistributionConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_distribution_config(&text)
}

/// Startup load. A missing file falls back to defaults; an unreadable or
/// invalid one is an error the caller treats as fatal.
pub fn load_distribution_config(path: Option<&Path>) -> Result<DistributionConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(DistributionConfig::default());
    };

    match read_distribution_config(path) {
        Err(ConfigError::Read { source, .. }) if source.kind() == ErrorKind::NotFound => {
            warn!(path = %path.display(), "distribution config not found; using defaults");
            Ok(DistributionConfig::default())
        }
        other => other,
    }
}
