//! Hot reload of the distribution document.
//!
//! Readers take a cheap `Arc` snapshot; a reload swaps the whole snapshot at
//! once, so a tick never observes half of an update.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DistributionConfig, read_distribution_config};

#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<DistributionConfig>>>,
    version: Arc<AtomicU64>,
}

impl ConfigHandle {
    pub fn new(cfg: DistributionConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(cfg))),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current(&self) -> Arc<DistributionConfig> {
        self.current.read().clone()
    }

    /// Version and snapshot read together.
    pub fn snapshot(&self) -> (u64, Arc<DistributionConfig>) {
        let guard = self.current.read();
        (self.version.load(Ordering::Acquire), guard.clone())
    }

    /// Bumped on every applied change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Installs `cfg` if it differs from the live snapshot.
    pub fn replace(&self, cfg: DistributionConfig) -> bool {
        let mut guard = self.current.write();
        if **guard == cfg {
            return false;
        }
        *guard = Arc::new(cfg);
        self.version.fetch_add(1, Ordering::AcqRel);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Unchanged,
    Applied,
    /// Unreadable or invalid; last-known-good stays active.
    Rejected,
}

pub fn reload_once(handle: &ConfigHandle, path: &std::path::Path) -> ReloadOutcome {
    match read_distribution_config(path) {
        Ok(cfg) => {
            if handle.replace(cfg) {
                info!(path = %path.display(), version = handle.version(), "distribution config reloaded");
                ReloadOutcome::Applied
            } else {
                debug!("distribution config unchanged");
                ReloadOutcome::Unchanged
            }
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config reload rejected; keeping last known good");
            ReloadOutcome::Rejected
        }
    }
}

/// Re-reads `path` every `interval` until `shutdown` flips to true.
pub fn spawn_config_reloader(
    handle: ConfigHandle,
    path: PathBuf,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately; startup already loaded the file
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    reload_once(&handle, &path);
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        debug!("config reloader stopping");
                        break;
                    }
                }
            }
        }
    })
}
