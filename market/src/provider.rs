use async_trait::async_trait;
use parking_lot::RwLock;

use crate::types::MarketRegime;

/// Read-only source of the live market regime.
///
/// Implementations return the latest known label; classification from raw
/// market data happens on the other side of this trait.
#[async_trait]
pub trait MarketContextProvider: Send + Sync {
    async fn current_regime(&self) -> anyhow::Result<MarketRegime>;
}

/// Provider backed by a value set from outside (dev wiring, tests, or a
/// push-based feed that writes into it).
#[derive(Debug)]
pub struct StaticRegimeProvider {
    regime: RwLock<MarketRegime>,
}

impl StaticRegimeProvider {
    pub fn new(regime: MarketRegime) -> Self {
        Self {
            regime: RwLock::new(regime),
        }
    }

    pub fn set(&self, regime: MarketRegime) {
        let mut guard = self.regime.write();
        if *guard != regime {
            tracing::info!(from = %*guard, to = %regime, "market regime changed");
        }
        *guard = regime;
    }
}

#[async_trait]
impl MarketContextProvider for StaticRegimeProvider {
    async fn current_regime(&self) -> anyhow::Result<MarketRegime> {
        Ok(*self.regime.read())
    }
}
