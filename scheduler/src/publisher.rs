use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::types::DistributedSignal;

/// Publish interface registered once by the surrounding application.
///
/// Implementations own durable storage and downstream notification. An
/// `Err` is logged by the orchestrator; the tier's quota slot stays spent.
#[async_trait]
pub trait SignalPublisher: Send + Sync {
    async fn publish(&self, signal: &DistributedSignal) -> anyhow::Result<()>;
}

/// Forwards distributed signals into a channel for an async consumer.
///
/// Backpressure: a full channel makes the publish await, which holds the
/// distribution pass open.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: Sender<DistributedSignal>,
}

impl ChannelPublisher {
    pub fn new(tx: Sender<DistributedSignal>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SignalPublisher for ChannelPublisher {
    async fn publish(&self, signal: &DistributedSignal) -> anyhow::Result<()> {
        self.tx
            .send(signal.clone())
            .await
            .map_err(|_| anyhow::anyhow!("publish channel closed"))
    }
}
