use async_trait::async_trait;
use migration_core::MigrationResult;
use migration_domain::{ClusterEvent, ClusterEventBus};
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

/// 进程内通知，用于单节点部署和测试
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<ClusterEvent>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterEventBus for InMemoryEventBus {
    async fn publish(&self, event: &ClusterEvent) -> MigrationResult<()> {
        if self.sender.send(event.clone()).is_err() {
            debug!(
                "没有订阅者，丢弃通知 {} ({})",
                event.event_type(),
                event.migration_id()
            );
        }
        Ok(())
    }

    async fn subscribe(&self) -> MigrationResult<broadcast::Receiver<ClusterEvent>> {
        Ok(self.sender.subscribe())
    }
}
