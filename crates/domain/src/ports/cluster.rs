use async_trait::async_trait;
use migration_core::MigrationResult;
use tokio::sync::broadcast;

use crate::events::ClusterEvent;

/// Cluster membership lookup
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    fn local_node_id(&self) -> i32;

    /// 当前存活的节点，不保证包含本节点
    async fn live_node_ids(&self) -> MigrationResult<Vec<i32>>;
}

/// Best-effort broadcast to every node in the cluster
#[async_trait]
pub trait ClusterEventBus: Send + Sync {
    async fn publish(&self, event: &ClusterEvent) -> MigrationResult<()>;
    async fn subscribe(&self) -> MigrationResult<broadcast::Receiver<ClusterEvent>>;
}
