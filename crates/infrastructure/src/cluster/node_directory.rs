use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{ClusterNodeRepository, NodeDirectory};
use tracing::debug;

/// 固定节点列表，列表为空时只有本节点
#[derive(Debug, Clone)]
pub struct StaticNodeDirectory {
    local_node_id: i32,
    nodes: Vec<i32>,
}

impl StaticNodeDirectory {
    pub fn new(local_node_id: i32, nodes: Vec<i32>) -> Self {
        Self {
            local_node_id,
            nodes,
        }
    }

    pub fn single(local_node_id: i32) -> Self {
        Self::new(local_node_id, Vec::new())
    }
}

#[async_trait]
impl NodeDirectory for StaticNodeDirectory {
    fn local_node_id(&self) -> i32 {
        self.local_node_id
    }

    async fn live_node_ids(&self) -> MigrationResult<Vec<i32>> {
        if self.nodes.is_empty() {
            return Ok(vec![self.local_node_id]);
        }
        Ok(self.nodes.clone())
    }
}

/// 根据心跳表判断存活节点
pub struct DatabaseNodeDirectory {
    local_node_id: i32,
    repository: Arc<dyn ClusterNodeRepository>,
    node_timeout: Duration,
}

impl DatabaseNodeDirectory {
    pub fn new(
        local_node_id: i32,
        repository: Arc<dyn ClusterNodeRepository>,
        node_timeout: Duration,
    ) -> Self {
        Self {
            local_node_id,
            repository,
            node_timeout,
        }
    }
}

#[async_trait]
impl NodeDirectory for DatabaseNodeDirectory {
    fn local_node_id(&self) -> i32 {
        self.local_node_id
    }

    async fn live_node_ids(&self) -> MigrationResult<Vec<i32>> {
        let timeout = chrono::Duration::from_std(self.node_timeout)
            .map_err(|e| MigrationError::Configuration(format!("无效的节点超时时间: {e}")))?;
        let since = Utc::now() - timeout;

        let mut node_ids: Vec<i32> = self
            .repository
            .find_alive_nodes(since)
            .await?
            .into_iter()
            .map(|node| node.node_id)
            .collect();
        node_ids.sort_unstable();
        node_ids.dedup();

        debug!("存活节点: {:?}", node_ids);
        Ok(node_ids)
    }
}
