use std::sync::Arc;
use std::time::Duration;

use migration_domain::{ClusterNodeRepository, MigrationResult};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

/// 定期把本节点写入心跳表，供基于数据库的节点目录发现
pub struct HeartbeatManager {
    node_id: i32,
    hostname: String,
    repository: Arc<dyn ClusterNodeRepository>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        node_id: i32,
        repository: Arc<dyn ClusterNodeRepository>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            node_id,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
            repository,
            heartbeat_interval,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub async fn send_heartbeat(&self) -> MigrationResult<()> {
        self.repository
            .heartbeat(self.node_id, &self.hostname)
            .await?;
        debug!("节点 {} 心跳已发送", self.node_id);
        Ok(())
    }

    /// 启动心跳任务，收到关闭信号后注销本节点
    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut ticker = interval(self.heartbeat_interval);

        tokio::spawn(async move {
            info!(
                "节点 {} ({}) 心跳任务已启动，间隔 {:?}",
                self.node_id, self.hostname, self.heartbeat_interval
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.send_heartbeat().await {
                            error!("发送心跳失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        if let Err(e) = self.repository.unregister(self.node_id).await {
                            error!("注销节点 {} 失败: {}", self.node_id, e);
                        }
                        info!("心跳任务已停止");
                        break;
                    }
                }
            }
        })
    }
}
