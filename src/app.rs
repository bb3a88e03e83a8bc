use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use migration_core::AppConfig;
use migration_dispatcher::{ClusterCopyScheduler, DatabaseMigrationService, ProgressMonitor};
use migration_domain::{
    ClusterEventBus, ClusterNodeRepository, CopyContext, CopyItem, CopyTaskRepository,
    DataRepository, MigrationContext, MigrationStatus, NodeDirectory, PerformanceProfiler,
};
use migration_infrastructure::{
    create_event_bus, DatabaseManager, DatabaseNodeDirectory, DefaultPerformanceProfiler,
    SqlDataRepository, StaticNodeDirectory,
};
use migration_worker::{CopyWorker, HeartbeatManager};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 主应用程序，持有一个节点的全部组件
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    task_repository: Arc<dyn CopyTaskRepository>,
    node_repository: Arc<dyn ClusterNodeRepository>,
    event_bus: Arc<dyn ClusterEventBus>,
    migration_context: Arc<MigrationContext>,
    profiler: Arc<dyn PerformanceProfiler>,
    monitor: ProgressMonitor,
    service: DatabaseMigrationService,
}

impl Application {
    /// 连接源库、目标库和协调库，组装调度、监控和工作进程
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化节点 {}", config.cluster.node_id);

        let database = DatabaseManager::new(config.coordination_database())
            .await
            .context("连接协调数据库失败")?;
        let task_repository = database.copy_task_repository();
        task_repository
            .ensure_schema()
            .await
            .context("创建协调表失败")?;
        let node_repository = database.cluster_node_repository();

        let type_system_name = config.migration.type_system_name.as_str();
        let source: Arc<dyn DataRepository> = Arc::new(
            SqlDataRepository::connect(&config.source, type_system_name)
                .await
                .context("连接源数据库失败")?,
        );
        let target: Arc<dyn DataRepository> = Arc::new(
            SqlDataRepository::connect(&config.target, type_system_name)
                .await
                .context("连接目标数据库失败")?,
        );

        let node_directory: Arc<dyn NodeDirectory> = match config.cluster.directory.as_str() {
            "database" => Arc::new(DatabaseNodeDirectory::new(
                config.cluster.node_id,
                Arc::clone(&node_repository),
                Duration::from_secs(config.cluster.node_timeout_seconds),
            )),
            _ => Arc::new(StaticNodeDirectory::new(
                config.cluster.node_id,
                config.cluster.nodes.clone(),
            )),
        };

        let event_bus = create_event_bus(&config.events)
            .await
            .context("创建集群通知失败")?;

        let migration_context = Arc::new(MigrationContext::new(
            config.migration.clone(),
            source,
            target,
            node_directory,
        ));
        let profiler: Arc<dyn PerformanceProfiler> = Arc::new(DefaultPerformanceProfiler::new());

        let monitor = ProgressMonitor::new(
            Arc::clone(&task_repository),
            Arc::clone(&event_bus),
            Duration::from_secs(config.monitor.poll_interval_seconds),
        );
        let scheduler = Arc::new(ClusterCopyScheduler::new(
            Arc::clone(&task_repository),
            Arc::clone(&event_bus),
            monitor.clone(),
        ));
        let service = DatabaseMigrationService::new(
            Arc::clone(&migration_context),
            scheduler,
            Arc::clone(&profiler),
        );

        Ok(Self {
            config,
            database,
            task_repository,
            node_repository,
            event_bus,
            migration_context,
            profiler,
            monitor,
            service,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn service(&self) -> &DatabaseMigrationService {
        &self.service
    }

    pub fn migration_context(&self) -> &Arc<MigrationContext> {
        &self.migration_context
    }

    pub fn worker(&self) -> CopyWorker {
        CopyWorker::new(
            Arc::clone(&self.migration_context),
            Arc::clone(&self.task_repository),
            Arc::clone(&self.event_bus),
            Arc::clone(&self.profiler),
            Duration::from_secs(self.config.worker.poll_interval_seconds),
        )
    }

    /// 使用数据库节点目录时先写入一次心跳，再启动后台心跳任务
    pub async fn start_heartbeat(
        &self,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Option<JoinHandle<()>>> {
        if self.config.cluster.directory != "database" {
            return Ok(None);
        }

        let heartbeat = Arc::new(HeartbeatManager::new(
            self.config.cluster.node_id,
            Arc::clone(&self.node_repository),
            Duration::from_secs(self.config.cluster.heartbeat_interval_seconds),
        ));
        heartbeat
            .send_heartbeat()
            .await
            .context("注册集群节点失败")?;
        Ok(Some(heartbeat.start(shutdown_rx)))
    }

    pub async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.worker()
            .run(shutdown_rx)
            .await
            .context("复制工作进程运行失败")
    }

    /// 节点模式：心跳和复制工作进程，直到收到关闭信号
    pub async fn run_node(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let heartbeat = self.start_heartbeat(shutdown_rx.resubscribe()).await?;

        let result = self.run_worker(shutdown_rx).await;
        self.monitor.stop().await;

        if let Some(handle) = heartbeat {
            if let Err(e) = handle.await {
                warn!("心跳任务异常退出: {}", e);
            }
        }
        result
    }

    /// 从本节点发起迁移；没有指定表时复制两边都存在的所有表
    pub async fn start_migration(
        &self,
        migration_id: Option<String>,
        tables: &[String],
    ) -> Result<CopyContext> {
        let items = if tables.is_empty() {
            self.service.discover_copy_items().await?
        } else {
            tables
                .iter()
                .map(|table| CopyItem::new(table.clone(), table.clone()))
                .collect()
        };

        let migration_id = migration_id.unwrap_or_else(DatabaseMigrationService::new_migration_id);
        let context = self
            .service
            .start_migration_with_items(&migration_id, items)
            .await
            .with_context(|| format!("启动迁移 {migration_id} 失败"))?;
        Ok(context)
    }

    /// 等待迁移结束，并立即完成一次监控轮询以写入结束状态
    pub async fn wait_for_finish(&self, context: &CopyContext) -> Result<MigrationStatus> {
        let poll_interval = Duration::from_secs(self.config.monitor.poll_interval_seconds);
        let result = self.service.wait_for_finish(context, poll_interval).await;
        self.monitor.poll_once().await;

        for throughput in context.profiler().snapshot() {
            info!(
                "{}: {} 行，{} 批，{:.1} 行/秒",
                throughput.pipeline_name,
                throughput.rows,
                throughput.batches,
                throughput.rows_per_second()
            );
        }

        Ok(result?)
    }

    pub async fn stop_migration(&self, migration_id: &str) -> Result<()> {
        let context = self.service.context_for(migration_id);
        self.service
            .stop_migration(&context)
            .await
            .with_context(|| format!("中止迁移 {migration_id} 失败"))
    }

    pub async fn migration_status(
        &self,
        migration_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<MigrationStatus> {
        let context = self.service.context_for(migration_id);
        let status = self.service.get_migration_state(&context, since).await?;
        Ok(status)
    }

    pub async fn close(&self) {
        self.monitor.stop().await;
        self.database.close().await;
        info!("节点 {} 已关闭", self.config.cluster.node_id);
    }
}
