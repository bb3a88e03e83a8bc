use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use migration_domain::{
    CopyContext, CopyItem, MigrationContext, MigrationError, MigrationResult, MigrationStatus,
    PerformanceProfiler,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::scheduler::DatabaseCopyScheduler;

/// 迁移服务入口：发现需要复制的表、启动、停止、查询和等待迁移
pub struct DatabaseMigrationService {
    migration_context: Arc<MigrationContext>,
    scheduler: Arc<dyn DatabaseCopyScheduler>,
    profiler: Arc<dyn PerformanceProfiler>,
}

impl DatabaseMigrationService {
    pub fn new(
        migration_context: Arc<MigrationContext>,
        scheduler: Arc<dyn DatabaseCopyScheduler>,
        profiler: Arc<dyn PerformanceProfiler>,
    ) -> Self {
        Self {
            migration_context,
            scheduler,
            profiler,
        }
    }

    pub fn new_migration_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn migration_context(&self) -> &Arc<MigrationContext> {
        &self.migration_context
    }

    /// 已有迁移的上下文，用于停止或查询
    pub fn context_for(&self, migration_id: &str) -> CopyContext {
        CopyContext::new(
            migration_id,
            Arc::clone(&self.migration_context),
            Vec::new(),
            Arc::clone(&self.profiler),
        )
    }

    /// 源库和目标库都存在的表（大小写不敏感），再按配置过滤
    pub async fn discover_copy_items(&self) -> MigrationResult<Vec<CopyItem>> {
        let config = &self.migration_context.config;
        let source_tables = self.migration_context.source.get_all_table_names().await?;
        let target_tables: HashMap<String, String> = self
            .migration_context
            .target
            .get_all_table_names()
            .await?
            .into_iter()
            .map(|name| (name.to_lowercase(), name))
            .collect();

        let items: Vec<CopyItem> = source_tables
            .into_iter()
            .filter(|table| config.accepts_table(table))
            .filter_map(|table| {
                let target = target_tables.get(&table.to_lowercase());
                if target.is_none() {
                    debug!("目标库中不存在表 {}，跳过", table);
                }
                target.map(|target| CopyItem::new(table.clone(), target.clone()))
            })
            .collect();

        info!("发现 {} 张需要复制的表", items.len());
        Ok(items)
    }

    /// 自动发现复制项并启动一次新的迁移
    pub async fn start_migration(&self) -> MigrationResult<CopyContext> {
        let items = self.discover_copy_items().await?;
        self.start_migration_with_items(&Self::new_migration_id(), items)
            .await
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn start_migration_with_items(
        &self,
        migration_id: &str,
        items: Vec<CopyItem>,
    ) -> MigrationResult<CopyContext> {
        let context = CopyContext::new(
            migration_id,
            Arc::clone(&self.migration_context),
            items,
            Arc::clone(&self.profiler),
        );

        self.scheduler.schedule(&context).await?;
        info!(
            "迁移 {} 已启动，共 {} 张表",
            migration_id,
            context.copy_items().len()
        );
        Ok(context)
    }

    pub async fn stop_migration(&self, context: &CopyContext) -> MigrationResult<()> {
        self.scheduler.abort(context).await
    }

    pub async fn get_migration_state(
        &self,
        context: &CopyContext,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<MigrationStatus> {
        self.scheduler.get_current_state(context, since).await
    }

    /// 等待迁移进入终态；失败或被中止时返回错误
    pub async fn wait_for_finish(
        &self,
        context: &CopyContext,
        poll_interval: Duration,
    ) -> MigrationResult<MigrationStatus> {
        loop {
            let status = self.scheduler.get_current_state(context, None).await?;
            if status.is_completed() {
                if status.is_failed() || status.is_aborted() {
                    return Err(MigrationError::MigrationFailed {
                        migration_id: status.migration_id,
                        status: status.status.to_string(),
                    });
                }
                return Ok(status);
            }

            debug!(
                "等待迁移 {} 结束: {}/{}",
                status.migration_id,
                status.finished_tasks(),
                status.total_tasks
            );
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ProgressMonitor;
    use crate::scheduler::ClusterCopyScheduler;
    use migration_domain::{CopyTaskRepository, MigrationProgress};
    use migration_infrastructure::database::sqlite::SqliteCopyTaskRepository;
    use migration_infrastructure::DefaultPerformanceProfiler;
    use migration_testing_utils::{
        sqlite_url, MigrationConfigBuilder, MockDataRepository, MockNodeDirectory,
        RecordingEventBus,
    };
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: Arc<SqliteCopyTaskRepository>,
        service: DatabaseMigrationService,
        monitor: ProgressMonitor,
    }

    async fn fixture(include_tables: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlx::SqlitePool::connect(&sqlite_url(dir.path(), "coordination.db"))
            .await
            .unwrap();
        let repo = Arc::new(SqliteCopyTaskRepository::new(pool));
        let bus = Arc::new(RecordingEventBus::new());
        let monitor = ProgressMonitor::new(repo.clone(), bus.clone(), Duration::from_secs(3600));
        let scheduler = Arc::new(ClusterCopyScheduler::new(
            repo.clone(),
            bus,
            monitor.clone(),
        ));

        let source = MockDataRepository::new()
            .with_row_count("Orders", 3)
            .with_row_count("users", 2)
            .with_row_count("audit_log", 7);
        let target = MockDataRepository::new()
            .with_row_count("orders", 0)
            .with_row_count("USERS", 0);

        let config = MigrationConfigBuilder::new()
            .include_tables(include_tables)
            .build();
        let migration_context = Arc::new(MigrationContext::new(
            config,
            Arc::new(source),
            Arc::new(target),
            Arc::new(MockNodeDirectory::new(1, vec![1])),
        ));
        let service = DatabaseMigrationService::new(
            migration_context,
            scheduler,
            Arc::new(DefaultPerformanceProfiler::new()),
        );

        Fixture {
            _dir: dir,
            repo,
            service,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_discovers_tables_present_on_both_sides() {
        let f = fixture(&[]).await;

        let mut items = f.service.discover_copy_items().await.unwrap();
        items.sort_by(|a, b| a.source_table.cmp(&b.source_table));

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_table, "Orders");
        assert_eq!(items[0].target_table, "orders");
        assert_eq!(items[1].target_table, "USERS");
    }

    #[tokio::test]
    async fn test_include_filter_limits_discovery() {
        let f = fixture(&["users"]).await;

        let items = f.service.discover_copy_items().await.unwrap();
        assert_eq!(items, vec![CopyItem::new("users", "USERS")]);
    }

    #[tokio::test]
    async fn test_start_and_wait_for_completion() {
        let f = fixture(&[]).await;
        let context = f.service.start_migration().await.unwrap();
        let migration_id = context.migration_id().to_string();

        let state = f.service.get_migration_state(&context, None).await.unwrap();
        assert_eq!(state.total_tasks, 2);
        assert!(!state.is_completed());

        for item in context.copy_items() {
            f.repo
                .mark_task_completed(&migration_id, &item.pipeline_name(), 1, 1)
                .await
                .unwrap();
        }

        let status = f
            .service
            .wait_for_finish(&context, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(status.status, MigrationProgress::Completed);
        f.monitor.stop().await;
    }

    #[tokio::test]
    async fn test_stopped_migration_reports_failure() {
        let f = fixture(&[]).await;
        let context = f
            .service
            .start_migration_with_items("m-stop", vec![CopyItem::new("users", "USERS")])
            .await
            .unwrap();

        let by_id = f.service.context_for("m-stop");
        f.service.stop_migration(&by_id).await.unwrap();

        let err = f
            .service
            .wait_for_finish(&context, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MigrationFailed { status, .. } if status == "ABORTED"
        ));
        f.monitor.stop().await;
    }
}
