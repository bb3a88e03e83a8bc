use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_domain::{
    ClusterEvent, ClusterEventBus, CopyContext, CopyItem, CopyTask, CopyTaskRepository,
    MigrationError, MigrationProgress, MigrationResult, MigrationStatus, ABORTED_ERROR,
};
use tracing::{debug, info, instrument, warn};

use crate::monitor::ProgressMonitor;
use crate::strategies::plan_assignments;

/// 复制任务调度接口
#[async_trait]
pub trait DatabaseCopyScheduler: Send + Sync {
    /// 为上下文中的所有复制项创建任务并通知集群
    async fn schedule(&self, context: &CopyContext) -> MigrationResult<()>;

    /// 当前迁移状态；`since` 不为空时附带该时间之后更新过的任务
    async fn get_current_state(
        &self,
        context: &CopyContext,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<MigrationStatus>;

    async fn is_aborted(&self, context: &CopyContext) -> MigrationResult<bool>;

    /// 协作式中止，正在执行的批次结束后各节点才会停止
    async fn abort(&self, context: &CopyContext) -> MigrationResult<()>;
}

/// 基于协调表的集群调度器
pub struct ClusterCopyScheduler {
    task_repository: Arc<dyn CopyTaskRepository>,
    event_bus: Arc<dyn ClusterEventBus>,
    monitor: ProgressMonitor,
}

impl ClusterCopyScheduler {
    pub fn new(
        task_repository: Arc<dyn CopyTaskRepository>,
        event_bus: Arc<dyn ClusterEventBus>,
        monitor: ProgressMonitor,
    ) -> Self {
        Self {
            task_repository,
            event_bus,
            monitor,
        }
    }

    pub fn monitor(&self) -> &ProgressMonitor {
        &self.monitor
    }

    /// 参与本次迁移的节点，出错或为空时只使用本节点
    async fn resolve_node_ids(&self, context: &CopyContext) -> Vec<i32> {
        let migration_context = context.migration_context();
        let local_node_id = migration_context.local_node_id();

        if !context.config().cluster_mode {
            return vec![local_node_id];
        }

        match migration_context.node_directory.live_node_ids().await {
            Ok(node_ids) if !node_ids.is_empty() => {
                debug!("集群存活节点: {:?}", node_ids);
                node_ids
            }
            Ok(_) => {
                warn!("集群中没有存活节点，所有任务分配给本节点 {}", local_node_id);
                vec![local_node_id]
            }
            Err(e) => {
                warn!("获取集群节点失败，所有任务分配给本节点 {}: {}", local_node_id, e);
                vec![local_node_id]
            }
        }
    }

    /// 统计源表当前行数，增量模式下只统计修改过的行
    async fn count_source_rows(&self, context: &CopyContext) -> MigrationResult<Vec<CopyItem>> {
        let source = &context.migration_context().source;
        let since = context.config().incremental_since;

        let mut items = Vec::with_capacity(context.copy_items().len());
        for item in context.copy_items() {
            let mut item = item.clone();
            item.source_row_count = match since {
                Some(since) => {
                    source
                        .get_row_count_modified_after(&item.source_table, since)
                        .await?
                }
                None => source.get_row_count(&item.source_table).await?,
            };
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl DatabaseCopyScheduler for ClusterCopyScheduler {
    #[instrument(skip_all, fields(migration_id = %context.migration_id()))]
    async fn schedule(&self, context: &CopyContext) -> MigrationResult<()> {
        if context.copy_items().is_empty() {
            return Err(MigrationError::Configuration(format!(
                "迁移 {} 没有需要复制的表",
                context.migration_id()
            )));
        }

        let migration_id = context.migration_id();
        let local_node_id = context.migration_context().local_node_id();

        self.task_repository.ensure_schema().await?;
        if !self
            .task_repository
            .create_migration_status(migration_id)
            .await?
        {
            info!("迁移 {} 已存在，已有任务保持不变", migration_id);
        }

        let node_ids = self.resolve_node_ids(context).await;
        let items = self.count_source_rows(context).await?;

        let mut scheduled = 0usize;
        for assignment in plan_assignments(items, &node_ids, local_node_id) {
            let task = CopyTask::pending(migration_id, &assignment.item, assignment.node_id);
            let inserted = self.task_repository.schedule_task(&task).await?;
            if !inserted {
                debug!("任务 {} 已存在，跳过", task.pipeline_name);
                continue;
            }
            scheduled += 1;

            if task.source_row_count == 0 {
                self.task_repository
                    .mark_task_completed(migration_id, &task.pipeline_name, 0, 0)
                    .await?;
                debug!("{} 没有数据，直接标记完成", task.pipeline_name);
            }
        }

        info!(
            "迁移 {} 已调度 {} 个复制任务到 {} 个节点",
            migration_id,
            scheduled,
            node_ids.len()
        );

        self.monitor
            .watch(
                migration_id,
                local_node_id,
                Duration::from_secs(context.config().stalled_timeout_seconds),
            )
            .await;

        let event = ClusterEvent::copy_requested(local_node_id, migration_id);
        if let Err(e) = self.event_bus.publish(&event).await {
            warn!("发布复制请求通知失败，其他节点将通过轮询发现任务: {}", e);
        }

        Ok(())
    }

    async fn get_current_state(
        &self,
        context: &CopyContext,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<MigrationStatus> {
        let mut status = self
            .task_repository
            .get_migration_status(context.migration_id())
            .await?;

        if let Some(since) = since {
            status.status_updates = self
                .task_repository
                .get_updated_tasks(context.migration_id(), since)
                .await?;
        }

        Ok(status)
    }

    async fn is_aborted(&self, context: &CopyContext) -> MigrationResult<bool> {
        let progress = self
            .task_repository
            .get_migration_progress(context.migration_id())
            .await?;
        Ok(progress == Some(MigrationProgress::Aborted))
    }

    #[instrument(skip_all, fields(migration_id = %context.migration_id()))]
    async fn abort(&self, context: &CopyContext) -> MigrationResult<()> {
        let updated = self
            .task_repository
            .set_migration_status(context.migration_id(), MigrationProgress::Aborted)
            .await?;
        context.profiler().reset();

        if !updated && !self.is_aborted(context).await? {
            warn!("迁移 {} 已经结束，中止请求被忽略", context.migration_id());
            return Ok(());
        }

        let failed = self
            .task_repository
            .fail_pending_tasks(context.migration_id(), ABORTED_ERROR)
            .await?;
        info!(
            "迁移 {} 已标记为中止，{} 个未开始的任务置为失败",
            context.migration_id(),
            failed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_domain::{CopyTaskStatus, DataRepository, NodeDirectory};
    use migration_infrastructure::database::sqlite::SqliteCopyTaskRepository;
    use migration_testing_utils::{
        copy_context, sqlite_url, MigrationConfigBuilder, MockDataRepository, MockNodeDirectory,
        RecordingEventBus,
    };
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: Arc<SqliteCopyTaskRepository>,
        bus: Arc<RecordingEventBus>,
        scheduler: ClusterCopyScheduler,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlx::SqlitePool::connect(&sqlite_url(dir.path(), "coordination.db"))
            .await
            .unwrap();
        let repo = Arc::new(SqliteCopyTaskRepository::new(pool));
        let bus = Arc::new(RecordingEventBus::new());
        let monitor = ProgressMonitor::new(repo.clone(), bus.clone(), Duration::from_secs(3600));
        let scheduler = ClusterCopyScheduler::new(repo.clone(), bus.clone(), monitor);
        Fixture {
            _dir: dir,
            repo,
            bus,
            scheduler,
        }
    }

    fn source() -> Arc<MockDataRepository> {
        Arc::new(
            MockDataRepository::new()
                .with_row_count("orders", 300)
                .with_row_count("users", 20)
                .with_row_count("empty", 0)
                .with_row_count("products", 4000),
        )
    }

    fn items(tables: &[&str]) -> Vec<CopyItem> {
        tables.iter().map(|t| CopyItem::new(*t, *t)).collect()
    }

    fn context_with(
        migration_id: &str,
        cluster_mode: bool,
        source: Arc<MockDataRepository>,
        directory: Arc<dyn NodeDirectory>,
        tables: &[&str],
    ) -> CopyContext {
        let config = MigrationConfigBuilder::new().cluster_mode(cluster_mode).build();
        copy_context(
            migration_id,
            config,
            source,
            Arc::new(MockDataRepository::new()),
            directory,
            items(tables),
        )
    }

    async fn tasks_by_pipeline(
        repo: &SqliteCopyTaskRepository,
        migration_id: &str,
    ) -> HashMap<String, CopyTask> {
        repo.get_updated_tasks(migration_id, DateTime::<Utc>::UNIX_EPOCH)
            .await
            .unwrap()
            .into_iter()
            .map(|t| (t.pipeline_name.clone(), t))
            .collect()
    }

    #[tokio::test]
    async fn test_schedule_distributes_across_nodes() {
        let f = fixture().await;
        let directory = Arc::new(MockNodeDirectory::new(1, vec![1, 2]));
        let context = context_with(
            "m-1",
            true,
            source(),
            directory,
            &["orders", "users", "empty", "products"],
        );

        f.scheduler.schedule(&context).await.unwrap();

        let tasks = tasks_by_pipeline(&f.repo, "m-1").await;
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks["users->users"].target_node_id, 1);
        assert_eq!(tasks["orders->orders"].target_node_id, 2);
        assert_eq!(tasks["products->products"].target_node_id, 1);
        assert_eq!(tasks["orders->orders"].source_row_count, 300);

        let empty = &tasks["empty->empty"];
        assert_eq!(empty.target_node_id, 1);
        assert_eq!(empty.status, CopyTaskStatus::Completed);
        assert_eq!(empty.target_row_count, 0);

        assert_eq!(
            f.bus.published(),
            vec![ClusterEvent::copy_requested(1, "m-1")]
        );
        assert_eq!(f.scheduler.monitor().watched_migrations().await, vec!["m-1"]);

        let state = f.scheduler.get_current_state(&context, None).await.unwrap();
        assert_eq!(state.total_tasks, 4);
        assert_eq!(state.completed_tasks, 1);
        assert!(state.status_updates.is_empty());
        f.scheduler.monitor().stop().await;
    }

    #[tokio::test]
    async fn test_schedule_without_cluster_mode_uses_local_node() {
        let f = fixture().await;
        let directory = Arc::new(MockNodeDirectory::new(5, vec![1, 2, 3]));
        let context = context_with("m-2", false, source(), directory, &["orders", "users"]);

        f.scheduler.schedule(&context).await.unwrap();

        let tasks = tasks_by_pipeline(&f.repo, "m-2").await;
        assert!(tasks.values().all(|t| t.target_node_id == 5));
        f.scheduler.monitor().stop().await;
    }

    #[tokio::test]
    async fn test_directory_failure_falls_back_to_local() {
        let f = fixture().await;
        let directory = Arc::new(MockNodeDirectory::new(3, vec![1, 2]));
        directory.set_failing(true);
        let context = context_with("m-3", true, source(), directory, &["orders", "users"]);

        f.scheduler.schedule(&context).await.unwrap();

        let tasks = tasks_by_pipeline(&f.repo, "m-3").await;
        assert!(tasks.values().all(|t| t.target_node_id == 3));
        f.scheduler.monitor().stop().await;
    }

    #[tokio::test]
    async fn test_reschedule_keeps_existing_tasks() {
        let f = fixture().await;
        let directory = Arc::new(MockNodeDirectory::new(1, vec![1, 2]));
        let context = context_with(
            "m-4",
            true,
            source(),
            directory.clone(),
            &["orders", "users"],
        );
        f.scheduler.schedule(&context).await.unwrap();
        let before = tasks_by_pipeline(&f.repo, "m-4").await;

        directory.set_nodes(vec![9]);
        f.scheduler.schedule(&context).await.unwrap();
        let after = tasks_by_pipeline(&f.repo, "m-4").await;

        assert_eq!(after.len(), 2);
        for (pipeline, task) in &before {
            assert_eq!(after[pipeline].target_node_id, task.target_node_id);
        }
        f.scheduler.monitor().stop().await;
    }

    #[tokio::test]
    async fn test_incremental_schedule_counts_modified_rows() {
        let f = fixture().await;
        let since = Utc::now();
        let source = source();
        let config = MigrationConfigBuilder::new().incremental_since(since).build();
        let context = copy_context(
            "m-5",
            config,
            source.clone(),
            Arc::new(MockDataRepository::new()),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            items(&["orders"]),
        );

        f.scheduler.schedule(&context).await.unwrap();

        let tasks = tasks_by_pipeline(&f.repo, "m-5").await;
        let expected = source
            .get_row_count_modified_after("orders", since)
            .await
            .unwrap();
        assert_eq!(tasks["orders->orders"].source_row_count, expected);
        f.scheduler.monitor().stop().await;
    }

    #[tokio::test]
    async fn test_empty_schedule_is_rejected() {
        let f = fixture().await;
        let context = context_with(
            "m-6",
            false,
            source(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            &[],
        );

        let err = f.scheduler.schedule(&context).await.unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
        assert!(f.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_row_count_errors_propagate() {
        let f = fixture().await;
        let source = source();
        source.fail_table("orders");
        let context = context_with(
            "m-7",
            false,
            source,
            Arc::new(MockNodeDirectory::new(1, vec![])),
            &["orders"],
        );

        assert!(f.scheduler.schedule(&context).await.is_err());
        assert!(f.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_abort_marks_migration_and_resets_profiler() {
        let f = fixture().await;
        let context = context_with(
            "m-8",
            false,
            source(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            &["orders"],
        );
        f.scheduler.schedule(&context).await.unwrap();
        context
            .profiler()
            .record_batch("orders->orders", 10, Duration::from_millis(5));

        assert!(!f.scheduler.is_aborted(&context).await.unwrap());
        f.scheduler.abort(&context).await.unwrap();

        assert!(f.scheduler.is_aborted(&context).await.unwrap());
        assert!(context.profiler().snapshot().is_empty());

        let state = f
            .scheduler
            .get_current_state(&context, Some(DateTime::<Utc>::UNIX_EPOCH))
            .await
            .unwrap();
        assert!(state.is_aborted());
        assert_eq!(state.status_updates.len(), 1);
        assert_eq!(state.status_updates[0].status, CopyTaskStatus::Failed);
        assert_eq!(state.status_updates[0].error.as_deref(), Some(ABORTED_ERROR));
        assert!(state.is_completed());
        f.scheduler.monitor().stop().await;
    }

    #[tokio::test]
    async fn test_abort_leaves_running_tasks_to_workers() {
        let f = fixture().await;
        let context = context_with(
            "m-9",
            false,
            source(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            &["orders", "users"],
        );
        f.scheduler.schedule(&context).await.unwrap();
        assert!(f.repo.claim_task("m-9", "orders->orders", 1).await.unwrap());

        f.scheduler.abort(&context).await.unwrap();

        let tasks = tasks_by_pipeline(&f.repo, "m-9").await;
        assert_eq!(tasks["orders->orders"].status, CopyTaskStatus::Running);
        assert_eq!(tasks["users->users"].status, CopyTaskStatus::Failed);
        assert_eq!(tasks["users->users"].error.as_deref(), Some(ABORTED_ERROR));

        let state = f.scheduler.get_current_state(&context, None).await.unwrap();
        assert!(state.is_aborted());
        assert!(!state.is_completed());

        f.repo
            .mark_task_failed("m-9", "orders->orders", ABORTED_ERROR, 7)
            .await
            .unwrap();
        let state = f.scheduler.get_current_state(&context, None).await.unwrap();
        assert!(state.is_completed());
        assert_eq!(state.failed_tasks, 2);

        f.scheduler.abort(&context).await.unwrap();
        f.scheduler.monitor().stop().await;
    }
}
