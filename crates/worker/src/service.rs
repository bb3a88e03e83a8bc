use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use migration_domain::{
    ClusterEvent, ClusterEventBus, CopyContext, CopyTask, CopyTaskRepository, MigrationContext,
    MigrationResult, PerformanceProfiler,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::components::{failure_message, TableCopier};

/// 节点上的复制工作进程
///
/// 收到复制请求通知后处理分配给本节点的任务，同时定期轮询未结束的迁移，
/// 通知丢失时也能找到任务。
#[derive(Clone)]
pub struct CopyWorker {
    migration_context: Arc<MigrationContext>,
    task_repository: Arc<dyn CopyTaskRepository>,
    event_bus: Arc<dyn ClusterEventBus>,
    profiler: Arc<dyn PerformanceProfiler>,
    copier: TableCopier,
    poll_interval: Duration,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl CopyWorker {
    pub fn new(
        migration_context: Arc<MigrationContext>,
        task_repository: Arc<dyn CopyTaskRepository>,
        event_bus: Arc<dyn ClusterEventBus>,
        profiler: Arc<dyn PerformanceProfiler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            copier: TableCopier::new(Arc::clone(&task_repository)),
            migration_context,
            task_repository,
            event_bus,
            profiler,
            poll_interval,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn node_id(&self) -> i32 {
        self.migration_context.local_node_id()
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> MigrationResult<()> {
        let mut events = Some(self.event_bus.subscribe().await?);
        let mut ticker = interval(self.poll_interval);
        info!("节点 {} 的复制工作进程已启动", self.node_id());

        loop {
            tokio::select! {
                event = next_event(&mut events) => match event {
                    Ok(ClusterEvent::CopyRequested { origin_node_id, migration_id }) => {
                        debug!("收到节点 {} 的复制请求: {}", origin_node_id, migration_id);
                        self.spawn_migration(migration_id).await;
                    }
                    Ok(ClusterEvent::CopyComplete { migration_id, .. }) => {
                        debug!("迁移 {} 已结束", migration_id);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("丢失了 {} 条集群通知，等待下一次轮询", skipped);
                    }
                    Err(RecvError::Closed) => {
                        warn!("集群通知通道已关闭，只依靠轮询发现任务");
                        events = None;
                    }
                },
                _ = ticker.tick() => {
                    self.poll_active_migrations().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("复制工作进程收到关闭信号");
                    break;
                }
            }
        }

        Ok(())
    }

    /// 为所有未结束的迁移检查本节点的待处理任务
    pub async fn poll_active_migrations(&self) {
        match self.task_repository.find_active_migrations().await {
            Ok(migration_ids) => {
                for migration_id in migration_ids {
                    self.spawn_migration(migration_id).await;
                }
            }
            Err(e) => error!("查询未结束的迁移失败: {}", e),
        }
    }

    /// 同一迁移在本节点同时只处理一次
    pub async fn spawn_migration(&self, migration_id: String) -> Option<JoinHandle<()>> {
        if !self.in_flight.lock().await.insert(migration_id.clone()) {
            debug!("迁移 {} 正在处理中", migration_id);
            return None;
        }

        let worker = self.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = worker.process_migration(&migration_id).await {
                error!("处理迁移 {} 失败: {}", migration_id, e);
            }
            worker.in_flight.lock().await.remove(&migration_id);
        }))
    }

    /// 认领并复制本节点的待处理任务，返回成功复制的表数量
    pub async fn process_migration(&self, migration_id: &str) -> MigrationResult<usize> {
        let pending = self
            .task_repository
            .find_pending_tasks(migration_id, self.node_id())
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        info!(
            "节点 {} 开始处理迁移 {} 的 {} 个任务",
            self.node_id(),
            migration_id,
            pending.len()
        );

        let context = CopyContext::new(
            migration_id,
            Arc::clone(&self.migration_context),
            pending.iter().map(CopyTask::to_copy_item),
            Arc::clone(&self.profiler),
        );
        let parallelism = context.config().max_parallel_table_copy.max(1);

        let copied = stream::iter(pending)
            .map(|task| self.run_task(&context, task))
            .buffer_unordered(parallelism)
            .filter(|copied| std::future::ready(*copied))
            .count()
            .await;

        Ok(copied)
    }

    async fn run_task(&self, context: &CopyContext, task: CopyTask) -> bool {
        match self
            .task_repository
            .claim_task(&task.migration_id, &task.pipeline_name, task.target_node_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("任务 {} 已被认领", task.pipeline_name);
                return false;
            }
            Err(e) => {
                error!("认领任务 {} 失败: {}", task.pipeline_name, e);
                return false;
            }
        }

        let started = Instant::now();
        let result = self.copier.copy(context, &task).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let (copied, recorded) = match result {
            Ok(rows) => {
                info!("{} 复制完成，共 {} 行", task.pipeline_name, rows);
                let recorded = self
                    .task_repository
                    .mark_task_completed(
                        &task.migration_id,
                        &task.pipeline_name,
                        rows as i64,
                        duration_ms,
                    )
                    .await;
                (true, recorded)
            }
            Err(e) => {
                let message = failure_message(&e);
                error!("{} 复制失败: {}", task.pipeline_name, message);
                let recorded = self
                    .task_repository
                    .mark_task_failed(
                        &task.migration_id,
                        &task.pipeline_name,
                        &message,
                        duration_ms,
                    )
                    .await;
                (false, recorded)
            }
        };

        if let Err(e) = recorded {
            error!("更新任务 {} 状态失败: {}", task.pipeline_name, e);
        }
        copied
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ClusterEvent>>,
) -> Result<ClusterEvent, RecvError> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_domain::{CopyItem, CopyTaskStatus, MigrationProgress, Value};
    use migration_infrastructure::database::sqlite::SqliteCopyTaskRepository;
    use migration_infrastructure::DefaultPerformanceProfiler;
    use migration_testing_utils::{
        sqlite_url, MigrationConfigBuilder, MockDataRepository, MockNodeDirectory,
        RecordingEventBus, TestEnv,
    };
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        repo: Arc<SqliteCopyTaskRepository>,
        bus: Arc<RecordingEventBus>,
        target: Arc<MockDataRepository>,
        worker: CopyWorker,
    }

    fn rows(count: i64) -> Vec<Vec<Value>> {
        (1..=count).map(|i| vec![Value::Int(i)]).collect()
    }

    async fn fixture(node_id: i32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlx::SqlitePool::connect(&sqlite_url(dir.path(), "coordination.db"))
            .await
            .unwrap();
        let repo = Arc::new(SqliteCopyTaskRepository::new(pool));
        repo.ensure_schema().await.unwrap();

        let source = MockDataRepository::new()
            .with_table("a", &["id"], rows(12))
            .with_table("b", &["id"], rows(3))
            .with_table("broken", &["id"], rows(1));
        source.fail_table("broken");
        let target = Arc::new(
            MockDataRepository::new()
                .with_table("a", &["id"], vec![])
                .with_table("b", &["id"], vec![])
                .with_table("broken", &["id"], vec![]),
        );

        let migration_context = Arc::new(MigrationContext::new(
            MigrationConfigBuilder::new().batch_size(5).build(),
            Arc::new(source),
            target.clone(),
            Arc::new(MockNodeDirectory::new(node_id, vec![node_id])),
        ));
        let bus = Arc::new(RecordingEventBus::new());
        let worker = CopyWorker::new(
            migration_context,
            repo.clone(),
            bus.clone(),
            Arc::new(DefaultPerformanceProfiler::new()),
            Duration::from_secs(3600),
        );

        Fixture {
            _dir: dir,
            repo,
            bus,
            target,
            worker,
        }
    }

    async fn schedule(repo: &SqliteCopyTaskRepository, migration_id: &str, tasks: &[(&str, i32)]) {
        repo.create_migration_status(migration_id).await.unwrap();
        for (table, node_id) in tasks {
            let task = CopyTask::pending(migration_id, &CopyItem::new(*table, *table), *node_id);
            repo.schedule_task(&task).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_processes_only_own_tasks() {
        let f = fixture(1).await;
        schedule(&f.repo, "m-1", &[("a", 1), ("b", 2)]).await;

        let copied = f.worker.process_migration("m-1").await.unwrap();
        assert_eq!(copied, 1);

        let a = f.repo.find_task("m-1", "a->a").await.unwrap().unwrap();
        assert_eq!(a.status, CopyTaskStatus::Completed);
        assert_eq!(a.target_row_count, 12);
        assert!(a.duration_ms.is_some());

        let b = f.repo.find_task("m-1", "b->b").await.unwrap().unwrap();
        assert_eq!(b.status, CopyTaskStatus::Pending);
        assert!(f.target.rows_of("b").is_empty());

        // 已认领的任务不会再次处理
        assert_eq!(f.worker.process_migration("m-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_table_only_fails_its_task() {
        let f = fixture(1).await;
        schedule(&f.repo, "m-2", &[("a", 1), ("broken", 1)]).await;

        let copied = f.worker.process_migration("m-2").await.unwrap();
        assert_eq!(copied, 1);

        let broken = f.repo.find_task("m-2", "broken->broken").await.unwrap().unwrap();
        assert_eq!(broken.status, CopyTaskStatus::Failed);
        assert!(broken.error.is_some());

        let status = f.repo.get_migration_status("m-2").await.unwrap();
        assert!(status.is_completed());
        assert!(status.is_failed());
    }

    #[tokio::test]
    async fn test_aborted_migration_marks_tasks_failed() {
        let f = fixture(1).await;
        schedule(&f.repo, "m-3", &[("a", 1)]).await;
        f.repo
            .set_migration_status("m-3", MigrationProgress::Aborted)
            .await
            .unwrap();

        f.worker.process_migration("m-3").await.unwrap();

        let a = f.repo.find_task("m-3", "a->a").await.unwrap().unwrap();
        assert_eq!(a.status, CopyTaskStatus::Failed);
        assert_eq!(a.error.as_deref(), Some("aborted"));
    }

    async fn wait_until_completed(repo: &Arc<SqliteCopyTaskRepository>, migration_id: &str, tasks: i64) -> bool {
        let repo = repo.clone();
        let migration_id = migration_id.to_string();
        TestEnv::wait_for(
            || {
                let repo = repo.clone();
                let migration_id = migration_id.clone();
                async move {
                    repo.get_migration_status(&migration_id)
                        .await
                        .map(|s| s.completed_tasks == tasks)
                        .unwrap_or(false)
                }
            },
            Duration::from_secs(5),
        )
        .await
    }

    #[tokio::test]
    async fn test_run_polls_and_reacts_to_notifications() {
        let f = fixture(1).await;
        schedule(&f.repo, "m-4", &[("a", 1)]).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let worker = f.worker.clone();
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        // 启动时的第一次轮询会发现已有的迁移
        assert!(wait_until_completed(&f.repo, "m-4", 1).await);
        assert_eq!(f.target.rows_of("a").len(), 12);

        // 之后的迁移只能通过通知发现
        schedule(&f.repo, "m-5", &[("b", 1)]).await;
        f.bus
            .publish(&ClusterEvent::copy_requested(2, "m-5"))
            .await
            .unwrap();
        assert!(wait_until_completed(&f.repo, "m-5", 1).await);
        assert_eq!(f.target.rows_of("b").len(), 3);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
