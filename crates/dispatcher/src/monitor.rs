use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use migration_domain::{
    format_duration_ms, ClusterEvent, ClusterEventBus, CopyTask, CopyTaskRepository,
    MigrationProgress, MigrationResult, MigrationStatus,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn};

/// 单次轮询后对迁移的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// 仍在运行
    Running,
    /// 本次轮询判定为停滞
    Stalled,
    /// 停滞后重新有了进展
    Resumed,
    /// 迁移结束，已停止监控
    Finished(MigrationProgress),
}

#[derive(Debug, Clone)]
struct WatchedMigration {
    migration_id: String,
    origin_node_id: i32,
    stalled_timeout: Duration,
    last_poll: DateTime<Utc>,
}

#[derive(Default)]
struct MonitorState {
    watched: HashMap<String, WatchedMigration>,
    supervisor: Option<JoinHandle<()>>,
}

struct MonitorInner {
    repository: Arc<dyn CopyTaskRepository>,
    event_bus: Arc<dyn ClusterEventBus>,
    poll_interval: Duration,
    state: Mutex<MonitorState>,
}

/// 迁移进度监控
///
/// 所有被监控的迁移共用一个后台轮询任务。没有迁移需要监控时轮询任务退出，
/// 下一次 `watch` 再重新启动。
#[derive(Clone)]
pub struct ProgressMonitor {
    inner: Arc<MonitorInner>,
}

impl ProgressMonitor {
    pub fn new(
        repository: Arc<dyn CopyTaskRepository>,
        event_bus: Arc<dyn ClusterEventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                repository,
                event_bus,
                poll_interval,
                state: Mutex::new(MonitorState::default()),
            }),
        }
    }

    /// 开始监控一个迁移，重复调用只更新停滞超时
    pub async fn watch(&self, migration_id: &str, origin_node_id: i32, stalled_timeout: Duration) {
        let mut state = self.inner.state.lock().await;

        state
            .watched
            .entry(migration_id.to_string())
            .and_modify(|w| w.stalled_timeout = stalled_timeout)
            .or_insert_with(|| WatchedMigration {
                migration_id: migration_id.to_string(),
                origin_node_id,
                stalled_timeout,
                last_poll: DateTime::<Utc>::UNIX_EPOCH,
            });
        info!("开始监控迁移 {}", migration_id);

        let needs_supervisor = state
            .supervisor
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true);
        if needs_supervisor {
            let inner = Arc::clone(&self.inner);
            state.supervisor = Some(tokio::spawn(supervise(inner)));
            debug!("迁移监控轮询任务已启动");
        }
    }

    pub async fn watched_migrations(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .state
            .lock()
            .await
            .watched
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .supervisor
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 进程退出时调用，停止轮询并清空监控列表
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        state.watched.clear();
        if let Some(handle) = state.supervisor.take() {
            handle.abort();
            info!("迁移监控已停止");
        }
    }

    /// 立即轮询所有被监控的迁移一次
    pub async fn poll_once(&self) -> HashMap<String, PollOutcome> {
        self.inner.poll_all().await
    }
}

async fn supervise(inner: Arc<MonitorInner>) {
    let mut interval = tokio::time::interval(inner.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        {
            let mut state = inner.state.lock().await;
            if state.watched.is_empty() {
                state.supervisor = None;
                debug!("没有需要监控的迁移，轮询任务退出");
                break;
            }
        }

        inner.poll_all().await;
    }
}

impl MonitorInner {
    async fn poll_all(&self) -> HashMap<String, PollOutcome> {
        let watched: Vec<WatchedMigration> = self
            .state
            .lock()
            .await
            .watched
            .values()
            .cloned()
            .collect();

        let mut outcomes = HashMap::new();
        for migration in watched {
            let polled_at = Utc::now();
            match self.poll_migration(&migration).await {
                Ok(outcome) => {
                    let mut state = self.state.lock().await;
                    if let PollOutcome::Finished(_) = outcome {
                        state.watched.remove(&migration.migration_id);
                    } else if let Some(entry) = state.watched.get_mut(&migration.migration_id) {
                        entry.last_poll = polled_at;
                    }
                    outcomes.insert(migration.migration_id.clone(), outcome);
                }
                Err(e) => {
                    error!("轮询迁移 {} 状态失败: {}", migration.migration_id, e);
                }
            }
        }
        outcomes
    }

    async fn poll_migration(&self, migration: &WatchedMigration) -> MigrationResult<PollOutcome> {
        let migration_id = migration.migration_id.as_str();
        let mut status = self.repository.get_migration_status(migration_id).await?;
        status.status_updates = self
            .repository
            .get_updated_tasks(migration_id, migration.last_poll)
            .await?;

        for task in &status.status_updates {
            log_task_update(task);
        }
        log_summary(&status);

        let now = Utc::now();
        if status.is_completed() {
            let end = status.end.unwrap_or(now);
            self.repository
                .finish_migration(migration_id, status.status, end)
                .await?;

            let duration = format_duration_ms((end - status.start).num_milliseconds());
            match status.status {
                MigrationProgress::Completed => {
                    info!("迁移 {} 已完成，耗时 {}", migration_id, duration)
                }
                other => warn!("迁移 {} 以状态 {} 结束，耗时 {}", migration_id, other, duration),
            }

            let event = ClusterEvent::copy_complete(migration.origin_node_id, migration_id);
            if let Err(e) = self.event_bus.publish(&event).await {
                warn!("发布迁移完成通知失败: {}", e);
            }
            return Ok(PollOutcome::Finished(status.status));
        }

        let idle = (now - status.last_update).to_std().unwrap_or(Duration::ZERO);
        if idle >= migration.stalled_timeout {
            if !status.is_stalled()
                && self
                    .repository
                    .set_migration_status(migration_id, MigrationProgress::Stalled)
                    .await?
            {
                warn!(
                    "迁移 {} 已有 {} 没有任何进展，标记为停滞",
                    migration_id,
                    format_duration_ms(millis(idle))
                );
                return Ok(PollOutcome::Stalled);
            }
        } else if status.is_stalled()
            && self
                .repository
                .set_migration_status(migration_id, MigrationProgress::Running)
                .await?
        {
            info!("迁移 {} 恢复进展", migration_id);
            return Ok(PollOutcome::Resumed);
        }

        Ok(PollOutcome::Running)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn log_task_update(task: &CopyTask) {
    let span = info_span!(
        "copy_task",
        migration_id = %task.migration_id,
        pipeline = %task.pipeline_name,
        node_id = task.target_node_id
    );
    let _guard = span.enter();

    if task.is_failed() {
        error!(
            "{} 复制失败: {}",
            task.pipeline_name,
            task.error.as_deref().unwrap_or("未知错误")
        );
    } else if task.is_completed() {
        info!(
            "{} 复制完成: {}/{} 行，耗时 {}",
            task.pipeline_name,
            task.target_row_count,
            task.source_row_count,
            task.formatted_duration()
        );
    } else {
        debug!(
            "{} [{}] {}/{} 行",
            task.pipeline_name, task.status, task.target_row_count, task.source_row_count
        );
    }
}

fn log_summary(status: &MigrationStatus) {
    info!(
        migration_id = %status.migration_id,
        status = %status.status,
        "{}/{} 张表已迁移，{} 张失败",
        status.completed_tasks,
        status.total_tasks,
        status.failed_tasks
    );
}
