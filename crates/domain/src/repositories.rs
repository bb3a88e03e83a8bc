use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::MigrationResult;

use crate::dataset::{DataSet, Value};
use crate::entities::{ClusterNode, CopyTask, MigrationProgress, MigrationStatus};

/// 数据库支撑的复制任务队列
///
/// 所有变更都是单条原子SQL，跨节点只通过这些表协作
#[async_trait]
pub trait CopyTaskRepository: Send + Sync {
    /// 幂等创建协调表
    async fn ensure_schema(&self) -> MigrationResult<()>;

    /// 已存在时返回 false
    async fn create_migration_status(&self, migration_id: &str) -> MigrationResult<bool>;

    /// 插入 PENDING 任务，已存在时保持原样并返回 false
    async fn schedule_task(&self, task: &CopyTask) -> MigrationResult<bool>;

    /// PENDING -> RUNNING，只有任务所属节点能认领
    async fn claim_task(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        node_id: i32,
    ) -> MigrationResult<bool>;

    /// target_row_count += rows
    async fn update_progress(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        rows: i64,
    ) -> MigrationResult<()>;

    async fn mark_task_completed(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        target_row_count: i64,
        duration_ms: i64,
    ) -> MigrationResult<()>;

    async fn mark_task_failed(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        error: &str,
        duration_ms: i64,
    ) -> MigrationResult<()>;

    /// 把迁移下所有 PENDING 任务一次性置为失败，返回更新的任务数
    async fn fail_pending_tasks(&self, migration_id: &str, error: &str) -> MigrationResult<u64>;

    async fn find_pending_tasks(
        &self,
        migration_id: &str,
        node_id: i32,
    ) -> MigrationResult<Vec<CopyTask>>;

    async fn find_task(
        &self,
        migration_id: &str,
        pipeline_name: &str,
    ) -> MigrationResult<Option<CopyTask>>;

    /// 聚合快照，不包含任务明细
    async fn get_migration_status(&self, migration_id: &str) -> MigrationResult<MigrationStatus>;

    /// 只读取状态标志
    async fn get_migration_progress(
        &self,
        migration_id: &str,
    ) -> MigrationResult<Option<MigrationProgress>>;

    /// 按 (last_update, pipeline_name) 排序
    async fn get_updated_tasks(
        &self,
        migration_id: &str,
        since: DateTime<Utc>,
    ) -> MigrationResult<Vec<CopyTask>>;

    /// 终态不会被覆盖，返回是否真正更新
    async fn set_migration_status(
        &self,
        migration_id: &str,
        status: MigrationProgress,
    ) -> MigrationResult<bool>;

    /// 写入终态和结束时间
    async fn finish_migration(
        &self,
        migration_id: &str,
        status: MigrationProgress,
        end: DateTime<Utc>,
    ) -> MigrationResult<bool>;

    /// 尚未进入终态的迁移
    async fn find_active_migrations(&self) -> MigrationResult<Vec<String>>;
}

/// 集群节点心跳表
#[async_trait]
pub trait ClusterNodeRepository: Send + Sync {
    async fn heartbeat(&self, node_id: i32, hostname: &str) -> MigrationResult<()>;
    async fn find_alive_nodes(&self, since: DateTime<Utc>) -> MigrationResult<Vec<ClusterNode>>;
    async fn unregister(&self, node_id: i32) -> MigrationResult<()>;
}

/// 源库或目标库的行级访问
#[async_trait]
pub trait DataRepository: Send + Sync {
    /// 方言名称，用于日志
    fn dialect_name(&self) -> &'static str;

    async fn validate_connection(&self) -> MigrationResult<bool>;

    async fn get_row_count(&self, table: &str) -> MigrationResult<i64>;

    async fn get_row_count_modified_after(
        &self,
        table: &str,
        since: DateTime<Utc>,
    ) -> MigrationResult<i64>;

    async fn get_all(&self, table: &str, ignore_columns: &[String]) -> MigrationResult<DataSet>;

    async fn get_all_modified_after(
        &self,
        table: &str,
        ignore_columns: &[String],
        since: DateTime<Utc>,
    ) -> MigrationResult<DataSet>;

    /// 按全部排序列分页
    async fn get_batch_without_identifier(
        &self,
        table: &str,
        order_columns: &[String],
        batch_size: u32,
        offset: u64,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet>;

    /// 从 last_value（含）开始按列顺序读取一批
    async fn get_batch_ordered_by_column(
        &self,
        table: &str,
        column: &str,
        last_value: Option<&Value>,
        batch_size: u32,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet>;

    /// 每个批次的起始值，结果列为 (column, rownum)
    async fn get_batch_markers_ordered_by_column(
        &self,
        table: &str,
        column: &str,
        batch_size: u32,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet>;

    async fn get_unique_columns(&self, table: &str) -> MigrationResult<Vec<String>>;

    /// 列值为 NULL 的行数，增量模式下只统计修改过的行
    async fn get_null_count(
        &self,
        table: &str,
        column: &str,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<i64>;

    async fn get_all_table_names(&self) -> MigrationResult<Vec<String>>;

    async fn get_all_column_names(&self, table: &str) -> MigrationResult<Vec<String>>;

    async fn truncate_table(&self, table: &str) -> MigrationResult<u64>;

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> MigrationResult<u64>;

    async fn disable_indexes_of_table(&self, table: &str) -> MigrationResult<usize>;

    async fn enable_indexes_of_table(&self, table: &str) -> MigrationResult<usize>;

    async fn drop_indexes_of_table(&self, table: &str) -> MigrationResult<usize>;

    /// 数据库负载百分比，无法获取时为 None
    async fn get_database_utilization(&self) -> Option<f64>;
}
