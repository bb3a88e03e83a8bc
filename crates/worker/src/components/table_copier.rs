use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use metrics::{counter, histogram};
use migration_domain::{
    CopyContext, CopyTask, CopyTaskRepository, DataRepository, DataSet, MigrationError,
    MigrationProgress, MigrationResult, Value, ABORTED_ERROR,
};
use tracing::{debug, info, instrument, warn};

/// 单张表的复制执行器
#[derive(Clone)]
pub struct TableCopier {
    task_repository: Arc<dyn CopyTaskRepository>,
}

/// 一次表复制的读取参数
struct CopySource<'a> {
    repository: &'a Arc<dyn DataRepository>,
    table: &'a str,
    batch_size: u32,
    since: Option<DateTime<Utc>>,
}

impl TableCopier {
    pub fn new(task_repository: Arc<dyn CopyTaskRepository>) -> Self {
        Self { task_repository }
    }

    /// 复制一张表，返回写入目标库的行数
    ///
    /// 每个批次之前检查迁移是否已被中止，中止时返回 [`MigrationError::MigrationFailed`]。
    #[instrument(
        skip_all,
        fields(
            migration_id = %task.migration_id,
            pipeline = %task.pipeline_name,
            node_id = task.target_node_id
        )
    )]
    pub async fn copy(&self, context: &CopyContext, task: &CopyTask) -> MigrationResult<u64> {
        let config = context.config();
        let target = &context.migration_context().target;

        if config.truncate_enabled && !config.is_incremental() {
            let removed = target.truncate_table(&task.target_table).await?;
            debug!("已清空目标表 {}，删除 {} 行", task.target_table, removed);
        }

        if config.drop_indexes {
            match target.drop_indexes_of_table(&task.target_table).await {
                Ok(count) => info!("已删除 {} 的 {} 个索引", task.target_table, count),
                Err(MigrationError::Unsupported(msg)) => warn!("跳过删除索引: {}", msg),
                Err(e) => return Err(e),
            }
        } else if config.disable_indexes {
            match target.disable_indexes_of_table(&task.target_table).await {
                Ok(0) => warn!("{} 没有可禁用的索引，存储引擎可能不支持 (如 InnoDB)", task.target_table),
                Ok(count) => info!("已禁用 {} 的 {} 个索引", task.target_table, count),
                Err(MigrationError::Unsupported(msg)) => warn!("跳过禁用索引: {}", msg),
                Err(e) => return Err(e),
            }
        }

        let result = self.copy_rows(context, task).await;

        if config.disable_indexes && !config.drop_indexes {
            match target.enable_indexes_of_table(&task.target_table).await {
                Ok(count) => info!("已重建 {} 的 {} 个索引", task.target_table, count),
                Err(MigrationError::Unsupported(_)) => {}
                Err(e) => warn!("重建 {} 的索引失败: {}", task.target_table, e),
            }
        }

        result
    }

    async fn copy_rows(&self, context: &CopyContext, task: &CopyTask) -> MigrationResult<u64> {
        let config = context.config();
        let source = CopySource {
            repository: &context.migration_context().source,
            table: &task.source_table,
            batch_size: config.batch_size.max(1),
            since: config.incremental_since,
        };

        let unique_columns = source.repository.get_unique_columns(source.table).await?;
        if let [column] = unique_columns.as_slice() {
            let nulls = source
                .repository
                .get_null_count(source.table, column, source.since)
                .await?;
            if nulls == 0 {
                debug!("{} 按唯一列 {} 分段并行读取", source.table, column);
                return self.copy_by_markers(context, task, &source, column).await;
            }

            warn!(
                "{} 的唯一列 {} 有 {} 行为 NULL，改为按全部列分页读取",
                source.table, column, nulls
            );
            let order_columns = source.repository.get_all_column_names(source.table).await?;
            return self
                .copy_by_offset(context, task, &source, &order_columns)
                .await;
        }

        let order_columns = if unique_columns.is_empty() {
            source.repository.get_all_column_names(source.table).await?
        } else {
            unique_columns
        };
        debug!("{} 按 {:?} 分页读取", source.table, order_columns);
        self.copy_by_offset(context, task, &source, &order_columns)
            .await
    }

    async fn copy_by_offset(
        &self,
        context: &CopyContext,
        task: &CopyTask,
        source: &CopySource<'_>,
        order_columns: &[String],
    ) -> MigrationResult<u64> {
        let mut offset = 0u64;
        let mut copied = 0u64;

        loop {
            self.ensure_not_aborted(context).await?;

            let batch = source
                .repository
                .get_batch_without_identifier(
                    source.table,
                    order_columns,
                    source.batch_size,
                    offset,
                    source.since,
                )
                .await?;
            if batch.is_empty() {
                break;
            }

            let read = batch.len() as u64;
            copied += self.write_batch(context, task, batch).await?;
            offset += read;

            if read < u64::from(source.batch_size) {
                break;
            }
        }

        Ok(copied)
    }

    async fn copy_by_markers(
        &self,
        context: &CopyContext,
        task: &CopyTask,
        source: &CopySource<'_>,
        column: &str,
    ) -> MigrationResult<u64> {
        let markers = source
            .repository
            .get_batch_markers_ordered_by_column(
                source.table,
                column,
                source.batch_size,
                source.since,
            )
            .await?;
        let starts = markers.column_values(column)?;
        debug!("{} 共 {} 个批次", source.table, starts.len());

        let parallelism = context.config().max_parallel_batches.max(1);
        stream::iter(starts)
            .map(|start| self.copy_marker_batch(context, task, source, column, start))
            .buffer_unordered(parallelism)
            .try_fold(0u64, |total, rows| async move { Ok(total + rows) })
            .await
    }

    async fn copy_marker_batch(
        &self,
        context: &CopyContext,
        task: &CopyTask,
        source: &CopySource<'_>,
        column: &str,
        start: Value,
    ) -> MigrationResult<u64> {
        if start.is_null() {
            return Err(MigrationError::DatabaseOperation(format!(
                "{} 的分段起始值为 NULL: {}",
                source.table, column
            )));
        }
        self.ensure_not_aborted(context).await?;

        let batch = source
            .repository
            .get_batch_ordered_by_column(
                source.table,
                column,
                Some(&start),
                source.batch_size,
                source.since,
            )
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }
        self.write_batch(context, task, batch).await
    }

    async fn write_batch(
        &self,
        context: &CopyContext,
        task: &CopyTask,
        batch: DataSet,
    ) -> MigrationResult<u64> {
        let started = Instant::now();
        let columns = map_columns(&batch.column_names(), &task.column_mapping);

        let inserted = context
            .migration_context()
            .target
            .insert_batch(&task.target_table, &columns, batch.rows())
            .await?;
        self.task_repository
            .update_progress(&task.migration_id, &task.pipeline_name, inserted as i64)
            .await?;

        let elapsed = started.elapsed();
        context
            .profiler()
            .record_batch(&task.pipeline_name, inserted, elapsed);
        counter!("migration_rows_copied_total", "pipeline" => task.pipeline_name.clone())
            .increment(inserted);
        counter!("migration_batches_total").increment(1);
        histogram!("migration_batch_duration_seconds").record(elapsed.as_secs_f64());

        debug!("写入 {} 行，耗时 {:?}", inserted, elapsed);
        Ok(inserted)
    }

    async fn ensure_not_aborted(&self, context: &CopyContext) -> MigrationResult<()> {
        let progress = self
            .task_repository
            .get_migration_progress(context.migration_id())
            .await?;
        if progress == Some(MigrationProgress::Aborted) {
            return Err(MigrationError::MigrationFailed {
                migration_id: context.migration_id().to_string(),
                status: MigrationProgress::Aborted.to_string(),
            });
        }
        Ok(())
    }
}

/// 复制失败时写入任务的错误信息
pub fn failure_message(error: &MigrationError) -> String {
    match error {
        MigrationError::MigrationFailed { status, .. }
            if status == MigrationProgress::Aborted.as_str() =>
        {
            ABORTED_ERROR.to_string()
        }
        other => other.to_string(),
    }
}

/// 按列映射改名，映射中没有的列保持原名；匹配大小写不敏感
pub fn map_columns(columns: &[String], mapping: &HashMap<String, String>) -> Vec<String> {
    columns
        .iter()
        .map(|column| {
            mapping
                .get(column)
                .or_else(|| {
                    mapping
                        .iter()
                        .find(|(source, _)| source.eq_ignore_ascii_case(column))
                        .map(|(_, target)| target)
                })
                .cloned()
                .unwrap_or_else(|| column.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_domain::CopyItem;
    use migration_infrastructure::database::sqlite::SqliteCopyTaskRepository;
    use migration_testing_utils::{
        copy_context, sqlite_url, CopyTaskBuilder, MigrationConfigBuilder, MockDataRepository,
        MockNodeDirectory,
    };
    use tempfile::TempDir;

    async fn task_repository() -> (TempDir, Arc<SqliteCopyTaskRepository>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlx::SqlitePool::connect(&sqlite_url(dir.path(), "coordination.db"))
            .await
            .unwrap();
        let repo = Arc::new(SqliteCopyTaskRepository::new(pool));
        repo.ensure_schema().await.unwrap();
        (dir, repo)
    }

    fn rows(count: i64) -> Vec<Vec<Value>> {
        (1..=count)
            .map(|i| vec![Value::Int(i), Value::from(format!("name-{i}"))])
            .collect()
    }

    async fn schedule(repo: &SqliteCopyTaskRepository, task: &CopyTask) {
        repo.create_migration_status(&task.migration_id).await.unwrap();
        repo.schedule_task(task).await.unwrap();
    }

    #[test]
    fn test_map_columns() {
        let mut mapping = HashMap::new();
        mapping.insert("Name".to_string(), "full_name".to_string());

        let mapped = map_columns(&["id".to_string(), "NAME".to_string()], &mapping);
        assert_eq!(mapped, vec!["id".to_string(), "full_name".to_string()]);
    }

    #[test]
    fn test_failure_message_for_abort() {
        let aborted = MigrationError::MigrationFailed {
            migration_id: "m".to_string(),
            status: "ABORTED".to_string(),
        };
        assert_eq!(failure_message(&aborted), ABORTED_ERROR);

        let other = MigrationError::Internal("boom".to_string());
        assert!(failure_message(&other).contains("boom"));
    }

    #[tokio::test]
    async fn test_offset_copy_without_unique_key() {
        let (_dir, repo) = task_repository().await;
        let source = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(25)));
        let target = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(3)));
        let config = MigrationConfigBuilder::new().batch_size(10).build();
        let context = copy_context(
            "m-1",
            config,
            source,
            target.clone(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            vec![CopyItem::new("items", "items")],
        );
        let task = CopyTaskBuilder::new("m-1", "items").with_row_count(25).build();
        schedule(&repo, &task).await;

        let copied = TableCopier::new(repo.clone()).copy(&context, &task).await.unwrap();

        assert_eq!(copied, 25);
        assert_eq!(target.rows_of("items"), rows(25));
        assert_eq!(target.truncated_tables(), vec!["items".to_string()]);

        let stored = repo.find_task("m-1", &task.pipeline_name).await.unwrap().unwrap();
        assert_eq!(stored.target_row_count, 25);

        let throughput = context.profiler().snapshot();
        assert_eq!(throughput[0].rows, 25);
        assert_eq!(throughput[0].batches, 3);
    }

    #[tokio::test]
    async fn test_keyset_copy_with_column_mapping() {
        let (_dir, repo) = task_repository().await;
        let source = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(23)));
        source.set_unique_columns("items", &["id"]);
        let target =
            Arc::new(MockDataRepository::new().with_table("items_copy", &["id", "label"], vec![]));
        let config = MigrationConfigBuilder::new().batch_size(5).build();
        let context = copy_context(
            "m-2",
            config,
            source,
            target.clone(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            vec![CopyItem::new("items", "items_copy")],
        );
        let task = CopyTaskBuilder::new("m-2", "items")
            .with_tables("items", "items_copy")
            .with_column_mapping(&[("name", "label")])
            .build();
        schedule(&repo, &task).await;

        let copied = TableCopier::new(repo.clone()).copy(&context, &task).await.unwrap();
        assert_eq!(copied, 23);

        let mut copied_rows = target.rows_of("items_copy");
        copied_rows.sort_by_key(|row| row[0].as_i64());
        assert_eq!(copied_rows, rows(23));

        let stored = repo.find_task("m-2", &task.pipeline_name).await.unwrap().unwrap();
        assert_eq!(stored.target_row_count, 23);
        assert_eq!(
            target.get_all_column_names("items_copy").await.unwrap(),
            vec!["id".to_string(), "label".to_string()]
        );
    }

    #[tokio::test]
    async fn test_nullable_unique_key_falls_back_to_offset() {
        let (_dir, repo) = task_repository().await;
        let source_rows: Vec<Vec<Value>> = (0..15)
            .map(|i| {
                let code = if i < 7 { Value::Null } else { Value::Int(i) };
                vec![code, Value::from(format!("name-{i}"))]
            })
            .collect();
        let source = Arc::new(MockDataRepository::new().with_table(
            "codes",
            &["code", "name"],
            source_rows.clone(),
        ));
        source.set_unique_columns("codes", &["code"]);
        let target = Arc::new(MockDataRepository::new().with_table("codes", &["code", "name"], vec![]));
        let context = copy_context(
            "m-6",
            MigrationConfigBuilder::new().batch_size(5).build(),
            source,
            target.clone(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            vec![CopyItem::new("codes", "codes")],
        );
        let task = CopyTaskBuilder::new("m-6", "codes").build();
        schedule(&repo, &task).await;

        let copied = TableCopier::new(repo.clone()).copy(&context, &task).await.unwrap();

        assert_eq!(copied, 15);
        let mut names: Vec<String> = target
            .rows_of("codes")
            .iter()
            .map(|row| row[1].as_str().unwrap().to_string())
            .collect();
        names.sort();
        let mut expected: Vec<String> = (0..15).map(|i| format!("name-{i}")).collect();
        expected.sort();
        assert_eq!(names, expected);
        assert_eq!(context.profiler().snapshot()[0].batches, 3);
    }

    #[tokio::test]
    async fn test_incremental_copy_keeps_target_rows() {
        let (_dir, repo) = task_repository().await;
        let source = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(2)));
        let target = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(1)));
        let config = MigrationConfigBuilder::new()
            .incremental_since(Utc::now())
            .build();
        let context = copy_context(
            "m-3",
            config,
            source,
            target.clone(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            vec![CopyItem::new("items", "items")],
        );
        let task = CopyTaskBuilder::new("m-3", "items").build();
        schedule(&repo, &task).await;

        TableCopier::new(repo.clone()).copy(&context, &task).await.unwrap();

        assert!(target.truncated_tables().is_empty());
        assert_eq!(target.rows_of("items").len(), 3);
    }

    #[tokio::test]
    async fn test_aborted_migration_stops_before_next_batch() {
        let (_dir, repo) = task_repository().await;
        let source = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(10)));
        let target = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], vec![]));
        let context = copy_context(
            "m-4",
            MigrationConfigBuilder::new().build(),
            source,
            target.clone(),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            vec![CopyItem::new("items", "items")],
        );
        let task = CopyTaskBuilder::new("m-4", "items").build();
        schedule(&repo, &task).await;
        repo.set_migration_status("m-4", MigrationProgress::Aborted)
            .await
            .unwrap();

        let err = TableCopier::new(repo.clone())
            .copy(&context, &task)
            .await
            .unwrap_err();

        assert_eq!(failure_message(&err), ABORTED_ERROR);
        assert!(target.rows_of("items").is_empty());
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let (_dir, repo) = task_repository().await;
        let source = Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], rows(4)));
        source.fail_table("items");
        let context = copy_context(
            "m-5",
            MigrationConfigBuilder::new().build(),
            source,
            Arc::new(MockDataRepository::new().with_table("items", &["id", "name"], vec![])),
            Arc::new(MockNodeDirectory::new(1, vec![])),
            vec![CopyItem::new("items", "items")],
        );
        let task = CopyTaskBuilder::new("m-5", "items").build();
        schedule(&repo, &task).await;

        assert!(TableCopier::new(repo).copy(&context, &task).await.is_err());
    }
}
