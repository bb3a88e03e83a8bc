use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{
    entities::{CopyTask, MigrationAggregate, MigrationProgress, MigrationStatus},
    repositories::CopyTaskRepository,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument, warn};

use crate::database::queries;

pub struct SqliteCopyTaskRepository {
    pool: SqlitePool,
}

impl SqliteCopyTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_copy_task(row: &SqliteRow) -> MigrationResult<CopyTask> {
        let column_map: String = row.try_get("columnmap")?;
        let status: String = row.try_get("status")?;
        Ok(CopyTask {
            migration_id: row.try_get("migrationid")?,
            pipeline_name: row.try_get("pipelinename")?,
            source_table: row.try_get("sourcetablename")?,
            target_table: row.try_get("targettablename")?,
            column_mapping: queries::decode_column_map(&column_map)?,
            target_node_id: row.try_get("targetnodeid")?,
            source_row_count: row.try_get("sourcerowcount")?,
            target_row_count: row.try_get("targetrowcount")?,
            status: status.parse()?,
            error: row.try_get("error")?,
            last_update: row.try_get("lastupdate")?,
            duration_ms: row.try_get("durationms")?,
        })
    }

    async fn finish_task(
        &self,
        sql: &str,
        migration_id: &str,
        pipeline_name: &str,
        bind_error: Option<&str>,
        target_row_count: i64,
        duration_ms: i64,
    ) -> MigrationResult<()> {
        let query = sqlx::query(sql).bind(migration_id).bind(pipeline_name);
        let query = match bind_error {
            Some(error) => query.bind(error),
            None => query.bind(target_row_count),
        };
        let result = query
            .bind(duration_ms)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;

        if result.rows_affected() == 0 {
            warn!("任务 {}/{} 不存在或已结束", migration_id, pipeline_name);
            return Err(MigrationError::TaskNotFound {
                migration_id: migration_id.to_string(),
                pipeline_name: pipeline_name.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CopyTaskRepository for SqliteCopyTaskRepository {
    async fn ensure_schema(&self) -> MigrationResult<()> {
        for statement in queries::SQLITE_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(MigrationError::Database)?;
        }
        debug!("SQLite协调表已就绪");
        Ok(())
    }

    async fn create_migration_status(&self, migration_id: &str) -> MigrationResult<bool> {
        let result = sqlx::query(queries::INSERT_STATUS)
            .bind(migration_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, task), fields(
        migration_id = %task.migration_id,
        pipeline = %task.pipeline_name,
        node_id = task.target_node_id,
    ))]
    async fn schedule_task(&self, task: &CopyTask) -> MigrationResult<bool> {
        let result = sqlx::query(queries::INSERT_TASK)
            .bind(&task.migration_id)
            .bind(&task.pipeline_name)
            .bind(&task.source_table)
            .bind(&task.target_table)
            .bind(queries::encode_column_map(&task.column_mapping)?)
            .bind(task.target_node_id)
            .bind(task.source_row_count)
            .bind(task.last_update)
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_task(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        node_id: i32,
    ) -> MigrationResult<bool> {
        let result = sqlx::query(queries::CLAIM_TASK)
            .bind(migration_id)
            .bind(pipeline_name)
            .bind(node_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        rows: i64,
    ) -> MigrationResult<()> {
        let result = sqlx::query(queries::UPDATE_PROGRESS)
            .bind(migration_id)
            .bind(pipeline_name)
            .bind(rows)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;

        if result.rows_affected() == 0 {
            return Err(MigrationError::TaskNotFound {
                migration_id: migration_id.to_string(),
                pipeline_name: pipeline_name.to_string(),
            });
        }
        Ok(())
    }

    async fn mark_task_completed(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        target_row_count: i64,
        duration_ms: i64,
    ) -> MigrationResult<()> {
        self.finish_task(
            queries::MARK_COMPLETED,
            migration_id,
            pipeline_name,
            None,
            target_row_count,
            duration_ms,
        )
        .await
    }

    async fn mark_task_failed(
        &self,
        migration_id: &str,
        pipeline_name: &str,
        error: &str,
        duration_ms: i64,
    ) -> MigrationResult<()> {
        self.finish_task(
            queries::MARK_FAILED,
            migration_id,
            pipeline_name,
            Some(error),
            0,
            duration_ms,
        )
        .await
    }

    async fn fail_pending_tasks(&self, migration_id: &str, error: &str) -> MigrationResult<u64> {
        let result = sqlx::query(queries::FAIL_PENDING_TASKS)
            .bind(migration_id)
            .bind(error)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(result.rows_affected())
    }

    async fn find_pending_tasks(
        &self,
        migration_id: &str,
        node_id: i32,
    ) -> MigrationResult<Vec<CopyTask>> {
        let rows = sqlx::query(&queries::select_pending_tasks())
            .bind(migration_id)
            .bind(node_id)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        rows.iter().map(Self::row_to_copy_task).collect()
    }

    async fn find_task(
        &self,
        migration_id: &str,
        pipeline_name: &str,
    ) -> MigrationResult<Option<CopyTask>> {
        let row = sqlx::query(&queries::select_task())
            .bind(migration_id)
            .bind(pipeline_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        row.as_ref().map(Self::row_to_copy_task).transpose()
    }

    async fn get_migration_status(&self, migration_id: &str) -> MigrationResult<MigrationStatus> {
        let row = sqlx::query(queries::SELECT_STATUS_AGGREGATE)
            .bind(migration_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::Database)?
            .ok_or_else(|| MigrationError::MigrationNotFound {
                migration_id: migration_id.to_string(),
            })?;

        let status: String = row.try_get("status")?;
        Ok(MigrationStatus::from_aggregate(MigrationAggregate {
            migration_id: row.try_get("migrationid")?,
            stored_status: status.parse()?,
            start: row.try_get("startat")?,
            end: row.try_get("endat")?,
            total_tasks: row.try_get("total")?,
            completed_tasks: row.try_get("completed")?,
            failed_tasks: row.try_get("failed")?,
            last_task_update: row.try_get("lastupdate")?,
        }))
    }

    async fn get_migration_progress(
        &self,
        migration_id: &str,
    ) -> MigrationResult<Option<MigrationProgress>> {
        let status: Option<String> = sqlx::query_scalar(queries::SELECT_PROGRESS)
            .bind(migration_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        status.map(|s| s.parse()).transpose()
    }

    async fn get_updated_tasks(
        &self,
        migration_id: &str,
        since: DateTime<Utc>,
    ) -> MigrationResult<Vec<CopyTask>> {
        let rows = sqlx::query(&queries::select_updated_tasks())
            .bind(migration_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        rows.iter().map(Self::row_to_copy_task).collect()
    }

    async fn set_migration_status(
        &self,
        migration_id: &str,
        status: MigrationProgress,
    ) -> MigrationResult<bool> {
        let result = sqlx::query(queries::SET_STATUS)
            .bind(migration_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish_migration(
        &self,
        migration_id: &str,
        status: MigrationProgress,
        end: DateTime<Utc>,
    ) -> MigrationResult<bool> {
        let result = sqlx::query(queries::FINISH_MIGRATION)
            .bind(migration_id)
            .bind(status.as_str())
            .bind(end)
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_active_migrations(&self) -> MigrationResult<Vec<String>> {
        let ids = sqlx::query_scalar(queries::SELECT_ACTIVE_MIGRATIONS)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use migration_domain::entities::{CopyItem, CopyTaskStatus};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteCopyTaskRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("coord.db").display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .unwrap();
        let repo = SqliteCopyTaskRepository::new(pool);
        repo.ensure_schema().await.unwrap();
        (dir, repo)
    }

    fn task(migration_id: &str, table: &str, node: i32, rows: i64) -> CopyTask {
        let mut item = CopyItem::new(table, table);
        item.source_row_count = rows;
        CopyTask::pending(migration_id, &item, node)
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let (_dir, repo) = setup().await;
        repo.ensure_schema().await.unwrap();
        repo.ensure_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_schedule_is_idempotent() {
        let (_dir, repo) = setup().await;
        assert!(repo.create_migration_status("m-1").await.unwrap());
        assert!(!repo.create_migration_status("m-1").await.unwrap());

        assert!(repo.schedule_task(&task("m-1", "orders", 1, 10)).await.unwrap());
        assert!(!repo.schedule_task(&task("m-1", "orders", 2, 99)).await.unwrap());

        let stored = repo.find_task("m-1", "orders->orders").await.unwrap().unwrap();
        assert_eq!(stored.target_node_id, 1);
        assert_eq!(stored.source_row_count, 10);
        assert_eq!(stored.status, CopyTaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_claim_only_once_and_only_by_owner() {
        let (_dir, repo) = setup().await;
        repo.create_migration_status("m-1").await.unwrap();
        repo.schedule_task(&task("m-1", "orders", 1, 10)).await.unwrap();

        assert!(!repo.claim_task("m-1", "orders->orders", 2).await.unwrap());
        assert!(repo.claim_task("m-1", "orders->orders", 1).await.unwrap());
        assert!(!repo.claim_task("m-1", "orders->orders", 1).await.unwrap());

        assert!(repo.find_pending_tasks("m-1", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_and_completion() {
        let (_dir, repo) = setup().await;
        repo.create_migration_status("m-1").await.unwrap();
        repo.schedule_task(&task("m-1", "orders", 1, 10)).await.unwrap();
        repo.claim_task("m-1", "orders->orders", 1).await.unwrap();

        repo.update_progress("m-1", "orders->orders", 4).await.unwrap();
        repo.update_progress("m-1", "orders->orders", 6).await.unwrap();
        let running = repo.find_task("m-1", "orders->orders").await.unwrap().unwrap();
        assert_eq!(running.target_row_count, 10);
        assert_eq!(running.status, CopyTaskStatus::Running);

        repo.mark_task_completed("m-1", "orders->orders", 10, 1500).await.unwrap();
        let done = repo.find_task("m-1", "orders->orders").await.unwrap().unwrap();
        assert_eq!(done.status, CopyTaskStatus::Completed);
        assert_eq!(done.duration_ms, Some(1500));

        let again = repo.mark_task_failed("m-1", "orders->orders", "late", 1).await;
        assert!(matches!(again, Err(MigrationError::TaskNotFound { .. })));

        let missing = repo.update_progress("m-1", "nope->nope", 1).await;
        assert!(matches!(missing, Err(MigrationError::TaskNotFound { .. })));
    }

    #[tokio::test]
    async fn test_aggregate_status() {
        let (_dir, repo) = setup().await;
        repo.create_migration_status("m-1").await.unwrap();
        for (table, node) in [("a", 1), ("b", 1), ("c", 2)] {
            repo.schedule_task(&task("m-1", table, node, 5)).await.unwrap();
        }

        let status = repo.get_migration_status("m-1").await.unwrap();
        assert_eq!(status.total_tasks, 3);
        assert_eq!(status.status, MigrationProgress::Running);
        assert!(!status.is_completed());

        repo.mark_task_completed("m-1", "a->a", 5, 10).await.unwrap();
        repo.mark_task_completed("m-1", "b->b", 5, 10).await.unwrap();
        repo.mark_task_failed("m-1", "c->c", "boom", 10).await.unwrap();

        let status = repo.get_migration_status("m-1").await.unwrap();
        assert_eq!(status.completed_tasks, 2);
        assert_eq!(status.failed_tasks, 1);
        assert!(status.is_completed());
        assert!(status.is_failed());
        assert_eq!(status.status, MigrationProgress::Failed);

        let missing = repo.get_migration_status("unknown").await;
        assert!(matches!(missing, Err(MigrationError::MigrationNotFound { .. })));
    }

    #[tokio::test]
    async fn test_fail_pending_tasks_only_touches_pending() {
        let (_dir, repo) = setup().await;
        repo.create_migration_status("m-1").await.unwrap();
        repo.create_migration_status("m-2").await.unwrap();
        for table in ["a", "b", "c"] {
            repo.schedule_task(&task("m-1", table, 1, 5)).await.unwrap();
        }
        repo.schedule_task(&task("m-2", "a", 1, 5)).await.unwrap();
        assert!(repo.claim_task("m-1", "a->a", 1).await.unwrap());
        repo.mark_task_completed("m-1", "b->b", 5, 10).await.unwrap();

        assert_eq!(repo.fail_pending_tasks("m-1", "aborted").await.unwrap(), 1);
        assert_eq!(repo.fail_pending_tasks("m-1", "aborted").await.unwrap(), 0);

        let a = repo.find_task("m-1", "a->a").await.unwrap().unwrap();
        assert_eq!(a.status, CopyTaskStatus::Running);
        let b = repo.find_task("m-1", "b->b").await.unwrap().unwrap();
        assert_eq!(b.status, CopyTaskStatus::Completed);
        let c = repo.find_task("m-1", "c->c").await.unwrap().unwrap();
        assert_eq!(c.status, CopyTaskStatus::Failed);
        assert_eq!(c.error.as_deref(), Some("aborted"));

        let other = repo.find_task("m-2", "a->a").await.unwrap().unwrap();
        assert_eq!(other.status, CopyTaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_terminal_status_never_overwritten() {
        let (_dir, repo) = setup().await;
        repo.create_migration_status("m-1").await.unwrap();

        assert!(repo.set_migration_status("m-1", MigrationProgress::Stalled).await.unwrap());
        assert!(repo.set_migration_status("m-1", MigrationProgress::Running).await.unwrap());
        assert!(repo.set_migration_status("m-1", MigrationProgress::Aborted).await.unwrap());
        assert!(!repo.set_migration_status("m-1", MigrationProgress::Stalled).await.unwrap());
        assert!(!repo
            .finish_migration("m-1", MigrationProgress::Completed, Utc::now())
            .await
            .unwrap());
        assert!(repo
            .finish_migration("m-1", MigrationProgress::Aborted, Utc::now())
            .await
            .unwrap());
        assert!(!repo
            .finish_migration("m-1", MigrationProgress::Aborted, Utc::now())
            .await
            .unwrap());

        assert_eq!(
            repo.get_migration_progress("m-1").await.unwrap(),
            Some(MigrationProgress::Aborted)
        );
        assert!(repo.find_active_migrations().await.unwrap().is_empty());
        assert_eq!(repo.get_migration_progress("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_updated_tasks_ordering() {
        let (_dir, repo) = setup().await;
        repo.create_migration_status("m-1").await.unwrap();
        let before = Utc::now() - Duration::seconds(1);

        let mut first = task("m-1", "zeta", 1, 1);
        first.last_update = Utc::now();
        let mut second = task("m-1", "alpha", 1, 1);
        second.last_update = first.last_update;
        repo.schedule_task(&first).await.unwrap();
        repo.schedule_task(&second).await.unwrap();

        let updates = repo.get_updated_tasks("m-1", before).await.unwrap();
        let names: Vec<_> = updates.iter().map(|t| t.pipeline_name.as_str()).collect();
        assert_eq!(names, vec!["alpha->alpha", "zeta->zeta"]);

        let later = repo
            .get_updated_tasks("m-1", Utc::now() + Duration::seconds(5))
            .await
            .unwrap();
        assert!(later.is_empty());
        assert_eq!(repo.find_active_migrations().await.unwrap(), vec!["m-1".to_string()]);
    }
}
