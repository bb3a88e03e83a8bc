use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{
    entities::{CopyTask, MigrationAggregate, MigrationProgress, MigrationStatus},
    repositories::CopyTaskRepository,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument, warn};

use crate::database::queries;

/// PostgreSQL复制任务队列实现
pub struct PostgresCopyTaskRepository {
    pool: PgPool,
}

impl PostgresCopyTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_copy_task(row: &PgRow) -> MigrationResult<CopyTask> {
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
impl CopyTaskRepository for PostgresCopyTaskRepository {
    async fn ensure_schema(&self) -> MigrationResult<()> {
        for statement in queries::POSTGRES_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(MigrationError::Database)?;
        }
        debug!("PostgreSQL协调表已就绪");
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
