//! 基于临时文件的 SQLite 测试数据库

use std::sync::Arc;

use anyhow::Result;
use migration_core::DatabaseConfig;
use migration_domain::{CopyTaskRepository, DataRepository, Value};
use migration_infrastructure::database::sqlite::SqliteCopyTaskRepository;
use migration_infrastructure::SqlDataRepository;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::helpers::sqlite_url;

/// 一个临时目录里的三个数据库：源库、目标库和协调库
pub struct SqliteTestDatabases {
    dir: TempDir,
    pub source: Arc<SqlDataRepository>,
    pub target: Arc<SqlDataRepository>,
    pub coordination: SqlitePool,
    pub task_repository: Arc<SqliteCopyTaskRepository>,
}

impl SqliteTestDatabases {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;

        let source = SqlDataRepository::connect(
            &DatabaseConfig::new(sqlite_url(dir.path(), "source.db")),
            "DEFAULT",
        )
        .await?;
        let target = SqlDataRepository::connect(
            &DatabaseConfig::new(sqlite_url(dir.path(), "target.db")),
            "DEFAULT",
        )
        .await?;

        let coordination = SqlitePool::connect(&sqlite_url(dir.path(), "coordination.db")).await?;
        let task_repository = Arc::new(SqliteCopyTaskRepository::new(coordination.clone()));
        task_repository.ensure_schema().await?;

        Ok(Self {
            dir,
            source: Arc::new(source),
            target: Arc::new(target),
            coordination,
            task_repository,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// 在源库和目标库创建同一张表
    pub async fn create_table_on_both(&self, ddl: &str) -> Result<()> {
        self.source.pool().execute(ddl, &[]).await?;
        self.target.pool().execute(ddl, &[]).await?;
        Ok(())
    }

    /// 向源库插入 count 行 (id, name)
    pub async fn seed_source(&self, table: &str, count: i64) -> Result<()> {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows: Vec<Vec<Value>> = (1..=count)
            .map(|i| vec![Value::Int(i), Value::from(format!("row-{i}"))])
            .collect();
        self.source.insert_batch(table, &columns, &rows).await?;
        Ok(())
    }

    pub async fn target_count(&self, table: &str) -> Result<i64> {
        Ok(self.target.get_row_count(table).await?)
    }
}
