use std::sync::Arc;
use std::time::Duration;

use migration_core::{DatabaseConfig, MigrationError, MigrationResult};
use migration_domain::repositories::{ClusterNodeRepository, CopyTaskRepository};
use tracing::info;

use super::postgres::{PostgresClusterNodeRepository, PostgresCopyTaskRepository};
use super::sqlite::{SqliteClusterNodeRepository, SqliteCopyTaskRepository};

/// Coordination database type detection
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(DatabaseType::PostgreSQL)
        } else if url.starts_with("mysql://") {
            Err(MigrationError::Unsupported(
                "协调表不支持MySQL，请使用PostgreSQL或SQLite".to_string(),
            ))
        } else {
            Ok(DatabaseType::SQLite)
        }
    }
}

/// 隐藏URL中的密码，用于日志输出
pub fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Coordination connection pool
pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    /// Create pool from URL with automatic type detection
    pub async fn new(config: &DatabaseConfig) -> MigrationResult<Self> {
        let db_type = DatabaseType::from_url(&config.url)?;
        let acquire_timeout = Duration::from_secs(config.connection_timeout_seconds);

        match db_type {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> MigrationResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(MigrationError::Database)?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(MigrationError::Database)?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// Coordination database manager
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> MigrationResult<Self> {
        let pool = DatabasePool::new(config).await?;
        info!(
            "协调数据库已连接: {} ({:?})",
            mask_url(&config.url),
            pool.database_type()
        );
        Ok(Self { pool })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    pub async fn health_check(&self) -> MigrationResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    /// Factory method for the copy task queue
    pub fn copy_task_repository(&self) -> Arc<dyn CopyTaskRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresCopyTaskRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => Arc::new(SqliteCopyTaskRepository::new(pool.clone())),
        }
    }

    /// Factory method for the node heartbeat table
    pub fn cluster_node_repository(&self) -> Arc<dyn ClusterNodeRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresClusterNodeRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => {
                Arc::new(SqliteClusterNodeRepository::new(pool.clone()))
            }
        }
    }
}
