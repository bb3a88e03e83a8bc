use std::time::Duration;

use migration_core::{DatabaseConfig, MigrationError, MigrationResult};
use migration_domain::{DataSet, Value};
use sqlx::{MySqlPool, PgPool, Row, SqlitePool};

use super::codec::{
    bind_mysql, bind_postgres, bind_sqlite, decode_mysql, decode_postgres, decode_sqlite,
    rows_to_dataset,
};
use super::dialect::SqlDialect;

/// 源库或目标库的连接池
#[derive(Debug, Clone)]
pub enum DataPool {
    PostgreSQL(PgPool),
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DataPool {
    pub async fn connect(config: &DatabaseConfig) -> MigrationResult<Self> {
        let acquire_timeout = Duration::from_secs(config.connection_timeout_seconds);

        match SqlDialect::from_url(&config.url)? {
            SqlDialect::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DataPool::PostgreSQL(pool))
            }
            SqlDialect::MySql => {
                let pool = sqlx::mysql::MySqlPoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DataPool::MySql(pool))
            }
            SqlDialect::SQLite => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DataPool::SQLite(pool))
            }
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        match self {
            DataPool::PostgreSQL(_) => SqlDialect::PostgreSQL,
            DataPool::MySql(_) => SqlDialect::MySql,
            DataPool::SQLite(_) => SqlDialect::SQLite,
        }
    }

    pub async fn fetch_dataset(&self, sql: &str, params: &[Value]) -> MigrationResult<DataSet> {
        match self {
            DataPool::PostgreSQL(pool) => {
                let query = params
                    .iter()
                    .fold(sqlx::query(sql), |q, value| bind_postgres(q, value));
                let rows = query.fetch_all(pool).await.map_err(MigrationError::Database)?;
                rows_to_dataset(&rows, decode_postgres)
            }
            DataPool::MySql(pool) => {
                let query = params
                    .iter()
                    .fold(sqlx::query(sql), |q, value| bind_mysql(q, value));
                let rows = query.fetch_all(pool).await.map_err(MigrationError::Database)?;
                rows_to_dataset(&rows, decode_mysql)
            }
            DataPool::SQLite(pool) => {
                let query = params
                    .iter()
                    .fold(sqlx::query(sql), |q, value| bind_sqlite(q, value));
                let rows = query.fetch_all(pool).await.map_err(MigrationError::Database)?;
                rows_to_dataset(&rows, decode_sqlite)
            }
        }
    }

    /// 执行语句，返回受影响的行数
    pub async fn execute(&self, sql: &str, params: &[Value]) -> MigrationResult<u64> {
        let affected = match self {
            DataPool::PostgreSQL(pool) => params
                .iter()
                .fold(sqlx::query(sql), |q, value| bind_postgres(q, value))
                .execute(pool)
                .await
                .map_err(MigrationError::Database)?
                .rows_affected(),
            DataPool::MySql(pool) => params
                .iter()
                .fold(sqlx::query(sql), |q, value| bind_mysql(q, value))
                .execute(pool)
                .await
                .map_err(MigrationError::Database)?
                .rows_affected(),
            DataPool::SQLite(pool) => params
                .iter()
                .fold(sqlx::query(sql), |q, value| bind_sqlite(q, value))
                .execute(pool)
                .await
                .map_err(MigrationError::Database)?
                .rows_affected(),
        };
        Ok(affected)
    }

    /// 查询第一列的全部字符串值
    pub async fn fetch_strings(&self, sql: &str) -> MigrationResult<Vec<String>> {
        let values = match self {
            DataPool::PostgreSQL(pool) => sqlx::query(sql)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<Vec<_>, _>>()?,
            DataPool::MySql(pool) => sqlx::query(sql)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<Vec<_>, _>>()?,
            DataPool::SQLite(pool) => sqlx::query(sql)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(values)
    }

    pub async fn fetch_i64(&self, sql: &str) -> MigrationResult<i64> {
        let value: i64 = match self {
            DataPool::PostgreSQL(pool) => sqlx::query(sql).fetch_one(pool).await?.try_get(0)?,
            DataPool::MySql(pool) => sqlx::query(sql).fetch_one(pool).await?.try_get(0)?,
            DataPool::SQLite(pool) => sqlx::query(sql).fetch_one(pool).await?.try_get(0)?,
        };
        Ok(value)
    }

    pub async fn fetch_optional_f64(&self, sql: &str) -> MigrationResult<Option<f64>> {
        let value = match self {
            DataPool::PostgreSQL(pool) => sqlx::query(sql)
                .fetch_optional(pool)
                .await?
                .map(|row| row.try_get::<Option<f64>, _>(0))
                .transpose()?
                .flatten(),
            DataPool::MySql(pool) => sqlx::query(sql)
                .fetch_optional(pool)
                .await?
                .map(|row| row.try_get::<Option<f64>, _>(0))
                .transpose()?
                .flatten(),
            DataPool::SQLite(pool) => sqlx::query(sql)
                .fetch_optional(pool)
                .await?
                .map(|row| row.try_get::<Option<f64>, _>(0))
                .transpose()?
                .flatten(),
        };
        Ok(value)
    }

    pub async fn health_check(&self) -> MigrationResult<()> {
        self.execute("SELECT 1", &[]).await.map(|_| ())
    }

    pub async fn close(&self) {
        match self {
            DataPool::PostgreSQL(pool) => pool.close().await,
            DataPool::MySql(pool) => pool.close().await,
            DataPool::SQLite(pool) => pool.close().await,
        }
    }
}
