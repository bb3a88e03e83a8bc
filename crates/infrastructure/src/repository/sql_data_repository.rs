use std::slice;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{DatabaseConfig, MigrationError, MigrationResult};
use migration_domain::{DataRepository, DataSet, Value};
use tracing::{debug, info, instrument, trace, warn};

use super::conditions::{is_migration_table, QueryConditions};
use super::dialect::BatchQueryBuilder;
use super::pool::DataPool;
use crate::database::manager::mask_url;

/// 基于 sqlx 的源库/目标库访问
#[derive(Debug)]
pub struct SqlDataRepository {
    pool: DataPool,
    builder: Box<dyn BatchQueryBuilder>,
    type_system_name: String,
}

impl SqlDataRepository {
    pub fn new(pool: DataPool, schema: Option<String>, type_system_name: impl Into<String>) -> Self {
        let builder = pool.dialect().query_builder(schema);
        Self {
            pool,
            builder,
            type_system_name: type_system_name.into(),
        }
    }

    pub async fn connect(config: &DatabaseConfig, type_system_name: &str) -> MigrationResult<Self> {
        let pool = DataPool::connect(config).await?;
        info!("数据库已连接: {} ({})", mask_url(&config.url), pool.dialect());
        Ok(Self::new(pool, config.schema.clone(), type_system_name))
    }

    pub fn pool(&self) -> &DataPool {
        &self.pool
    }

    pub fn query_builder(&self) -> &dyn BatchQueryBuilder {
        self.builder.as_ref()
    }

    fn conditions(&self, table: &str, since: Option<DateTime<Utc>>) -> QueryConditions {
        QueryConditions::for_table(table, &self.type_system_name)
            .modified_after(since, |ts| self.builder.timestamp_literal(ts))
    }

    /// 执行索引脚本：先查询出语句，再逐条执行
    async fn run_script(
        &self,
        script: Option<String>,
        table: &str,
        operation: &str,
    ) -> MigrationResult<usize> {
        let script = script.ok_or_else(|| {
            MigrationError::Unsupported(format!(
                "{} 不支持{}: {}",
                self.builder.dialect(),
                operation,
                table
            ))
        })?;

        let statements = self.pool.fetch_strings(&script).await?;
        for statement in &statements {
            debug!("执行语句: {}", statement);
            self.pool.execute(statement, &[]).await?;
        }
        Ok(statements.len())
    }

    async fn fetch_all_columns(
        &self,
        table: &str,
        ignore_columns: &[String],
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let sql = self
            .builder
            .select_all_query(table, &[], &self.conditions(table, since));
        let data = self.pool.fetch_dataset(&sql, &[]).await?;
        without_columns(data, ignore_columns)
    }
}

/// 去掉被忽略的列，大小写不敏感
fn without_columns(data: DataSet, ignore_columns: &[String]) -> MigrationResult<DataSet> {
    if ignore_columns.is_empty() {
        return Ok(data);
    }

    let keep: Vec<usize> = data
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !ignore_columns.iter().any(|i| i.eq_ignore_ascii_case(&c.name)))
        .map(|(index, _)| index)
        .collect();

    let columns = keep.iter().map(|&i| data.columns()[i].clone()).collect();
    let rows = data
        .into_rows()
        .into_iter()
        .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
        .collect();

    DataSet::new(columns, rows)
}

#[async_trait]
impl DataRepository for SqlDataRepository {
    fn dialect_name(&self) -> &'static str {
        self.builder.dialect().as_str()
    }

    async fn validate_connection(&self) -> MigrationResult<bool> {
        match self.pool.health_check().await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("数据库连接校验失败: {}", e);
                Ok(false)
            }
        }
    }

    async fn get_row_count(&self, table: &str) -> MigrationResult<i64> {
        let sql = self.builder.row_count_query(table, &self.conditions(table, None));
        self.pool.fetch_i64(&sql).await
    }

    async fn get_row_count_modified_after(
        &self,
        table: &str,
        since: DateTime<Utc>,
    ) -> MigrationResult<i64> {
        let sql = self
            .builder
            .row_count_query(table, &self.conditions(table, Some(since)));
        self.pool.fetch_i64(&sql).await
    }

    async fn get_all(&self, table: &str, ignore_columns: &[String]) -> MigrationResult<DataSet> {
        self.fetch_all_columns(table, ignore_columns, None).await
    }

    async fn get_all_modified_after(
        &self,
        table: &str,
        ignore_columns: &[String],
        since: DateTime<Utc>,
    ) -> MigrationResult<DataSet> {
        self.fetch_all_columns(table, ignore_columns, Some(since)).await
    }

    #[instrument(skip(self, order_columns), fields(dialect = %self.builder.dialect()))]
    async fn get_batch_without_identifier(
        &self,
        table: &str,
        order_columns: &[String],
        batch_size: u32,
        offset: u64,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let sql = self.builder.offset_batch_query(
            table,
            order_columns,
            &self.conditions(table, since),
            batch_size,
            offset,
        );
        self.pool.fetch_dataset(&sql, &[]).await
    }

    #[instrument(skip(self, last_value), fields(dialect = %self.builder.dialect()))]
    async fn get_batch_ordered_by_column(
        &self,
        table: &str,
        column: &str,
        last_value: Option<&Value>,
        batch_size: u32,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let mut conditions = self.conditions(table, since);
        let params: &[Value] = match last_value {
            Some(value) if value.is_null() => {
                return Err(MigrationError::DatabaseOperation(format!(
                    "表 {table} 的列 {column} 不能以 NULL 作为起始值"
                )));
            }
            Some(value) => {
                conditions.push(format!(
                    "{} >= {}",
                    self.builder.quote_identifier(column),
                    self.builder.placeholder(1)
                ));
                slice::from_ref(value)
            }
            None => &[],
        };

        let sql = self
            .builder
            .keyset_batch_query(table, column, &conditions, batch_size);
        self.pool.fetch_dataset(&sql, params).await
    }

    async fn get_batch_markers_ordered_by_column(
        &self,
        table: &str,
        column: &str,
        batch_size: u32,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<DataSet> {
        let sql = self.builder.batch_markers_query(
            table,
            column,
            &self.conditions(table, since),
            batch_size.max(1),
        );
        self.pool.fetch_dataset(&sql, &[]).await
    }

    async fn get_unique_columns(&self, table: &str) -> MigrationResult<Vec<String>> {
        self.pool
            .fetch_strings(&self.builder.unique_columns_query(table))
            .await
    }

    async fn get_null_count(
        &self,
        table: &str,
        column: &str,
        since: Option<DateTime<Utc>>,
    ) -> MigrationResult<i64> {
        let conditions = self
            .conditions(table, since)
            .with(format!("{} IS NULL", self.builder.quote_identifier(column)));
        self.pool
            .fetch_i64(&self.builder.row_count_query(table, &conditions))
            .await
    }

    async fn get_all_table_names(&self) -> MigrationResult<Vec<String>> {
        let mut tables: Vec<String> = self
            .pool
            .fetch_strings(&self.builder.table_names_query())
            .await?
            .into_iter()
            .filter(|t| !is_migration_table(t))
            .collect();
        tables.sort_by_key(|t| t.to_lowercase());
        Ok(tables)
    }

    async fn get_all_column_names(&self, table: &str) -> MigrationResult<Vec<String>> {
        self.pool
            .fetch_strings(&self.builder.column_names_query(table))
            .await
    }

    async fn truncate_table(&self, table: &str) -> MigrationResult<u64> {
        let affected = self
            .pool
            .execute(&self.builder.truncate_query(table), &[])
            .await?;
        info!("已清空表 {} ({} 行)", table, affected);
        Ok(affected)
    }

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> MigrationResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(MigrationError::Internal(format!(
                "向表 {table} 插入数据时没有列"
            )));
        }

        let rows_per_statement = (self.builder.max_bind_parameters() / columns.len()).max(1);
        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement) {
            let sql = self.builder.insert_query(table, columns, chunk);
            let params: Vec<Value> = chunk
                .iter()
                .flatten()
                .filter(|v| !v.is_null())
                .cloned()
                .collect();
            inserted += self.pool.execute(&sql, &params).await?;
        }
        Ok(inserted)
    }

    async fn disable_indexes_of_table(&self, table: &str) -> MigrationResult<usize> {
        self.run_script(self.builder.disable_indexes_script(table), table, "禁用索引")
            .await
    }

    async fn enable_indexes_of_table(&self, table: &str) -> MigrationResult<usize> {
        self.run_script(self.builder.enable_indexes_script(table), table, "启用索引")
            .await
    }

    async fn drop_indexes_of_table(&self, table: &str) -> MigrationResult<usize> {
        self.run_script(self.builder.drop_indexes_script(table), table, "删除索引")
            .await
    }

    async fn get_database_utilization(&self) -> Option<f64> {
        let query = self.builder.utilization_query()?;
        match self.pool.fetch_optional_f64(&query).await {
            Ok(value) => value,
            Err(e) => {
                trace!("无法读取数据库负载: {}", e);
                None
            }
        }
    }
}
