//! 各数据库方言的批量查询构建

use std::fmt;

use chrono::{DateTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::Value;

use super::conditions::{escape_literal, QueryConditions};

/// 源库或目标库的方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySql,
    SQLite,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(SqlDialect::PostgreSQL)
        } else if url.starts_with("mysql://") {
            Ok(SqlDialect::MySql)
        } else if url.starts_with("sqlite:") {
            Ok(SqlDialect::SQLite)
        } else {
            Err(MigrationError::Configuration(format!(
                "无法识别的数据库URL: {url}"
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "postgresql",
            SqlDialect::MySql => "mysql",
            SqlDialect::SQLite => "sqlite",
        }
    }

    pub fn query_builder(&self, schema: Option<String>) -> Box<dyn BatchQueryBuilder> {
        match self {
            SqlDialect::PostgreSQL => Box::new(PostgresQueryBuilder::new(schema)),
            SqlDialect::MySql => Box::new(MySqlQueryBuilder::new(schema)),
            SqlDialect::SQLite => Box::new(SqliteQueryBuilder),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成分批读取和写入用的 SQL
///
/// 条件部分都由 [`QueryConditions`] 展开，所以空条件会得到 `WHERE 1=1`。
/// 索引相关的 `*_script` 方法返回的是一条查询，其结果的第一列是需要依次执行的语句；
/// 返回 `None` 表示该方言不支持此操作。
pub trait BatchQueryBuilder: Send + Sync + fmt::Debug {
    fn dialect(&self) -> SqlDialect;

    fn schema(&self) -> Option<&str> {
        None
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// 单条语句允许的绑定参数上限
    fn max_bind_parameters(&self) -> usize {
        65535
    }

    fn timestamp_literal(&self, ts: DateTime<Utc>) -> String {
        format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.3f"))
    }

    fn table_reference(&self, table: &str) -> String {
        match self.schema() {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    fn quote_columns(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn row_count_query(&self, table: &str, conditions: &QueryConditions) -> String {
        format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table_reference(table),
            conditions.expand()
        )
    }

    fn select_all_query(
        &self,
        table: &str,
        columns: &[String],
        conditions: &QueryConditions,
    ) -> String {
        let projection = if columns.is_empty() {
            "*".to_string()
        } else {
            self.quote_columns(columns)
        };
        format!(
            "SELECT {} FROM {} WHERE {}",
            projection,
            self.table_reference(table),
            conditions.expand()
        )
    }

    /// 按全部排序列做 offset 分页
    fn offset_batch_query(
        &self,
        table: &str,
        order_columns: &[String],
        conditions: &QueryConditions,
        batch_size: u32,
        offset: u64,
    ) -> String;

    /// 按单列顺序读取一批，起始值条件已包含在 conditions 中
    fn keyset_batch_query(
        &self,
        table: &str,
        column: &str,
        conditions: &QueryConditions,
        batch_size: u32,
    ) -> String {
        format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT {}",
            self.table_reference(table),
            conditions.expand(),
            self.quote_identifier(column),
            batch_size
        )
    }

    /// 行号为 batch_size 整数倍的那些行的列值
    fn batch_markers_query(
        &self,
        table: &str,
        column: &str,
        conditions: &QueryConditions,
        batch_size: u32,
    ) -> String {
        let column = self.quote_identifier(column);
        format!(
            "SELECT t.{column}, t.rownum FROM (SELECT {column}, (ROW_NUMBER() OVER (ORDER BY {column})) - 1 AS rownum FROM {} WHERE {}) AS t WHERE t.rownum % {} = 0 ORDER BY t.{column}",
            self.table_reference(table),
            conditions.expand(),
            batch_size
        )
    }

    /// 多行 INSERT，NULL 直接写成字面量，其余值按出现顺序占位
    fn insert_query(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> String {
        let mut index = 0;
        let values = rows
            .iter()
            .map(|row| {
                let cells = row
                    .iter()
                    .map(|value| {
                        if value.is_null() {
                            "NULL".to_string()
                        } else {
                            index += 1;
                            self.placeholder(index)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({cells})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table_reference(table),
            self.quote_columns(columns),
            values
        )
    }

    fn truncate_query(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.table_reference(table))
    }

    fn table_names_query(&self) -> String;

    fn column_names_query(&self, table: &str) -> String;

    /// 最合适的唯一键的列，主键优先，其次列数最少的唯一索引
    fn unique_columns_query(&self, table: &str) -> String;

    fn disable_indexes_script(&self, _table: &str) -> Option<String> {
        None
    }

    fn enable_indexes_script(&self, _table: &str) -> Option<String> {
        None
    }

    fn drop_indexes_script(&self, table: &str) -> Option<String>;

    /// 连接使用率百分比
    fn utilization_query(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresQueryBuilder {
    schema: Option<String>,
}

impl PostgresQueryBuilder {
    pub fn new(schema: Option<String>) -> Self {
        Self { schema }
    }

    fn schema_expression(&self) -> String {
        match &self.schema {
            Some(schema) => format!("'{}'", escape_literal(schema)),
            None => "current_schema()".to_string(),
        }
    }
}

impl BatchQueryBuilder for PostgresQueryBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn timestamp_literal(&self, ts: DateTime<Utc>) -> String {
        format!("'{}+00:00'", ts.format("%Y-%m-%d %H:%M:%S%.3f"))
    }

    fn offset_batch_query(
        &self,
        table: &str,
        order_columns: &[String],
        conditions: &QueryConditions,
        batch_size: u32,
        offset: u64,
    ) -> String {
        format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            self.table_reference(table),
            conditions.expand(),
            self.quote_columns(order_columns),
            offset,
            batch_size
        )
    }

    fn table_names_query(&self) -> String {
        format!(
            "SELECT CAST(table_name AS VARCHAR) FROM information_schema.tables WHERE table_schema = {} AND table_type = 'BASE TABLE'",
            self.schema_expression()
        )
    }

    fn column_names_query(&self, table: &str) -> String {
        format!(
            "SELECT CAST(column_name AS VARCHAR) FROM information_schema.columns WHERE table_schema = {} AND table_name = '{}' ORDER BY ordinal_position",
            self.schema_expression(),
            escape_literal(table)
        )
    }

    fn unique_columns_query(&self, table: &str) -> String {
        format!(
            "SELECT CAST(a.attname AS VARCHAR) FROM pg_attribute a \
             JOIN (SELECT i.indrelid, i.indkey FROM pg_index i \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE i.indisunique AND c.relname = '{}' AND n.nspname = {} \
             ORDER BY i.indisprimary DESC, i.indnatts ASC, i.indexrelid LIMIT 1) idx \
             ON a.attrelid = idx.indrelid AND a.attnum = ANY(idx.indkey) \
             ORDER BY array_position(CAST(idx.indkey AS int2[]), a.attnum)",
            escape_literal(table),
            self.schema_expression()
        )
    }

    fn drop_indexes_script(&self, table: &str) -> Option<String> {
        Some(format!(
            "SELECT 'DROP INDEX ' || quote_ident(n.nspname) || '.' || quote_ident(ic.relname) FROM pg_index i \
             JOIN pg_class ic ON ic.oid = i.indexrelid \
             JOIN pg_class c ON c.oid = i.indrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE NOT i.indisunique AND NOT i.indisprimary AND c.relname = '{}' AND n.nspname = {}",
            escape_literal(table),
            self.schema_expression()
        ))
    }

    fn utilization_query(&self) -> Option<String> {
        Some(
            "SELECT CAST(COUNT(*) * 100.0 / (SELECT CAST(setting AS float8) FROM pg_settings WHERE name = 'max_connections') AS float8) FROM pg_stat_activity WHERE state = 'active'"
                .to_string(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct MySqlQueryBuilder {
    schema: Option<String>,
}

impl MySqlQueryBuilder {
    pub fn new(schema: Option<String>) -> Self {
        Self { schema }
    }

    fn schema_expression(&self) -> String {
        match &self.schema {
            Some(schema) => format!("'{}'", escape_literal(schema)),
            None => "DATABASE()".to_string(),
        }
    }

    fn myisam_keys_script(&self, table: &str, action: &str) -> String {
        format!(
            "SELECT CONCAT('ALTER TABLE `', TABLE_SCHEMA, '`.`', TABLE_NAME, '` {action} KEYS') \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = {} AND TABLE_NAME = '{}' AND ENGINE = 'MyISAM'",
            self.schema_expression(),
            escape_literal(table)
        )
    }
}

impl BatchQueryBuilder for MySqlQueryBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn offset_batch_query(
        &self,
        table: &str,
        order_columns: &[String],
        conditions: &QueryConditions,
        batch_size: u32,
        offset: u64,
    ) -> String {
        format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT {}, {}",
            self.table_reference(table),
            conditions.expand(),
            self.quote_columns(order_columns),
            offset,
            batch_size
        )
    }

    fn table_names_query(&self) -> String {
        format!(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.TABLES WHERE TABLE_SCHEMA = {} AND TABLE_TYPE = 'BASE TABLE'",
            self.schema_expression()
        )
    }

    fn column_names_query(&self, table: &str) -> String {
        format!(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = {} AND TABLE_NAME = '{}' ORDER BY ORDINAL_POSITION",
            self.schema_expression(),
            escape_literal(table)
        )
    }

    fn unique_columns_query(&self, table: &str) -> String {
        let schema = self.schema_expression();
        let table = escape_literal(table);
        format!(
            "SELECT CAST(COLUMN_NAME AS CHAR) FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = {schema} AND TABLE_NAME = '{table}' AND NON_UNIQUE = 0 \
             AND INDEX_NAME = (SELECT INDEX_NAME FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = {schema} AND TABLE_NAME = '{table}' AND NON_UNIQUE = 0 \
             GROUP BY INDEX_NAME ORDER BY INDEX_NAME = 'PRIMARY' DESC, COUNT(*) ASC, INDEX_NAME LIMIT 1) \
             ORDER BY SEQ_IN_INDEX"
        )
    }

    /// InnoDB 忽略 DISABLE KEYS，只对 MyISAM 表生成语句
    fn disable_indexes_script(&self, table: &str) -> Option<String> {
        Some(self.myisam_keys_script(table, "DISABLE"))
    }

    fn enable_indexes_script(&self, table: &str) -> Option<String> {
        Some(self.myisam_keys_script(table, "ENABLE"))
    }

    fn drop_indexes_script(&self, table: &str) -> Option<String> {
        Some(format!(
            "SELECT DISTINCT CONCAT('DROP INDEX `', INDEX_NAME, '` ON `', TABLE_SCHEMA, '`.`', TABLE_NAME, '`') \
             FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = {} AND TABLE_NAME = '{}' AND NON_UNIQUE = 1",
            self.schema_expression(),
            escape_literal(table)
        ))
    }

    fn utilization_query(&self) -> Option<String> {
        Some(
            "SELECT CAST(VARIABLE_VALUE AS DOUBLE) * 100 / @@max_connections FROM performance_schema.global_status WHERE VARIABLE_NAME = 'Threads_connected'"
                .to_string(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SqliteQueryBuilder;

impl BatchQueryBuilder for SqliteQueryBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn max_bind_parameters(&self) -> usize {
        32766
    }

    fn offset_batch_query(
        &self,
        table: &str,
        order_columns: &[String],
        conditions: &QueryConditions,
        batch_size: u32,
        offset: u64,
    ) -> String {
        format!(
            "SELECT * FROM {} WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            self.table_reference(table),
            conditions.expand(),
            self.quote_columns(order_columns),
            batch_size,
            offset
        )
    }

    fn truncate_query(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.table_reference(table))
    }

    fn table_names_query(&self) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
            .to_string()
    }

    fn column_names_query(&self, table: &str) -> String {
        format!(
            "SELECT name FROM pragma_table_info('{}') ORDER BY cid",
            escape_literal(table)
        )
    }

    fn unique_columns_query(&self, table: &str) -> String {
        format!(
            "SELECT name FROM pragma_table_info('{}') WHERE pk > 0 ORDER BY pk",
            escape_literal(table)
        )
    }

    fn drop_indexes_script(&self, table: &str) -> Option<String> {
        Some(format!(
            "SELECT 'DROP INDEX \"' || name || '\"' FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = '{}' AND sql IS NOT NULL AND sql NOT LIKE 'CREATE UNIQUE%'",
            escape_literal(table)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(SqlDialect::from_url("postgres://h/db").unwrap(), SqlDialect::PostgreSQL);
        assert_eq!(SqlDialect::from_url("mysql://h/db").unwrap(), SqlDialect::MySql);
        assert_eq!(SqlDialect::from_url("sqlite::memory:").unwrap(), SqlDialect::SQLite);
        assert!(SqlDialect::from_url("oracle://h/db").is_err());
    }

    #[test]
    fn test_offset_queries_per_dialect() {
        let conditions = QueryConditions::default();
        let order = columns(&["a", "b"]);

        assert_eq!(
            PostgresQueryBuilder::new(Some("public".into()))
                .offset_batch_query("items", &order, &conditions, 100, 200),
            "SELECT * FROM \"public\".\"items\" WHERE 1=1 ORDER BY \"a\", \"b\" OFFSET 200 ROWS FETCH NEXT 100 ROWS ONLY"
        );
        assert_eq!(
            MySqlQueryBuilder::new(None).offset_batch_query("items", &order, &conditions, 100, 200),
            "SELECT * FROM `items` WHERE 1=1 ORDER BY `a`, `b` LIMIT 200, 100"
        );
        assert_eq!(
            SqliteQueryBuilder.offset_batch_query("items", &order, &conditions, 100, 200),
            "SELECT * FROM \"items\" WHERE 1=1 ORDER BY \"a\", \"b\" LIMIT 100 OFFSET 200"
        );
    }

    #[test]
    fn test_keyset_and_marker_queries() {
        let builder = SqliteQueryBuilder;
        let conditions = QueryConditions::for_table("ydeployments", "DEFAULT")
            .with(format!("{} >= {}", builder.quote_identifier("pk"), builder.placeholder(1)));

        assert_eq!(
            builder.keyset_batch_query("ydeployments", "pk", &conditions, 10),
            "SELECT * FROM \"ydeployments\" WHERE TypeSystemName = 'DEFAULT' and \"pk\" >= ? ORDER BY \"pk\" LIMIT 10"
        );
        assert_eq!(
            builder.batch_markers_query("items", "pk", &QueryConditions::default(), 3),
            "SELECT t.\"pk\", t.rownum FROM (SELECT \"pk\", (ROW_NUMBER() OVER (ORDER BY \"pk\")) - 1 AS rownum FROM \"items\" WHERE 1=1) AS t WHERE t.rownum % 3 = 0 ORDER BY t.\"pk\""
        );
    }

    #[test]
    fn test_insert_query_inlines_nulls() {
        let rows = vec![
            vec![Value::Int(1), Value::Null],
            vec![Value::Int(2), Value::from("x")],
        ];
        let cols = columns(&["id", "name"]);

        assert_eq!(
            PostgresQueryBuilder::default().insert_query("t", &cols, &rows),
            "INSERT INTO \"t\" (\"id\", \"name\") VALUES ($1, NULL), ($2, $3)"
        );
        assert_eq!(
            MySqlQueryBuilder::default().insert_query("t", &cols, &rows),
            "INSERT INTO `t` (`id`, `name`) VALUES (?, NULL), (?, ?)"
        );
    }

    #[test]
    fn test_timestamp_literals() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(SqliteQueryBuilder.timestamp_literal(ts), "'2024-05-06 07:08:09.000'");
        assert_eq!(
            PostgresQueryBuilder::default().timestamp_literal(ts),
            "'2024-05-06 07:08:09.000+00:00'"
        );
    }

    #[test]
    fn test_index_scripts_support() {
        assert!(PostgresQueryBuilder::default().disable_indexes_script("t").is_none());
        assert!(SqliteQueryBuilder.enable_indexes_script("t").is_none());
        let disable = MySqlQueryBuilder::default().disable_indexes_script("t").unwrap();
        assert!(disable.contains("'` DISABLE KEYS'"));
        assert!(disable.contains("ENGINE = 'MyISAM'"));
        assert!(disable.contains("TABLE_SCHEMA = DATABASE() AND TABLE_NAME = 't'"));
        let enable = MySqlQueryBuilder::new(Some("shop".into()))
            .enable_indexes_script("o'rders")
            .unwrap();
        assert!(enable.contains("'` ENABLE KEYS'"));
        assert!(enable.contains("TABLE_SCHEMA = 'shop' AND TABLE_NAME = 'o''rders'"));
        assert!(SqliteQueryBuilder.drop_indexes_script("t").is_some());
        assert_eq!(SqliteQueryBuilder.truncate_query("t"), "DELETE FROM \"t\"");
        assert_eq!(
            MySqlQueryBuilder::new(Some("shop".into())).truncate_query("t"),
            "TRUNCATE TABLE `shop`.`t`"
        );
    }
}
