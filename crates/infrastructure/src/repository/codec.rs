//! 行解码与参数绑定，每个驱动一套

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{DataColumn, DataSet, Value};
use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::postgres::{PgArguments, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::types::Json;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use uuid::Uuid;

/// 把一组行转换为 [`DataSet`]，列信息取自第一行
pub fn rows_to_dataset<R, F>(rows: &[R], decode: F) -> MigrationResult<DataSet>
where
    R: Row,
    F: Fn(&R, usize, &str) -> MigrationResult<Value>,
{
    let Some(first) = rows.first() else {
        return Ok(DataSet::empty());
    };

    let columns: Vec<DataColumn> = first
        .columns()
        .iter()
        .map(|c| DataColumn::new(c.name(), c.type_info().name()))
        .collect();

    let mut data = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            values.push(decode(row, index, &column.type_name)?);
        }
        data.push(values);
    }

    DataSet::new(columns, data)
}

fn unsupported(type_name: &str, index: usize) -> MigrationError {
    MigrationError::Unsupported(format!("第 {index} 列的类型 {type_name} 无法读取"))
}

fn unsigned_value(v: u64) -> Value {
    i64::try_from(v)
        .map(Value::Int)
        .unwrap_or_else(|_| Value::Decimal(BigDecimal::from(v)))
}

pub fn decode_postgres(row: &PgRow, index: usize, type_name: &str) -> MigrationResult<Value> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)?
            .map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.map(Value::Int),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(index)?
            .map(Value::Decimal),
        "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes),
        "UUID" => row.try_get::<Option<Uuid>, _>(index)?.map(Value::Uuid),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(Value::Json),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index)?.map(Value::Time),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(Value::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Value::TimestampTz),
        other => row
            .try_get::<Option<String>, _>(index)
            .map_err(|_| unsupported(other, index))?
            .map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

pub fn decode_mysql(row: &MySqlRow, index: usize, type_name: &str) -> MigrationResult<Value> {
    let value = match type_name {
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.map(Value::Bool),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<Option<u64>, _>(index)?.map(unsigned_value),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(index)?.map(Value::Int)
        }
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| Value::Float(v.into())),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index)?.map(Value::Float),
        "DECIMAL" => row
            .try_get::<Option<BigDecimal>, _>(index)?
            .map(Value::Decimal),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Value::Date),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index)?.map(Value::Time),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(Value::Timestamp),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Value::TimestampTz),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(index)?
            .map(Value::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            row.try_get::<Option<Vec<u8>>, _>(index)?.map(Value::Bytes)
        }
        other => match row.try_get::<Option<String>, _>(index) {
            Ok(v) => v.map(Value::Text),
            Err(_) => row
                .try_get::<Option<Vec<u8>>, _>(index)
                .map_err(|_| unsupported(other, index))?
                .map(Value::Bytes),
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

type SqliteDecoder = fn(&SqliteRow, usize) -> Result<Value, sqlx::Error>;

fn sqlite_bool(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    row.try_get::<bool, _>(index).map(Value::Bool)
}

fn sqlite_int(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    row.try_get::<i64, _>(index).map(Value::Int)
}

fn sqlite_float(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    row.try_get::<f64, _>(index).map(Value::Float)
}

fn sqlite_text(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    row.try_get::<String, _>(index).map(Value::Text)
}

fn sqlite_bytes(row: &SqliteRow, index: usize) -> Result<Value, sqlx::Error> {
    row.try_get::<Vec<u8>, _>(index).map(Value::Bytes)
}

/// SQLite 的列类型只是提示，按存储类依次尝试
pub fn decode_sqlite(row: &SqliteRow, index: usize, type_name: &str) -> MigrationResult<Value> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(Value::Null);
    }

    let attempts: &[SqliteDecoder] = match type_name {
        "BOOLEAN" => &[sqlite_bool, sqlite_int, sqlite_text],
        "BLOB" => &[sqlite_bytes, sqlite_text],
        "REAL" => &[sqlite_float, sqlite_int, sqlite_text],
        _ => &[sqlite_int, sqlite_float, sqlite_text, sqlite_bytes],
    };

    attempts
        .iter()
        .find_map(|decode| decode(row, index).ok())
        .ok_or_else(|| unsupported(type_name, index))
}

pub fn bind_postgres<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
        Value::Uuid(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::TimestampTz(v) => query.bind(*v),
    }
}

pub fn bind_mysql<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
        Value::Uuid(v) => query.bind(v.to_string()),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::TimestampTz(v) => query.bind(*v),
    }
}

pub fn bind_sqlite<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(v.to_string()),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Json(v) => query.bind(Json(v)),
        Value::Uuid(v) => query.bind(v.to_string()),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Timestamp(v) => query.bind(*v),
        Value::TimestampTz(v) => query.bind(v.to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_sqlite_decode_follows_storage_class() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        let rows = sqlx::query(
            "SELECT 42 AS i, 1.5 AS f, 'abc' AS t, X'0102' AS b, NULL AS n",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let data = rows_to_dataset(&rows, decode_sqlite).unwrap();
        let row = &data.rows()[0];

        assert_eq!(data.column_names(), vec!["i", "f", "t", "b", "n"]);
        assert_eq!(row[0], Value::Int(42));
        assert_eq!(row[1], Value::Float(1.5));
        assert_eq!(row[2], Value::from("abc"));
        assert_eq!(row[3], Value::Bytes(vec![1, 2]));
        assert_eq!(row[4], Value::Null);
    }

    #[tokio::test]
    async fn test_sqlite_bind_round_trips_through_table() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER, amount TEXT, ok BOOLEAN)")
            .execute(&pool)
            .await
            .unwrap();

        let values = vec![
            Value::Int(7),
            Value::Decimal("12.50".parse().unwrap()),
            Value::Bool(true),
        ];
        let mut query = sqlx::query("INSERT INTO t VALUES (?, ?, ?)");
        for value in &values {
            query = bind_sqlite(query, value);
        }
        query.execute(&pool).await.unwrap();

        let rows = sqlx::query("SELECT id, amount, ok FROM t")
            .fetch_all(&pool)
            .await
            .unwrap();
        let data = rows_to_dataset(&rows, decode_sqlite).unwrap();

        assert_eq!(
            data.rows()[0],
            vec![Value::Int(7), Value::from("12.50"), Value::Bool(true)]
        );
    }

    #[test]
    fn test_unsigned_overflow_becomes_decimal() {
        assert_eq!(unsigned_value(5), Value::Int(5));
        assert!(matches!(unsigned_value(u64::MAX), Value::Decimal(_)));
    }
}
