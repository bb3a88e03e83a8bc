//! 列类型化的表格结果集

use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 动态类型的单元格值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Text(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Json(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::Time(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{v}"),
            Value::TimestampTz(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// 列描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    pub name: String,
    /// 数据库厂商的类型名
    pub type_name: String,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl DataColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            precision: None,
            scale: None,
        }
    }
}

/// 不可变结果集，每行的值个数与列数一致
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    columns: Vec<DataColumn>,
    rows: Vec<Vec<Value>>,
}

impl DataSet {
    pub fn new(columns: Vec<DataColumn>, rows: Vec<Vec<Value>>) -> MigrationResult<Self> {
        if let Some(index) = rows.iter().position(|row| row.len() != columns.len()) {
            return Err(MigrationError::Internal(format!(
                "第 {} 行有 {} 个值，但结果集有 {} 列",
                index,
                rows[index].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    /// 大小写不敏感的列定位
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        !name.is_empty() && self.column_index(name).is_some()
    }

    pub fn column_value<'a>(&self, row: &'a [Value], name: &str) -> MigrationResult<&'a Value> {
        let index = self
            .column_index(name)
            .ok_or_else(|| MigrationError::ColumnNotFound {
                column: name.to_string(),
            })?;
        row.get(index).ok_or_else(|| MigrationError::ColumnNotFound {
            column: name.to_string(),
        })
    }

    /// 取出某一列的全部值
    pub fn column_values(&self, name: &str) -> MigrationResult<Vec<Value>> {
        let index = self
            .column_index(name)
            .ok_or_else(|| MigrationError::ColumnNotFound {
                column: name.to_string(),
            })?;
        Ok(self.rows.iter().map(|row| row[index].clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataSet {
        DataSet::new(
            vec![DataColumn::new("PK", "BIGINT"), DataColumn::new("Name", "TEXT")],
            vec![
                vec![Value::Int(1), Value::from("alpha")],
                vec![Value::Int(2), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let data = sample();

        assert!(data.has_column("pk"));
        assert!(data.has_column("NAME"));
        assert!(!data.has_column(""));
        assert!(!data.has_column("missing"));

        let row = &data.rows()[0];
        assert_eq!(data.column_value(row, "name").unwrap(), &Value::from("alpha"));
    }

    #[test]
    fn test_missing_column_is_error() {
        let data = sample();
        let row = &data.rows()[1];

        let err = data.column_value(row, "created").unwrap_err();
        assert!(matches!(err, MigrationError::ColumnNotFound { column } if column == "created"));
        assert!(data.column_values("created").is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = DataSet::new(
            vec![DataColumn::new("a", "INT")],
            vec![vec![Value::Int(1), Value::Int(2)]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_column_values_and_emptiness() {
        let data = sample();
        assert_eq!(data.column_values("pk").unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert!(data.is_not_empty());
        assert!(DataSet::empty().is_empty());
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::Text("42".to_string()).as_i64(), Some(42));
    }
}
