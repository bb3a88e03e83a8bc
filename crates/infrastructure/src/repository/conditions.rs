//! WHERE 条件的组装

use chrono::{DateTime, Utc};

/// 部署表名后缀，这类表总是按类型系统过滤
pub const DEPLOYMENTS_TABLE: &str = "ydeployments";
/// 增量模式使用的修改时间列
pub const MODIFIED_TS_COLUMN: &str = "modifiedts";
/// 迁移工具自身的表，不参与复制
pub const MIGRATION_TABLES_PREFIX: &str = "MIGRATIONTOOLKIT_";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryConditions {
    conditions: Vec<String>,
}

impl QueryConditions {
    /// 表的默认条件：部署表附加 TypeSystemName 过滤
    pub fn for_table(table: &str, type_system_name: &str) -> Self {
        let mut conditions = Self::default();
        if table.to_lowercase().ends_with(DEPLOYMENTS_TABLE) {
            conditions.push(format!(
                "TypeSystemName = '{}'",
                escape_literal(type_system_name)
            ));
        }
        conditions
    }

    pub fn push(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    pub fn with(mut self, condition: impl Into<String>) -> Self {
        self.push(condition);
        self
    }

    /// `modifiedts > <literal>`，时间戳字面量由方言格式化
    pub fn modified_after(self, since: Option<DateTime<Utc>>, literal: impl Fn(DateTime<Utc>) -> String) -> Self {
        match since {
            Some(ts) => self.with(format!("{} > {}", MODIFIED_TS_COLUMN, literal(ts))),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn expand(&self) -> String {
        if self.conditions.is_empty() {
            "1=1".to_string()
        } else {
            self.conditions.join(" and ")
        }
    }
}

pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn is_migration_table(table: &str) -> bool {
    table
        .to_uppercase()
        .starts_with(MIGRATION_TABLES_PREFIX)
}
