use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable run configuration shared by the scheduler, monitor and workers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationConfig {
    /// 是否把任务分配到集群中的所有节点
    pub cluster_mode: bool,
    pub batch_size: u32,
    /// 超过该时间没有任何任务更新则认为迁移停滞
    pub stalled_timeout_seconds: u64,
    /// 增量模式：只复制该时间之后修改过的行
    pub incremental_since: Option<DateTime<Utc>>,
    /// 部署表的默认过滤条件使用的类型系统名
    pub type_system_name: String,
    /// 单节点并行复制的表数量
    pub max_parallel_table_copy: usize,
    /// 单表并行读取的批次数量
    pub max_parallel_batches: usize,
    pub truncate_enabled: bool,
    /// 复制期间禁用目标表索引，只对 MySQL 的 MyISAM 表生效，InnoDB 会忽略
    pub disable_indexes: bool,
    pub drop_indexes: bool,
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            cluster_mode: false,
            batch_size: 1000,
            stalled_timeout_seconds: 7200, // 2小时无进展视为停滞
            incremental_since: None,
            type_system_name: "DEFAULT".to_string(),
            max_parallel_table_copy: 2,
            max_parallel_batches: 4,
            truncate_enabled: true,
            disable_indexes: false,
            drop_indexes: false,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl MigrationConfig {
    pub fn is_incremental(&self) -> bool {
        self.incremental_since.is_some()
    }

    /// 表名过滤，大小写不敏感；include为空表示全部包含
    pub fn accepts_table(&self, table: &str) -> bool {
        let included = self.include_tables.is_empty()
            || self
                .include_tables
                .iter()
                .any(|t| t.eq_ignore_ascii_case(table));
        let excluded = self
            .exclude_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table));
        included && !excluded
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("批次大小必须大于0"));
        }

        if self.stalled_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("停滞超时时间必须大于0"));
        }

        if self.max_parallel_table_copy == 0 || self.max_parallel_batches == 0 {
            return Err(anyhow::anyhow!("并行度必须大于0"));
        }

        if self.type_system_name.is_empty() {
            return Err(anyhow::anyhow!("类型系统名不能为空"));
        }

        if self.drop_indexes && self.disable_indexes {
            return Err(anyhow::anyhow!("disable_indexes与drop_indexes不能同时开启"));
        }

        Ok(())
    }
}
