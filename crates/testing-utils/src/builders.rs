//! 测试数据构建器，提供合理的默认值

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use migration_core::MigrationConfig;
use migration_domain::{
    CopyContext, CopyItem, CopyTask, CopyTaskStatus, DataRepository, MigrationContext,
    NodeDirectory,
};
use migration_infrastructure::DefaultPerformanceProfiler;

/// Builder for creating test CopyTask entities
pub struct CopyTaskBuilder {
    task: CopyTask,
}

impl CopyTaskBuilder {
    pub fn new(migration_id: &str, table: &str) -> Self {
        Self {
            task: CopyTask::pending(migration_id, &CopyItem::new(table, table), 0),
        }
    }

    pub fn with_tables(mut self, source: &str, target: &str) -> Self {
        let item = CopyItem::new(source, target);
        self.task.pipeline_name = item.pipeline_name();
        self.task.source_table = item.source_table;
        self.task.target_table = item.target_table;
        self
    }

    pub fn with_node(mut self, node_id: i32) -> Self {
        self.task.target_node_id = node_id;
        self
    }

    pub fn with_row_count(mut self, source_row_count: i64) -> Self {
        self.task.source_row_count = source_row_count;
        self
    }

    pub fn with_column_mapping(mut self, mapping: &[(&str, &str)]) -> Self {
        self.task.column_mapping = mapping
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect::<HashMap<_, _>>();
        self
    }

    pub fn with_status(mut self, status: CopyTaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_last_update(mut self, last_update: DateTime<Utc>) -> Self {
        self.task.last_update = last_update;
        self
    }

    pub fn build(self) -> CopyTask {
        self.task
    }
}

/// Builder for MigrationConfig with test-friendly defaults
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MigrationConfig {
                batch_size: 10,
                ..Default::default()
            },
        }
    }

    pub fn cluster_mode(mut self, enabled: bool) -> Self {
        self.config.cluster_mode = enabled;
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn stalled_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.stalled_timeout_seconds = seconds;
        self
    }

    pub fn incremental_since(mut self, since: DateTime<Utc>) -> Self {
        self.config.incremental_since = Some(since);
        self
    }

    pub fn truncate_enabled(mut self, enabled: bool) -> Self {
        self.config.truncate_enabled = enabled;
        self
    }

    pub fn include_tables(mut self, tables: &[&str]) -> Self {
        self.config.include_tables = tables.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn build(self) -> MigrationConfig {
        self.config
    }
}

impl Default for MigrationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 组装一个复制上下文，性能统计使用默认实现
pub fn copy_context(
    migration_id: &str,
    config: MigrationConfig,
    source: Arc<dyn DataRepository>,
    target: Arc<dyn DataRepository>,
    node_directory: Arc<dyn NodeDirectory>,
    items: Vec<CopyItem>,
) -> CopyContext {
    let migration_context = Arc::new(MigrationContext::new(
        config,
        source,
        target,
        node_directory,
    ));
    CopyContext::new(
        migration_id,
        migration_context,
        items,
        Arc::new(DefaultPerformanceProfiler::new()),
    )
}
