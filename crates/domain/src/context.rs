//! 迁移运行上下文

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use migration_core::MigrationConfig;

use crate::entities::CopyItem;
use crate::ports::NodeDirectory;
use crate::repositories::DataRepository;

/// 单个复制管道的吞吐统计
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineThroughput {
    pub pipeline_name: String,
    pub rows: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

impl PipelineThroughput {
    pub fn rows_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.rows as f64 / seconds
        } else {
            0.0
        }
    }
}

pub trait PerformanceProfiler: Send + Sync {
    fn record_batch(&self, pipeline_name: &str, rows: u64, elapsed: Duration);
    fn reset(&self);
    fn snapshot(&self) -> Vec<PipelineThroughput>;
}

/// 进程级依赖，启动时创建一次
pub struct MigrationContext {
    pub config: MigrationConfig,
    pub source: Arc<dyn DataRepository>,
    pub target: Arc<dyn DataRepository>,
    pub node_directory: Arc<dyn NodeDirectory>,
}

impl MigrationContext {
    pub fn new(
        config: MigrationConfig,
        source: Arc<dyn DataRepository>,
        target: Arc<dyn DataRepository>,
        node_directory: Arc<dyn NodeDirectory>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            node_directory,
        }
    }

    pub fn local_node_id(&self) -> i32 {
        self.node_directory.local_node_id()
    }
}

impl fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationContext")
            .field("config", &self.config)
            .field("source", &self.source.dialect_name())
            .field("target", &self.target.dialect_name())
            .field("local_node_id", &self.local_node_id())
            .finish()
    }
}

/// 一次迁移运行的共享状态
#[derive(Clone)]
pub struct CopyContext {
    migration_id: String,
    migration_context: Arc<MigrationContext>,
    copy_items: Vec<CopyItem>,
    profiler: Arc<dyn PerformanceProfiler>,
}

impl CopyContext {
    /// 复制项按 (源表, 目标表) 去重，保留首次出现的顺序
    pub fn new(
        migration_id: impl Into<String>,
        migration_context: Arc<MigrationContext>,
        copy_items: impl IntoIterator<Item = CopyItem>,
        profiler: Arc<dyn PerformanceProfiler>,
    ) -> Self {
        let mut seen = HashSet::new();
        let copy_items = copy_items
            .into_iter()
            .filter(|item| seen.insert(item.clone()))
            .collect();

        Self {
            migration_id: migration_id.into(),
            migration_context,
            copy_items,
            profiler,
        }
    }

    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub fn migration_context(&self) -> &Arc<MigrationContext> {
        &self.migration_context
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.migration_context.config
    }

    pub fn copy_items(&self) -> &[CopyItem] {
        &self.copy_items
    }

    pub fn profiler(&self) -> &Arc<dyn PerformanceProfiler> {
        &self.profiler
    }
}

impl fmt::Debug for CopyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyContext")
            .field("migration_id", &self.migration_id)
            .field("copy_items", &self.copy_items.len())
            .finish()
    }
}
