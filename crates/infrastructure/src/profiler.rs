use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use migration_domain::{PerformanceProfiler, PipelineThroughput};

/// 按管道累计每批的行数和耗时
#[derive(Debug, Default)]
pub struct DefaultPerformanceProfiler {
    pipelines: Mutex<HashMap<String, PipelineThroughput>>,
}

impl DefaultPerformanceProfiler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PerformanceProfiler for DefaultPerformanceProfiler {
    fn record_batch(&self, pipeline_name: &str, rows: u64, elapsed: Duration) {
        let Ok(mut pipelines) = self.pipelines.lock() else {
            return;
        };
        let entry = pipelines
            .entry(pipeline_name.to_string())
            .or_insert_with(|| PipelineThroughput {
                pipeline_name: pipeline_name.to_string(),
                rows: 0,
                batches: 0,
                elapsed: Duration::ZERO,
            });
        entry.rows += rows;
        entry.batches += 1;
        entry.elapsed += elapsed;
    }

    fn reset(&self) {
        if let Ok(mut pipelines) = self.pipelines.lock() {
            pipelines.clear();
        }
    }

    fn snapshot(&self) -> Vec<PipelineThroughput> {
        let mut snapshot: Vec<PipelineThroughput> = match self.pipelines.lock() {
            Ok(pipelines) => pipelines.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        snapshot.sort_by(|a, b| a.pipeline_name.cmp(&b.pipeline_name));
        snapshot
    }
}
