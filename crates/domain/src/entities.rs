//! 迁移领域实体
//!
//! 复制项、复制任务以及迁移整体状态

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use migration_core::MigrationError;
use serde::{Deserialize, Serialize};

/// 一张源表到目标表的复制描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyItem {
    pub source_table: String,
    pub target_table: String,
    /// 源列名 -> 目标列名
    pub column_mapping: HashMap<String, String>,
    /// 调度时计算的源表行数
    pub source_row_count: i64,
}

impl CopyItem {
    pub fn new(source_table: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            column_mapping: HashMap::new(),
            source_row_count: 0,
        }
    }

    pub fn with_column_mapping(mut self, column_mapping: HashMap<String, String>) -> Self {
        self.column_mapping = column_mapping;
        self
    }

    pub fn pipeline_name(&self) -> String {
        pipeline_name(&self.source_table, &self.target_table)
    }
}

impl PartialEq for CopyItem {
    fn eq(&self, other: &Self) -> bool {
        self.source_table == other.source_table && self.target_table == other.target_table
    }
}

impl Eq for CopyItem {}

impl Hash for CopyItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_table.hash(state);
        self.target_table.hash(state);
    }
}

pub fn pipeline_name(source_table: &str, target_table: &str) -> String {
    format!("{source_table}->{target_table}")
}

/// 复制任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopyTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl CopyTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyTaskStatus::Pending => "PENDING",
            CopyTaskStatus::Running => "RUNNING",
            CopyTaskStatus::Completed => "COMPLETED",
            CopyTaskStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CopyTaskStatus::Completed | CopyTaskStatus::Failed)
    }
}

impl fmt::Display for CopyTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CopyTaskStatus {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CopyTaskStatus::Pending),
            "RUNNING" => Ok(CopyTaskStatus::Running),
            "COMPLETED" => Ok(CopyTaskStatus::Completed),
            "FAILED" => Ok(CopyTaskStatus::Failed),
            other => Err(MigrationError::Serialization(format!(
                "未知的复制任务状态: {other}"
            ))),
        }
    }
}

/// 持久化的复制任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyTask {
    pub migration_id: String,
    pub pipeline_name: String,
    pub source_table: String,
    pub target_table: String,
    pub column_mapping: HashMap<String, String>,
    pub target_node_id: i32,
    pub source_row_count: i64,
    pub target_row_count: i64,
    pub status: CopyTaskStatus,
    pub error: Option<String>,
    pub last_update: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl CopyTask {
    /// 根据复制项创建待执行任务
    pub fn pending(migration_id: &str, item: &CopyItem, target_node_id: i32) -> Self {
        Self {
            migration_id: migration_id.to_string(),
            pipeline_name: item.pipeline_name(),
            source_table: item.source_table.clone(),
            target_table: item.target_table.clone(),
            column_mapping: item.column_mapping.clone(),
            target_node_id,
            source_row_count: item.source_row_count,
            target_row_count: 0,
            status: CopyTaskStatus::Pending,
            error: None,
            last_update: Utc::now(),
            duration_ms: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == CopyTaskStatus::Failed
    }

    pub fn is_completed(&self) -> bool {
        self.status == CopyTaskStatus::Completed
    }

    pub fn to_copy_item(&self) -> CopyItem {
        CopyItem {
            source_table: self.source_table.clone(),
            target_table: self.target_table.clone(),
            column_mapping: self.column_mapping.clone(),
            source_row_count: self.source_row_count,
        }
    }

    pub fn formatted_duration(&self) -> String {
        self.duration_ms
            .map(format_duration_ms)
            .unwrap_or_else(|| "-".to_string())
    }
}

/// 迁移整体状态标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationProgress {
    Running,
    Completed,
    Failed,
    Aborted,
    Stalled,
}

impl MigrationProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationProgress::Running => "RUNNING",
            MigrationProgress::Completed => "COMPLETED",
            MigrationProgress::Failed => "FAILED",
            MigrationProgress::Aborted => "ABORTED",
            MigrationProgress::Stalled => "STALLED",
        }
    }

    /// STALLED 不是终态，进度恢复后回到 RUNNING
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationProgress::Completed | MigrationProgress::Failed | MigrationProgress::Aborted
        )
    }

    pub fn terminal_values() -> [&'static str; 3] {
        ["COMPLETED", "FAILED", "ABORTED"]
    }
}

impl fmt::Display for MigrationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationProgress {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(MigrationProgress::Running),
            "COMPLETED" => Ok(MigrationProgress::Completed),
            "FAILED" => Ok(MigrationProgress::Failed),
            "ABORTED" => Ok(MigrationProgress::Aborted),
            "STALLED" => Ok(MigrationProgress::Stalled),
            other => Err(MigrationError::Serialization(format!(
                "未知的迁移状态: {other}"
            ))),
        }
    }
}

/// 迁移整体快照，每次查询时由任务表聚合得到
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub migration_id: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub status: MigrationProgress,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
    pub status_updates: Vec<CopyTask>,
}

/// 存储层返回的原始聚合数据
#[derive(Debug, Clone)]
pub struct MigrationAggregate {
    pub migration_id: String,
    pub stored_status: MigrationProgress,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub last_task_update: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    pub fn from_aggregate(aggregate: MigrationAggregate) -> Self {
        let finished_tasks = aggregate.completed_tasks + aggregate.failed_tasks;
        let all_done = aggregate.total_tasks > 0 && finished_tasks >= aggregate.total_tasks;

        let status = if aggregate.stored_status.is_terminal() {
            aggregate.stored_status
        } else if all_done && aggregate.failed_tasks > 0 {
            MigrationProgress::Failed
        } else if all_done {
            MigrationProgress::Completed
        } else {
            aggregate.stored_status
        };

        let last_update = aggregate
            .last_task_update
            .map(|t| t.max(aggregate.start))
            .unwrap_or(aggregate.start);

        let end = aggregate
            .end
            .or_else(|| if all_done { Some(last_update) } else { None });

        Self {
            migration_id: aggregate.migration_id,
            total_tasks: aggregate.total_tasks,
            completed_tasks: aggregate.completed_tasks,
            failed_tasks: aggregate.failed_tasks,
            status,
            start: aggregate.start,
            end,
            last_update,
            status_updates: Vec::new(),
        }
    }

    /// 终态且所有任务都已结束，中止的迁移要等执行中的任务退出
    pub fn is_completed(&self) -> bool {
        self.status.is_terminal() && self.all_tasks_finished()
    }

    pub fn all_tasks_finished(&self) -> bool {
        self.finished_tasks() >= self.total_tasks
    }

    pub fn is_failed(&self) -> bool {
        self.failed_tasks > 0 || self.status == MigrationProgress::Failed
    }

    pub fn is_aborted(&self) -> bool {
        self.status == MigrationProgress::Aborted
    }

    pub fn is_stalled(&self) -> bool {
        self.status == MigrationProgress::Stalled
    }

    pub fn finished_tasks(&self) -> i64 {
        self.completed_tasks + self.failed_tasks
    }

    /// 运行时长，未结束时计算到当前时间
    pub fn duration_ms(&self) -> i64 {
        let end = self.end.unwrap_or_else(Utc::now);
        (end - self.start).num_milliseconds().max(0)
    }
}

/// 复制被中止时写入任务的错误信息
pub const ABORTED_ERROR: &str = "aborted";

/// 集群节点心跳记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: i32,
    pub hostname: String,
    pub last_heartbeat: DateTime<Utc>,
}

/// 格式化为 HH:MM:SS.mmm
pub fn format_duration_ms(duration_ms: i64) -> String {
    let total = duration_ms.max(0);
    let millis = total % 1000;
    let seconds = (total / 1000) % 60;
    let minutes = (total / 60_000) % 60;
    let hours = total / 3_600_000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    fn aggregate(total: i64, completed: i64, failed: i64, stored: MigrationProgress) -> MigrationAggregate {
        MigrationAggregate {
            migration_id: "m-1".to_string(),
            stored_status: stored,
            start: Utc::now() - Duration::minutes(5),
            end: None,
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            last_task_update: Some(Utc::now()),
        }
    }

    #[test]
    fn test_pipeline_name_and_identity() {
        let mut mapping = HashMap::new();
        mapping.insert("a".to_string(), "b".to_string());
        let plain = CopyItem::new("products", "products_copy");
        let mapped = CopyItem::new("products", "products_copy").with_column_mapping(mapping);

        assert_eq!(plain.pipeline_name(), "products->products_copy");
        assert_eq!(plain, mapped);

        let set: HashSet<CopyItem> = [plain, mapped].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_status_string_conversion() {
        for status in [
            CopyTaskStatus::Pending,
            CopyTaskStatus::Running,
            CopyTaskStatus::Completed,
            CopyTaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CopyTaskStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<CopyTaskStatus>().is_err());
        assert_eq!("STALLED".parse::<MigrationProgress>().unwrap(), MigrationProgress::Stalled);
    }

    #[test]
    fn test_running_migration_not_completed() {
        let status = MigrationStatus::from_aggregate(aggregate(3, 1, 0, MigrationProgress::Running));

        assert_eq!(status.status, MigrationProgress::Running);
        assert!(!status.is_completed());
        assert!(!status.is_failed());
        assert!(status.end.is_none());
    }

    #[test]
    fn test_all_tasks_done_derives_completion() {
        let ok = MigrationStatus::from_aggregate(aggregate(2, 2, 0, MigrationProgress::Running));
        assert_eq!(ok.status, MigrationProgress::Completed);
        assert!(ok.is_completed());
        assert_eq!(ok.end, Some(ok.last_update));

        let failed = MigrationStatus::from_aggregate(aggregate(2, 1, 1, MigrationProgress::Stalled));
        assert_eq!(failed.status, MigrationProgress::Failed);
        assert!(failed.is_completed());
        assert!(failed.is_failed());
    }

    #[test]
    fn test_stored_terminal_status_wins() {
        let aborted = MigrationStatus::from_aggregate(aggregate(4, 4, 0, MigrationProgress::Aborted));

        assert!(aborted.is_aborted());
        assert!(aborted.is_completed());
        assert!(!aborted.is_failed());
    }

    #[test]
    fn test_aborted_with_unfinished_tasks_is_not_completed() {
        let aborted = MigrationStatus::from_aggregate(aggregate(4, 1, 1, MigrationProgress::Aborted));

        assert!(aborted.is_aborted());
        assert!(!aborted.all_tasks_finished());
        assert!(!aborted.is_completed());
        assert!(aborted.end.is_none());

        let drained = MigrationStatus::from_aggregate(aggregate(4, 1, 3, MigrationProgress::Aborted));
        assert_eq!(drained.status, MigrationProgress::Aborted);
        assert!(drained.is_completed());
    }

    #[test]
    fn test_stalled_is_not_terminal() {
        let stalled = MigrationStatus::from_aggregate(aggregate(4, 1, 0, MigrationProgress::Stalled));

        assert!(stalled.is_stalled());
        assert!(!stalled.is_completed());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(0), "00:00:00.000");
        assert_eq!(format_duration_ms(3_723_004), "01:02:03.004");
        assert_eq!(format_duration_ms(-5), "00:00:00.000");
    }
}
