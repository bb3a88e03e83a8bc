//! 迁移调度
//!
//! 在发起节点上把复制项分配到集群节点、监控整体进度，并对外提供
//! 启动、停止、查询和等待迁移的入口。

pub mod monitor;
pub mod scheduler;
pub mod service;
pub mod strategies;

pub use monitor::{PollOutcome, ProgressMonitor};
pub use scheduler::{ClusterCopyScheduler, DatabaseCopyScheduler};
pub use service::DatabaseMigrationService;
pub use strategies::{plan_assignments, TaskAssignment};
