//! 复制工作进程
//!
//! 每个节点运行一个 [`CopyWorker`]，认领分配给本节点的复制任务并逐批写入目标库。

pub mod components;
pub mod service;

pub use components::{HeartbeatManager, TableCopier};
pub use service::CopyWorker;
