//! # Migration Testing Utils
//!
//! 各 crate 共用的测试工具：
//!
//! - **Mock Repositories**: 内存中的 `DataRepository` 实现
//! - **Mock Cluster**: 固定的节点目录和记录通知的事件总线
//! - **Test Databases**: 基于临时文件的 SQLite 数据库
//! - **Test Data Builders**: 复制任务和迁移上下文的构建器
//!
//! ```toml
//! [dev-dependencies]
//! migration-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
