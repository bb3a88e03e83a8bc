//! 分布式数据库表复制迁移引擎
//!
//! 二进制入口使用的应用组装、日志初始化和优雅关闭

pub mod app;
pub mod common;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
