pub mod app_config;
pub mod cluster_worker;
pub mod database;
pub mod migration;

pub use app_config::AppConfig;
pub use cluster_worker::{ClusterConfig, EventsConfig, LoggingConfig, MonitorConfig, WorkerConfig};
pub use database::DatabaseConfig;
pub use migration::MigrationConfig;
