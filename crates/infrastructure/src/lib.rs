pub mod cluster;
pub mod database;
pub mod events;
pub mod profiler;
pub mod repository;

pub use cluster::{DatabaseNodeDirectory, StaticNodeDirectory};
pub use database::{DatabaseManager, DatabasePool, DatabaseType};
pub use events::{create_event_bus, InMemoryEventBus, RedisEventBus};
pub use profiler::DefaultPerformanceProfiler;
pub use repository::{DataPool, SqlDataRepository, SqlDialect};
