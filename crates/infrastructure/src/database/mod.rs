pub mod manager;
pub mod postgres;
pub mod queries;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{PostgresClusterNodeRepository, PostgresCopyTaskRepository};
pub use sqlite::{SqliteClusterNodeRepository, SqliteCopyTaskRepository};
