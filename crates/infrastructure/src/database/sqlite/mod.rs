pub mod sqlite_cluster_node_repository;
pub mod sqlite_copy_task_repository;

pub use sqlite_cluster_node_repository::SqliteClusterNodeRepository;
pub use sqlite_copy_task_repository::SqliteCopyTaskRepository;
