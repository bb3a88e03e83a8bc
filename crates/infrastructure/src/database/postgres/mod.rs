pub mod postgres_cluster_node_repository;
pub mod postgres_copy_task_repository;

pub use postgres_cluster_node_repository::PostgresClusterNodeRepository;
pub use postgres_copy_task_repository::PostgresCopyTaskRepository;
