pub mod heartbeat_manager;
pub mod table_copier;

pub use heartbeat_manager::HeartbeatManager;
pub use table_copier::{failure_message, map_columns, TableCopier};
