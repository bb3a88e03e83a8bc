pub mod in_memory_bus;
pub mod redis_bus;

use std::sync::Arc;

use migration_core::{EventsConfig, MigrationError, MigrationResult};
use migration_domain::ClusterEventBus;

pub use in_memory_bus::InMemoryEventBus;
pub use redis_bus::RedisEventBus;

/// 按配置创建集群通知后端
pub async fn create_event_bus(config: &EventsConfig) -> MigrationResult<Arc<dyn ClusterEventBus>> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryEventBus::new())),
        "redis" => {
            let url = config.redis_url.as_deref().ok_or_else(|| {
                MigrationError::Configuration("redis通知后端需要配置redis_url".to_string())
            })?;
            Ok(Arc::new(RedisEventBus::new(url, &config.channel).await?))
        }
        other => Err(MigrationError::Configuration(format!(
            "不支持的通知后端: {other}"
        ))),
    }
}
