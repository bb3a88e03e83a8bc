use thiserror::Error;

/// 迁移引擎错误类型定义
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("迁移未找到: {migration_id}")]
    MigrationNotFound { migration_id: String },

    #[error("复制任务未找到: {migration_id}/{pipeline_name}")]
    TaskNotFound {
        migration_id: String,
        pipeline_name: String,
    },

    #[error("数据列不存在: {column}")]
    ColumnNotFound { column: String },

    #[error("迁移 {migration_id} 以状态 {status} 结束")]
    MigrationFailed { migration_id: String, status: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("集群通知错误: {0}")]
    EventBus(String),

    #[error("当前数据库不支持该操作: {0}")]
    Unsupported(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MigrationError {
    /// 连接类错误可以重试，其余错误重试无意义
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            MigrationError::EventBus(_) => true,
            _ => false,
        }
    }

    /// 面向运维人员的简短错误描述
    pub fn user_message(&self) -> String {
        match self {
            MigrationError::Database(_) | MigrationError::DatabaseOperation(_) => {
                "数据库访问失败，请检查连接配置".to_string()
            }
            MigrationError::MigrationNotFound { migration_id } => {
                format!("迁移 {migration_id} 不存在")
            }
            MigrationError::MigrationFailed {
                migration_id,
                status,
            } => format!("迁移 {migration_id} 未成功完成: {status}"),
            MigrationError::Configuration(msg) => format!("配置无效: {msg}"),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for MigrationError {
    fn from(err: config::ConfigError) -> Self {
        MigrationError::Configuration(err.to_string())
    }
}

/// 统一的Result类型
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
