use serde::{Deserialize, Serialize};

/// Cluster membership configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub node_id: i32,
    /// "static" 使用固定节点列表，"database" 使用心跳表
    pub directory: String,
    pub nodes: Vec<i32>,
    pub heartbeat_interval_seconds: u64,
    pub node_timeout_seconds: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            directory: "static".to_string(),
            nodes: Vec::new(),
            heartbeat_interval_seconds: 10,
            node_timeout_seconds: 60, // 60秒未心跳视为离线
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.directory.as_str() {
            "static" | "database" => {}
            other => return Err(anyhow::anyhow!("不支持的节点目录类型: {}", other)),
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.node_timeout_seconds <= self.heartbeat_interval_seconds {
            return Err(anyhow::anyhow!("节点超时时间必须大于心跳间隔"));
        }

        Ok(())
    }
}

/// Cluster notification backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// "memory" 或 "redis"
    pub backend: String,
    pub redis_url: Option<String>,
    pub channel: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: None,
            channel: "migration:events".to_string(),
        }
    }
}

impl EventsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.backend.as_str() {
            "memory" => Ok(()),
            "redis" => {
                if self.redis_url.as_deref().unwrap_or("").is_empty() {
                    return Err(anyhow::anyhow!("redis通知后端需要配置redis_url"));
                }
                if self.channel.is_empty() {
                    return Err(anyhow::anyhow!("通知频道不能为空"));
                }
                Ok(())
            }
            other => Err(anyhow::anyhow!("不支持的通知后端: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 兜底轮询间隔，用于弥补丢失的集群通知
    pub poll_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" 或 "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.level));
        }

        if self.format != "json" && self.format != "pretty" {
            return Err(anyhow::anyhow!("不支持的日志格式: {}", self.format));
        }

        Ok(())
    }
}
