use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    cluster_worker::{ClusterConfig, EventsConfig, LoggingConfig, MonitorConfig, WorkerConfig},
    database::DatabaseConfig,
    migration::MigrationConfig,
};

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub source: DatabaseConfig,
    pub target: DatabaseConfig,
    /// 协调表所在的数据库，未配置时使用目标库
    #[serde(default)]
    pub coordination: Option<DatabaseConfig>,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: MIGRATION_, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder()
            .set_default("migration.batch_size", 1000)?
            .set_default("migration.stalled_timeout_seconds", 7200)?
            .set_default("monitor.poll_interval_seconds", 5)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/migration.toml",
                "migration.toml",
                "/etc/migration/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("MIGRATION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 协调表使用的数据库配置
    pub fn coordination_database(&self) -> &DatabaseConfig {
        self.coordination.as_ref().unwrap_or(&self.target)
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.source.validate().context("源数据库配置验证失败")?;
        self.target.validate().context("目标数据库配置验证失败")?;

        let coordination = self.coordination_database();
        coordination
            .validate()
            .context("协调数据库配置验证失败")?;
        if coordination.url.starts_with("mysql://") {
            return Err(anyhow::anyhow!(
                "协调数据库只支持PostgreSQL或SQLite，请单独配置coordination"
            ));
        }

        self.migration.validate().context("迁移配置验证失败")?;
        self.cluster.validate().context("集群配置验证失败")?;
        self.events.validate().context("集群通知配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        if self.monitor.poll_interval_seconds == 0 || self.worker.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        Ok(())
    }
}
