use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Arg, ArgAction, ArgMatches, Command};
use migration::common::{init_logging, wait_for_shutdown_signal};
use migration::{Application, ShutdownManager};
use migration_core::AppConfig;
use tracing::{error, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

fn cli() -> Command {
    Command::new("migration")
        .version("1.0.0")
        .about("分布式数据库表复制迁移引擎")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，默认使用配置文件中的值")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("node").about("以集群节点运行，执行分配到本节点的复制任务"))
        .subcommand(
            Command::new("migrate")
                .about("从本节点发起一次迁移并等待结束")
                .arg(
                    Arg::new("id")
                        .long("id")
                        .value_name("MIGRATION_ID")
                        .help("迁移ID，默认自动生成"),
                )
                .arg(
                    Arg::new("table")
                        .short('t')
                        .long("table")
                        .value_name("TABLE")
                        .help("需要复制的表，不指定时复制源库和目标库都存在的表")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("stop").about("中止迁移").arg(
                Arg::new("id")
                    .long("id")
                    .value_name("MIGRATION_ID")
                    .required(true),
            ),
        )
        .subcommand(
            Command::new("status")
                .about("查询迁移状态")
                .arg(
                    Arg::new("id")
                        .long("id")
                        .value_name("MIGRATION_ID")
                        .required(true),
                )
                .arg(
                    Arg::new("since")
                        .long("since")
                        .value_name("RFC3339")
                        .help("只返回该时间之后更新的任务"),
                ),
        )
        .subcommand(Command::new("show-config").about("打印合并后的配置"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let config = AppConfig::load(config_path).context("加载配置失败")?;

    if let Some(("show-config", _)) = matches.subcommand() {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| config.logging.format.clone());
    init_logging(&log_level, &log_format)?;

    info!("启动迁移节点 {}", config.cluster.node_id);
    let app = Arc::new(Application::new(config).await?);

    let result = match matches.subcommand() {
        Some(("node", _)) => run_node(Arc::clone(&app)).await,
        Some(("migrate", args)) => run_migration(Arc::clone(&app), args).await,
        Some(("stop", args)) => stop_migration(&app, args).await,
        Some(("status", args)) => print_status(&app, args).await,
        _ => Err(anyhow::anyhow!("未知的子命令")),
    };

    app.close().await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run_node(app: Arc<Application>) -> Result<()> {
    let shutdown_manager = ShutdownManager::new();
    let shutdown_rx = shutdown_manager.subscribe().await;

    let node = tokio::spawn(async move {
        if let Err(e) = app.run_node(shutdown_rx).await {
            error!("节点运行失败: {:#}", e);
        }
    });

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    shutdown_manager.join_all(vec![node], SHUTDOWN_TIMEOUT).await;
    info!("节点已退出");
    Ok(())
}

async fn run_migration(app: Arc<Application>, args: &ArgMatches) -> Result<()> {
    let migration_id = args.get_one::<String>("id").cloned();
    let tables: Vec<String> = args
        .get_many::<String>("table")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let shutdown_manager = ShutdownManager::new();
    let mut handles = Vec::new();
    if let Some(heartbeat) = app.start_heartbeat(shutdown_manager.subscribe().await).await? {
        handles.push(heartbeat);
    }

    let worker_app = Arc::clone(&app);
    let worker_rx = shutdown_manager.subscribe().await;
    handles.push(tokio::spawn(async move {
        if let Err(e) = worker_app.run_worker(worker_rx).await {
            error!("复制工作进程运行失败: {:#}", e);
        }
    }));

    let result = match app.start_migration(migration_id, &tables).await {
        Ok(context) => {
            let migration_id = context.migration_id().to_string();
            tokio::select! {
                status = app.wait_for_finish(&context) => status.map(|status| {
                    info!(
                        "迁移 {} 结束: {}，{} 张表完成",
                        status.migration_id, status.status, status.completed_tasks
                    );
                }),
                _ = wait_for_shutdown_signal() => {
                    warn!("收到关闭信号，中止迁移 {}", migration_id);
                    match app.stop_migration(&migration_id).await {
                        Ok(()) => Err(anyhow::anyhow!("迁移 {migration_id} 已被中止")),
                        Err(e) => Err(e),
                    }
                }
            }
        }
        Err(e) => Err(e),
    };

    shutdown_manager.shutdown().await;
    shutdown_manager.join_all(handles, SHUTDOWN_TIMEOUT).await;
    result
}

async fn stop_migration(app: &Application, args: &ArgMatches) -> Result<()> {
    let migration_id = required_id(args)?;
    app.stop_migration(migration_id).await?;
    print_json(&app.migration_status(migration_id, None).await?)
}

async fn print_status(app: &Application, args: &ArgMatches) -> Result<()> {
    let migration_id = required_id(args)?;
    let since = args
        .get_one::<String>("since")
        .map(|value| {
            DateTime::parse_from_rfc3339(value)
                .map(|time| time.with_timezone(&Utc))
                .with_context(|| format!("无法解析时间: {value}"))
        })
        .transpose()?;

    print_json(&app.migration_status(migration_id, since).await?)
}

fn required_id(args: &ArgMatches) -> Result<&str> {
    args.get_one::<String>("id")
        .map(String::as_str)
        .context("缺少迁移ID")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
