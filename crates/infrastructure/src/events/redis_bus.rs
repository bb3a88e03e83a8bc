use async_trait::async_trait;
use futures::StreamExt;
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{ClusterEvent, ClusterEventBus};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const LOCAL_CAPACITY: usize = 256;

/// 基于 Redis Pub/Sub 的集群通知
///
/// 所有节点订阅同一个频道。Pub/Sub 不保证送达，工作节点仍需定期轮询任务表。
pub struct RedisEventBus {
    client: Client,
    connection: ConnectionManager,
    channel: String,
    local: broadcast::Sender<ClusterEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

fn bus_error(e: impl std::fmt::Display) -> MigrationError {
    MigrationError::EventBus(e.to_string())
}

impl RedisEventBus {
    pub async fn new(url: &str, channel: &str) -> MigrationResult<Self> {
        let client = Client::open(url).map_err(bus_error)?;
        let mut connection = client.get_connection_manager().await.map_err(bus_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(bus_error)?;

        info!("Redis通知后端已连接，频道: {}", channel);

        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        Ok(Self {
            client,
            connection,
            channel: channel.to_string(),
            local,
            listener: Mutex::new(None),
        })
    }

    /// 首次订阅时建立 Pub/Sub 连接，并把消息转发到本地广播
    async fn ensure_listener(&self) -> MigrationResult<()> {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let mut pubsub = self.client.get_async_pubsub().await.map_err(bus_error)?;
        pubsub.subscribe(&self.channel).await.map_err(bus_error)?;

        let local = self.local.clone();
        let channel = self.channel.clone();
        *listener = Some(tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("无法读取通知内容: {}", e);
                        continue;
                    }
                };
                match serde_json::from_str::<ClusterEvent>(&payload) {
                    Ok(event) => {
                        debug!("收到通知 {} ({})", event.event_type(), event.migration_id());
                        let _ = local.send(event);
                    }
                    Err(e) => warn!("忽略无法解析的通知: {}", e),
                }
            }
            error!("Redis订阅已断开，频道: {}", channel);
        }));
        Ok(())
    }
}

#[async_trait]
impl ClusterEventBus for RedisEventBus {
    async fn publish(&self, event: &ClusterEvent) -> MigrationResult<()> {
        let payload = serde_json::to_string(event)?;
        let mut connection = self.connection.clone();
        let receivers: i64 = connection
            .publish(&self.channel, payload)
            .await
            .map_err(bus_error)?;
        debug!(
            "已发布通知 {} ({})，接收者 {}",
            event.event_type(),
            event.migration_id(),
            receivers
        );
        Ok(())
    }

    async fn subscribe(&self) -> MigrationResult<broadcast::Receiver<ClusterEvent>> {
        let receiver = self.local.subscribe();
        self.ensure_listener().await?;
        Ok(receiver)
    }
}

impl Drop for RedisEventBus {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.try_lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}
