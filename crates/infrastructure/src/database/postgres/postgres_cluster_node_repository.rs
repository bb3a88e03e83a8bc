use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{entities::ClusterNode, repositories::ClusterNodeRepository};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use crate::database::queries;

pub struct PostgresClusterNodeRepository {
    pool: PgPool,
}

impl PostgresClusterNodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &PgRow) -> MigrationResult<ClusterNode> {
        Ok(ClusterNode {
            node_id: row.try_get("nodeid")?,
            hostname: row.try_get("hostname")?,
            last_heartbeat: row.try_get("lastheartbeat")?,
        })
    }
}

#[async_trait]
impl ClusterNodeRepository for PostgresClusterNodeRepository {
    async fn heartbeat(&self, node_id: i32, hostname: &str) -> MigrationResult<()> {
        sqlx::query(queries::UPSERT_NODE)
            .bind(node_id)
            .bind(hostname)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        debug!("节点 {} 心跳已更新", node_id);
        Ok(())
    }

    async fn find_alive_nodes(&self, since: DateTime<Utc>) -> MigrationResult<Vec<ClusterNode>> {
        let rows = sqlx::query(queries::SELECT_ALIVE_NODES)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        rows.iter().map(Self::row_to_node).collect()
    }

    async fn unregister(&self, node_id: i32) -> MigrationResult<()> {
        sqlx::query(queries::DELETE_NODE)
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(MigrationError::Database)?;
        Ok(())
    }
}
