use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{MigrationError, MigrationResult};
use migration_domain::{entities::ClusterNode, repositories::ClusterNodeRepository};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

use crate::database::queries;

pub struct SqliteClusterNodeRepository {
    pool: SqlitePool,
}

impl SqliteClusterNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_node(row: &SqliteRow) -> MigrationResult<ClusterNode> {
        Ok(ClusterNode {
            node_id: row.try_get("nodeid")?,
            hostname: row.try_get("hostname")?,
            last_heartbeat: row.try_get("lastheartbeat")?,
        })
    }
}

#[async_trait]
impl ClusterNodeRepository for SqliteClusterNodeRepository {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::SqliteCopyTaskRepository;
    use chrono::Duration;
    use migration_domain::repositories::CopyTaskRepository;

    #[tokio::test]
    async fn test_heartbeat_upsert_and_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("nodes.db").display());
        let pool = SqlitePool::connect(&url).await.unwrap();
        SqliteCopyTaskRepository::new(pool.clone())
            .ensure_schema()
            .await
            .unwrap();
        let repo = SqliteClusterNodeRepository::new(pool);

        repo.heartbeat(2, "host-b").await.unwrap();
        repo.heartbeat(1, "host-a").await.unwrap();
        repo.heartbeat(1, "host-a2").await.unwrap();

        let alive = repo
            .find_alive_nodes(Utc::now() - Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(alive.len(), 2);
        assert_eq!(alive[0].node_id, 1);
        assert_eq!(alive[0].hostname, "host-a2");

        let future = repo
            .find_alive_nodes(Utc::now() + Duration::seconds(30))
            .await
            .unwrap();
        assert!(future.is_empty());

        repo.unregister(2).await.unwrap();
        let alive = repo
            .find_alive_nodes(Utc::now() - Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(alive.len(), 1);
    }
}
