//! Queue status query: live counts
//! preferentially from Redis with opportunistic pruning, terminal counts
//! always from PostgreSQL.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::warn;

use reconmc_core::error::Result;

use crate::redis_keys;

use super::QueueService;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    #[serde(rename = "totalServers")]
    pub total_servers: i64,
}

impl QueueService {
    pub async fn stats(&self) -> Result<QueueStats> {
        let (completed, failed) = self.terminal_counts().await?;
        let total_servers: i64 = sqlx::query_scalar("SELECT count(*) FROM servers")
            .fetch_one(&self.pg)
            .await?;

        let (pending, processing) = match self.redis.clone() {
            Some(redis) => match self.live_counts_from_redis(redis).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(error = %e, "redis unavailable for queue stats, falling back to postgres");
                    self.live_counts_from_pg().await?
                }
            },
            None => self.live_counts_from_pg().await?,
        };

        Ok(QueueStats {
            pending,
            processing,
            completed,
            failed,
            total_servers,
        })
    }

    /// `completed`/`failed`/`totalServers` always come from PostgreSQL:
    /// since the `scan_queue` row for a finished item is deleted at
    /// finalize time, lifetime completed/failed counts live in the
    /// permanent `servers.scan_history` instead — each entry's
    /// `error_message` tells which bucket it belongs to.
    async fn terminal_counts(&self) -> Result<(i64, i64)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT \
               count(*) FILTER (WHERE entry->>'errorMessage' IS NULL) AS completed, \
               count(*) FILTER (WHERE entry->>'errorMessage' IS NOT NULL) AS failed \
             FROM servers, jsonb_array_elements(scan_history) AS entry",
        )
        .fetch_one(&self.pg)
        .await?;
        Ok(row)
    }

    async fn live_counts_from_pg(&self) -> Result<(i64, i64)> {
        let pending: i64 = sqlx::query_scalar("SELECT count(*) FROM scan_queue WHERE status = 'pending'")
            .fetch_one(&self.pg)
            .await?;
        let processing: i64 =
            sqlx::query_scalar("SELECT count(*) FROM scan_queue WHERE status = 'processing'")
                .fetch_one(&self.pg)
                .await?;
        Ok((pending, processing))
    }

    async fn live_counts_from_redis(&self, mut redis: ConnectionManager) -> Result<(i64, i64)> {
        self.prune_processing(&mut redis).await?;
        let pending: i64 = redis.llen(redis_keys::QUEUE_PENDING).await?;
        let processing: i64 = redis.llen(redis_keys::QUEUE_PROCESSING).await?;
        Ok((pending, processing))
    }

    /// Before counting, opportunistically prune Redis `queue:processing`
    /// entries whose `queue:item:<id>` TTL has expired or whose id is no
    /// longer `processing` in PostgreSQL.
    async fn prune_processing(&self, redis: &mut ConnectionManager) -> Result<()> {
        let entries: Vec<String> = redis.lrange(redis_keys::QUEUE_PROCESSING, 0, -1).await?;
        if entries.is_empty() {
            return Ok(());
        }

        for json in entries {
            let Ok(item) = serde_json::from_str::<super::QueueWireItem>(&json) else {
                continue;
            };

            let lock_exists: bool = redis
                .exists(redis_keys::queue_item(reconmc_core::model::QueueId(item.id)))
                .await?;
            if lock_exists {
                let still_processing: Option<String> =
                    sqlx::query_scalar("SELECT status FROM scan_queue WHERE id = $1")
                        .bind(item.id)
                        .fetch_optional(&self.pg)
                        .await?;
                if still_processing.as_deref() == Some("processing") {
                    continue;
                }
            }

            let _: i64 = redis.lrem(redis_keys::QUEUE_PROCESSING, 1, &json).await?;
        }

        Ok(())
    }
}
