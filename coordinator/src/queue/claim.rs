//! Atomic claim: Redis fast path preferred, PostgreSQL
//! `FOR UPDATE SKIP LOCKED` fallback, `WRONGTYPE` self-heal.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use reconmc_core::error::{Result, ScanError};
use reconmc_core::model::{is_valid_agent_id, QueueId, QUEUE_ITEM_LOCK_TTL_SECS};

use crate::allocator;
use crate::redis_keys;
use crate::rows::ScanQueueRow;

use super::{AccountPayload, ClaimResponse, ProxyPayload, QueueService, QueueWireItem};

fn is_wrongtype(e: &redis::RedisError) -> bool {
    e.code() == Some("WRONGTYPE")
}

const SCAN_QUEUE_ROW_COLUMNS: &str = r#"
    id, server_address, hostname, resolved_ip, port, status,
    assigned_agent_id, assigned_proxy_id, assigned_account_id,
    retry_count, error_message, created_at, started_at, completed_at
"#;

impl QueueService {
    pub async fn claim(&self, agent_id: &str) -> Result<Option<ClaimResponse>> {
        if !is_valid_agent_id(agent_id) {
            return Err(ScanError::Validation(format!("invalid agent id: {agent_id}")));
        }

        if let Some(redis) = self.redis.clone() {
            match self.claim_via_redis(agent_id, redis).await {
                Ok(outcome) => return Ok(outcome),
                Err(ScanError::RedisUnavailable(msg)) => {
                    warn!(error = %msg, "redis claim path unavailable, falling back to postgres");
                }
                Err(e) => return Err(e),
            }
        }

        self.claim_via_postgres(agent_id).await
    }

    async fn claim_via_redis(
        &self,
        agent_id: &str,
        mut redis: ConnectionManager,
    ) -> Result<Option<ClaimResponse>> {
        let pending_len: i64 = match redis.llen(redis_keys::QUEUE_PENDING).await {
            Ok(n) => n,
            Err(e) if is_wrongtype(&e) => {
                self.wipe_lists(&mut redis).await;
                return Err(ScanError::RedisUnavailable(format!("WRONGTYPE on pending list: {e}")));
            }
            Err(e) => return Err(ScanError::RedisUnavailable(e.to_string())),
        };

        if pending_len == 0 {
            self.sync_pending_from_pg(&mut redis).await?;
        }

        let json: Option<String> = match redis
            .lmove(
                redis_keys::QUEUE_PENDING,
                redis_keys::QUEUE_PROCESSING,
                redis::Direction::Right,
                redis::Direction::Left,
            )
            .await
        {
            Ok(v) => v,
            Err(e) if is_wrongtype(&e) => {
                self.wipe_lists(&mut redis).await;
                return Err(ScanError::RedisUnavailable(format!("WRONGTYPE on lmove: {e}")));
            }
            Err(e) => return Err(ScanError::RedisUnavailable(e.to_string())),
        };

        let Some(json) = json else {
            return Ok(None);
        };

        let item: QueueWireItem = serde_json::from_str(&json)
            .map_err(|e| ScanError::Internal(format!("corrupt queue wire item in redis: {e}")))?;

        redis
            .set_ex::<_, _, ()>(redis_keys::queue_item(QueueId(item.id)), agent_id, QUEUE_ITEM_LOCK_TTL_SECS)
            .await?;

        let mut tx = self.pg.begin().await?;
        let allocation = match allocator::allocate(&mut tx).await? {
            Some(a) => a,
            None => {
                tx.rollback().await.ok();
                self.restore_to_pending(&mut redis, &item, &json).await?;
                return Ok(None);
            }
        };

        sqlx::query(
            "UPDATE scan_queue SET status = 'processing', assigned_agent_id = $1, \
             assigned_proxy_id = $2, assigned_account_id = $3, started_at = now() WHERE id = $4",
        )
        .bind(agent_id)
        .bind(allocation.proxy.id.0)
        .bind(allocation.account.id.0)
        .bind(item.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE agents SET status = 'busy', current_queue_id = $1 WHERE id = $2")
            .bind(item.id)
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(ClaimResponse {
            queue_id: QueueId(item.id),
            server_address: item.server_address.clone(),
            port: item.port,
            proxy: ProxyPayload::from(&allocation.proxy),
            account: AccountPayload::from(&allocation.account),
        }))
    }

    async fn claim_via_postgres(&self, agent_id: &str) -> Result<Option<ClaimResponse>> {
        let mut tx = self.pg.begin().await?;

        let query = format!(
            "SELECT {SCAN_QUEUE_ROW_COLUMNS} FROM scan_queue WHERE status = 'pending' \
             ORDER BY created_at LIMIT 1 FOR UPDATE SKIP LOCKED"
        );
        let row: Option<ScanQueueRow> = sqlx::query_as(&query).fetch_optional(&mut *tx).await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };

        let allocation = match allocator::allocate(&mut tx).await? {
            Some(a) => a,
            None => {
                tx.rollback().await.ok();
                return Ok(None);
            }
        };

        sqlx::query(
            "UPDATE scan_queue SET status = 'processing', assigned_agent_id = $1, \
             assigned_proxy_id = $2, assigned_account_id = $3, started_at = now() WHERE id = $4",
        )
        .bind(agent_id)
        .bind(allocation.proxy.id.0)
        .bind(allocation.account.id.0)
        .bind(row.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE agents SET status = 'busy', current_queue_id = $1 WHERE id = $2")
            .bind(row.id)
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(ClaimResponse {
            queue_id: QueueId(row.id),
            server_address: row.server_address,
            port: row.port as u16,
            proxy: ProxyPayload::from(&allocation.proxy),
            account: AccountPayload::from(&allocation.account),
        }))
    }

    /// Pull up to 1000 pending rows from PostgreSQL into the Redis list in
    /// one pipeline.
    async fn sync_pending_from_pg(&self, redis: &mut ConnectionManager) -> Result<()> {
        let query = format!(
            "SELECT {SCAN_QUEUE_ROW_COLUMNS} FROM scan_queue WHERE status = 'pending' \
             ORDER BY created_at LIMIT 1000"
        );
        let rows: Vec<ScanQueueRow> = sqlx::query_as(&query).fetch_all(&self.pg).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for row in &rows {
            let item = QueueWireItem {
                id: row.id,
                server_address: row.server_address.clone(),
                hostname: row.hostname.clone(),
                resolved_ip: row.resolved_ip.clone(),
                port: row.port as u16,
            };
            let json = serde_json::to_string(&item)
                .map_err(|e| ScanError::Internal(format!("failed to serialize queue item: {e}")))?;
            pipe.rpush(redis_keys::QUEUE_PENDING, json);
        }
        pipe.query_async::<()>(redis).await?;
        Ok(())
    }

    async fn restore_to_pending(
        &self,
        redis: &mut ConnectionManager,
        item: &QueueWireItem,
        json: &str,
    ) -> Result<()> {
        let _: i64 = redis.lrem(redis_keys::QUEUE_PROCESSING, 1, json).await?;
        let _: i64 = redis.lpush(redis_keys::QUEUE_PENDING, json).await?;
        let _: i64 = redis.del(redis_keys::queue_item(QueueId(item.id))).await?;
        Ok(())
    }

    /// On `WRONGTYPE` (stale data left at a list key), wipe both queue list
    /// keys and let the caller fall through to PostgreSQL. Best-effort — a
    /// failure here just means the keys survive until the next successful
    /// wipe.
    async fn wipe_lists(&self, redis: &mut ConnectionManager) {
        let _: Result<(), redis::RedisError> = redis
            .del(&[redis_keys::QUEUE_PENDING, redis_keys::QUEUE_PROCESSING])
            .await;
    }
}
