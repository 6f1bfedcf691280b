//! Complete/fail: single idempotent path that
//! releases resources, writes server history, and deletes the queue row.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use reconmc_core::error::Result;
use reconmc_core::model::{
    AccountId, LogLevel, ProxyId, QueueId, ScanHistoryEntry, Server, TaskLogLine,
    SCAN_HISTORY_LOG_CAP, TASK_LOG_FETCH_CAP,
};

use crate::allocator;
use crate::redis_keys;
use crate::rows::{ScanQueueRow, ServerRow, TaskLogRow};

use super::{QueueService, QueueWireItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeOutcome {
    Completed,
    Failed,
    /// The row was already terminal or gone — finalize is idempotent, so a
    /// late duplicate call is a no-op rather than an error.
    AlreadyFinalized,
}

impl QueueService {
    pub async fn complete(&self, queue_id: QueueId, result: Value, duration_ms: Option<i64>) -> Result<FinalizeOutcome> {
        self.finalize(queue_id, Some(result), None, duration_ms).await
    }

    pub async fn fail(&self, queue_id: QueueId, error_message: String, duration_ms: Option<i64>) -> Result<FinalizeOutcome> {
        self.finalize(queue_id, None, Some(error_message), duration_ms).await
    }

    async fn finalize(
        &self,
        queue_id: QueueId,
        result: Option<Value>,
        error_message: Option<String>,
        duration_ms: Option<i64>,
    ) -> Result<FinalizeOutcome> {
        let mut tx = self.pg.begin().await?;

        let row: Option<ScanQueueRow> = sqlx::query_as(
            "SELECT id, server_address, hostname, resolved_ip, port, status, \
             assigned_agent_id, assigned_proxy_id, assigned_account_id, \
             retry_count, error_message, created_at, started_at, completed_at \
             FROM scan_queue WHERE id = $1 FOR UPDATE",
        )
        .bind(queue_id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(FinalizeOutcome::AlreadyFinalized);
        };

        if row.status == "completed" || row.status == "failed" {
            tx.commit().await?;
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        allocator::release(
            &mut tx,
            row.assigned_proxy_id.map(ProxyId),
            row.assigned_account_id.map(AccountId),
        )
        .await?;

        if let Some(agent_id) = &row.assigned_agent_id {
            sqlx::query("UPDATE agents SET status = 'idle', current_queue_id = NULL WHERE id = $1")
                .bind(agent_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let log_rows: Vec<TaskLogRow> = sqlx::query_as(
            "SELECT id, queue_id, agent_id, level, message, timestamp FROM task_logs \
             WHERE queue_id = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(queue_id.0)
        .bind(TASK_LOG_FETCH_CAP)
        .fetch_all(&mut *tx)
        .await?;

        let mut logs: Vec<TaskLogLine> = log_rows
            .into_iter()
            .rev() // fetched newest-first, history entries read chronologically
            .map(|r| TaskLogLine {
                level: match r.level.as_str() {
                    "debug" => LogLevel::Debug,
                    "info" => LogLevel::Info,
                    "warn" => LogLevel::Warn,
                    _ => LogLevel::Error,
                },
                message: r.message,
                timestamp: r.timestamp,
            })
            .collect();
        logs.truncate(SCAN_HISTORY_LOG_CAP);

        let now = Utc::now();
        let history_entry = ScanHistoryEntry {
            timestamp: now,
            result: result.clone(),
            error_message: error_message.clone(),
            duration_ms,
            logs,
        };

        self.upsert_server(&mut tx, &row, history_entry, now).await?;

        sqlx::query("DELETE FROM scan_queue WHERE id = $1")
            .bind(queue_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if let Some(redis) = self.redis.clone() {
            self.cleanup_redis(redis, &row).await;
        }

        Ok(if error_message.is_some() {
            FinalizeOutcome::Failed
        } else {
            FinalizeOutcome::Completed
        })
    }

    /// Upsert the permanent `servers` row keyed by `(resolvedIp, port)`:
    /// prepend the history entry (truncated to 100), merge in any new
    /// hostname, bump `scanCount`/`lastScannedAt`.
    async fn upsert_server(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        row: &ScanQueueRow,
        entry: ScanHistoryEntry,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let existing: Option<ServerRow> = sqlx::query_as(
            "SELECT resolved_ip, port, server_address, hostnames, primary_hostname, \
             first_seen_at, last_scanned_at, scan_count, latest_result, scan_history \
             FROM servers WHERE resolved_ip = $1 AND port = $2 FOR UPDATE",
        )
        .bind(&row.resolved_ip)
        .bind(row.port)
        .fetch_optional(&mut **tx)
        .await?;

        let latest_result = entry.result.clone();

        let mut server: Server = match existing {
            Some(existing_row) => existing_row.try_into()?,
            None => Server {
                resolved_ip: row.resolved_ip.parse().map_err(|e| {
                    reconmc_core::error::ScanError::Internal(format!("corrupt resolved_ip: {e}"))
                })?,
                port: row.port as u16,
                server_address: row.server_address.clone(),
                hostnames: Vec::new(),
                primary_hostname: row.hostname.clone(),
                first_seen_at: now,
                last_scanned_at: now,
                scan_count: 0,
                latest_result: None,
                scan_history: Vec::new(),
            },
        };

        if let Some(hostname) = &row.hostname {
            server.add_hostname(hostname);
        }
        server.push_history(entry);
        server.last_scanned_at = now;
        server.scan_count += 1;
        server.latest_result = latest_result;

        let history_json = serde_json::to_value(&server.scan_history).map_err(|e| {
            reconmc_core::error::ScanError::Internal(format!("failed to serialize scan history: {e}"))
        })?;

        sqlx::query(
            "INSERT INTO servers (resolved_ip, port, server_address, hostnames, primary_hostname, \
             first_seen_at, last_scanned_at, scan_count, latest_result, scan_history) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (resolved_ip, port) DO UPDATE SET \
               hostnames = EXCLUDED.hostnames, \
               last_scanned_at = EXCLUDED.last_scanned_at, \
               scan_count = EXCLUDED.scan_count, \
               latest_result = EXCLUDED.latest_result, \
               scan_history = EXCLUDED.scan_history",
        )
        .bind(row.resolved_ip.clone())
        .bind(row.port)
        .bind(&server.server_address)
        .bind(&server.hostnames)
        .bind(&server.primary_hostname)
        .bind(server.first_seen_at)
        .bind(server.last_scanned_at)
        .bind(server.scan_count)
        .bind(&server.latest_result)
        .bind(history_json)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Best-effort cleanup of the three Redis keys this item touched.
    /// Reconstructs the exact JSON that was pushed to `queue:processing`
    /// from the row's stored fields, since the wire item serializes
    /// deterministically.
    async fn cleanup_redis(&self, mut redis: redis::aio::ConnectionManager, row: &ScanQueueRow) {
        let item = QueueWireItem {
            id: row.id,
            server_address: row.server_address.clone(),
            hostname: row.hostname.clone(),
            resolved_ip: row.resolved_ip.clone(),
            port: row.port as u16,
        };
        let Ok(json) = serde_json::to_string(&item) else {
            return;
        };

        let mut pipe = redis::pipe();
        pipe.del(redis_keys::queue_item(QueueId(row.id)));
        pipe.hdel(redis_keys::QUEUE_DUPLICATES, item.dedupe_key());
        pipe.lrem(redis_keys::QUEUE_PROCESSING, 1, &json);

        if let Err(e) = pipe.query_async::<()>(&mut redis).await {
            warn!(queue_id = %row.id, error = %e, "failed to clean up redis keys after finalize");
        }
    }
}
