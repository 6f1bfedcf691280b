//! Agent registry: PostgreSQL row is authoritative for detail,
//! Redis `agents:online` is the truth of online-ness when available.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use sqlx::PgPool;
use tracing::warn;

use reconmc_core::error::{Result, ScanError};
use reconmc_core::model::{
    is_valid_agent_id, Agent, AgentId, AgentStatus, QueueId, AGENT_HEARTBEAT_TTL_SECS,
};

use crate::redis_keys;
use crate::rows::AgentRow;

/// Distinguishes "field not sent" from "field explicitly cleared" in a
/// heartbeat update — `currentQueueId: null` in the request body clears it,
/// while omitting the key leaves it untouched.
#[derive(Debug, Clone, Copy)]
pub enum Update<T> {
    Unchanged,
    Clear,
    Set(T),
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    #[serde(flatten)]
    pub agent: Agent,
    pub offline: bool,
}

#[derive(Clone)]
pub struct AgentRegistry {
    pg: PgPool,
    redis: Option<ConnectionManager>,
}

impl AgentRegistry {
    pub fn new(pg: PgPool, redis: Option<ConnectionManager>) -> Self {
        Self { pg, redis }
    }

    pub async fn register(&self, agent_id: &str, name: Option<String>) -> Result<Agent> {
        if !is_valid_agent_id(agent_id) {
            return Err(ScanError::Validation(format!("invalid agent id: {agent_id}")));
        }
        let name = name.unwrap_or_else(|| agent_id.to_string());
        let now = Utc::now();

        let row: AgentRow = sqlx::query_as(
            "INSERT INTO agents (id, name, status, current_queue_id, last_heartbeat, registered_at) \
             VALUES ($1, $2, 'idle', NULL, $3, $3) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, status = 'idle', current_queue_id = NULL, last_heartbeat = EXCLUDED.last_heartbeat \
             RETURNING id, name, status, current_queue_id, last_heartbeat, registered_at",
        )
        .bind(agent_id)
        .bind(&name)
        .bind(now)
        .fetch_one(&self.pg)
        .await?;

        if let Some(redis) = self.redis.clone() {
            if let Err(e) = self.mirror_to_redis(redis, agent_id, &name, AgentStatus::Idle, None, now).await {
                warn!(agent_id, error = %e, "failed to mirror agent registration into redis");
            }
        }

        Ok(row.try_into()?)
    }

    pub async fn heartbeat(
        &self,
        agent_id: &str,
        status: Option<AgentStatus>,
        current_queue_id: Update<QueueId>,
    ) -> Result<Agent> {
        let existing: Option<AgentRow> = sqlx::query_as(
            "SELECT id, name, status, current_queue_id, last_heartbeat, registered_at FROM agents WHERE id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pg)
        .await?;
        let Some(existing) = existing else {
            return Err(ScanError::NotFound);
        };

        let now = Utc::now();
        let status_str = status.map(|s| match s {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
        });

        let row: AgentRow = match current_queue_id {
            Update::Unchanged => sqlx::query_as(
                "UPDATE agents SET last_heartbeat = $2, status = COALESCE($3, status) WHERE id = $1 \
                 RETURNING id, name, status, current_queue_id, last_heartbeat, registered_at",
            )
            .bind(agent_id)
            .bind(now)
            .bind(status_str)
            .fetch_one(&self.pg)
            .await?,
            Update::Clear => sqlx::query_as(
                "UPDATE agents SET last_heartbeat = $2, status = COALESCE($3, status), current_queue_id = NULL \
                 WHERE id = $1 RETURNING id, name, status, current_queue_id, last_heartbeat, registered_at",
            )
            .bind(agent_id)
            .bind(now)
            .bind(status_str)
            .fetch_one(&self.pg)
            .await?,
            Update::Set(queue_id) => sqlx::query_as(
                "UPDATE agents SET last_heartbeat = $2, status = COALESCE($3, status), current_queue_id = $4 \
                 WHERE id = $1 RETURNING id, name, status, current_queue_id, last_heartbeat, registered_at",
            )
            .bind(agent_id)
            .bind(now)
            .bind(status_str)
            .bind(queue_id.0)
            .fetch_one(&self.pg)
            .await?,
        };

        if let Some(redis) = self.redis.clone() {
            let resolved_status = status.unwrap_or(AgentStatus::Idle);
            let queue_id = match current_queue_id {
                Update::Set(id) => Some(id),
                Update::Clear => None,
                Update::Unchanged => existing.current_queue_id.map(QueueId),
            };
            if let Err(e) = self
                .mirror_to_redis(redis, agent_id, &existing.name, resolved_status, queue_id, now)
                .await
            {
                warn!(agent_id, error = %e, "failed to refresh agent redis ttls on heartbeat");
            }
        }

        Ok(row.try_into()?)
    }

    pub async fn list(&self) -> Result<Vec<AgentSummary>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT id, name, status, current_queue_id, last_heartbeat, registered_at FROM agents ORDER BY registered_at",
        )
        .fetch_all(&self.pg)
        .await?;

        let online: Option<std::collections::HashSet<String>> = match self.redis.clone() {
            Some(mut redis) => match redis.smembers(redis_keys::AGENTS_ONLINE).await {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(error = %e, "redis unavailable for agent registry list, falling back to heartbeat age");
                    None
                }
            },
            None => None,
        };

        let now = Utc::now();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id_str = row.id.clone();
            let agent: Agent = row.try_into()?;
            let offline = match &online {
                Some(set) => !set.contains(&id_str),
                None => agent.is_offline(now),
            };
            out.push(AgentSummary { agent, offline });
        }
        Ok(out)
    }

    async fn mirror_to_redis(
        &self,
        mut redis: ConnectionManager,
        agent_id: &str,
        name: &str,
        status: AgentStatus,
        current_queue_id: Option<QueueId>,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let status_str = match status {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
        };
        let queue_id_str = current_queue_id.map(|q| q.0.to_string()).unwrap_or_default();

        let mut pipe = redis::pipe();
        pipe.sadd(redis_keys::AGENTS_ONLINE, agent_id);
        pipe.set_ex(redis_keys::agent_heartbeat(agent_id), now.to_rfc3339(), AGENT_HEARTBEAT_TTL_SECS);
        pipe.hset_multiple(
            redis_keys::agent_data(agent_id),
            &[
                ("name", name),
                ("status", status_str),
                ("currentQueueId", queue_id_str.as_str()),
            ],
        );
        pipe.expire(redis_keys::agent_data(agent_id), AGENT_HEARTBEAT_TTL_SECS as i64);

        pipe.query_async::<()>(&mut redis).await?;
        Ok(())
    }
}
