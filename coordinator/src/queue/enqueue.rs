//! Batch insertion with in-batch and cross-batch dedupe.

use std::collections::HashSet;
use std::net::IpAddr;

use redis::AsyncCommands;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use reconmc_core::error::Result;

use crate::redis_keys;

use super::address::parse_and_resolve;
use super::{QueueService, QueueWireItem};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EnqueueSummary {
    pub added: usize,
    pub skipped: usize,
}

impl QueueService {
    /// Parse, SSRF-filter, dedupe, and bulk-insert a batch of raw server
    /// address strings. Mirrors newly-inserted rows into Redis on a
    /// best-effort basis — PostgreSQL has already committed by the time the
    /// mirror step runs, so a Redis hiccup here never loses a target.
    pub async fn enqueue(&self, addresses: Vec<String>) -> Result<EnqueueSummary> {
        let mut seen: HashSet<(IpAddr, u16)> = HashSet::new();
        let mut candidates = Vec::new();
        let mut skipped = 0usize;

        for addr in addresses {
            match parse_and_resolve(&addr).await {
                Ok(Some(target)) => {
                    if seen.insert((target.resolved_ip, target.port)) {
                        candidates.push(target);
                    } else {
                        skipped += 1;
                    }
                }
                Ok(None) => skipped += 1, // SSRF-dropped
                Err(e) => {
                    warn!(address = %addr, error = %e, "dropping unresolvable enqueue target");
                    skipped += 1;
                }
            }
        }

        if candidates.is_empty() {
            return Ok(EnqueueSummary { added: 0, skipped });
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO scan_queue (server_address, hostname, resolved_ip, port) ",
        );
        qb.push_values(&candidates, |mut b, t| {
            b.push_bind(&t.original)
                .push_bind(&t.hostname)
                .push_bind(t.resolved_ip.to_string())
                .push_bind(t.port as i32);
        });
        qb.push(
            " ON CONFLICT (resolved_ip, port) DO NOTHING RETURNING id, server_address, hostname, resolved_ip, port",
        );

        let rows: Vec<(Uuid, String, Option<String>, String, i32)> =
            qb.build_query_as().fetch_all(&self.pg).await?;

        skipped += candidates.len() - rows.len();

        let inserted: Vec<QueueWireItem> = rows
            .into_iter()
            .map(|(id, server_address, hostname, resolved_ip, port)| QueueWireItem {
                id,
                server_address,
                hostname,
                resolved_ip,
                port: port as u16,
            })
            .collect();

        let added = inserted.len();

        if let Some(redis) = &self.redis {
            if let Err(e) = self.mirror_inserted(redis, &inserted).await {
                warn!(error = %e, "failed to mirror newly enqueued rows into redis");
            }
        }

        Ok(EnqueueSummary { added, skipped })
    }

    async fn mirror_inserted(
        &self,
        redis: &redis::aio::ConnectionManager,
        items: &[QueueWireItem],
    ) -> Result<()> {
        let mut conn = redis.clone();
        for item in items {
            let json = serde_json::to_string(item)
                .map_err(|e| reconmc_core::error::ScanError::Internal(e.to_string()))?;
            conn.rpush::<_, _, ()>(redis_keys::QUEUE_PENDING, &json).await?;
            conn.hset::<_, _, _, ()>(redis_keys::QUEUE_DUPLICATES, item.dedupe_key(), item.id.to_string())
                .await?;
        }
        Ok(())
    }
}
