//! Queue service: PostgreSQL-of-record + Redis fast path,
//! atomic claim, completion writes server history.

mod address;
mod claim;
mod enqueue;
mod finalize;
mod status;

pub use address::ParsedTarget;
pub use enqueue::EnqueueSummary;
pub use finalize::FinalizeOutcome;
pub use status::QueueStats;

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use reconmc_core::model::{Account, Proxy, QueueId};

/// JSON shape mirrored into the Redis `queue:pending`/`queue:processing`
/// lists. Kept intentionally small — everything else about the
/// row lives in PostgreSQL, the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueWireItem {
    pub id: Uuid,
    pub server_address: String,
    pub hostname: Option<String>,
    pub resolved_ip: String,
    pub port: u16,
}

impl QueueWireItem {
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.resolved_ip, self.port)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub queue_id: QueueId,
    pub server_address: String,
    pub port: u16,
    pub proxy: ProxyPayload,
    pub account: AccountPayload,
}

/// Fields an agent actually needs to dial through the proxy — no host
/// credentials beyond what the tunnel requires, but the full tuple since the
/// agent is the one performing the SOCKS handshake.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyPayload {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: String,
}

impl From<&Proxy> for ProxyPayload {
    fn from(p: &Proxy) -> Self {
        Self {
            id: p.id.0,
            host: p.host.clone(),
            port: p.port,
            username: p.username.clone(),
            password: p.password.clone(),
            protocol: match p.protocol {
                reconmc_core::model::ProxyProtocol::Socks4 => "socks4".to_string(),
                reconmc_core::model::ProxyProtocol::Socks5 => "socks5".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPayload {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl From<&Account> for AccountPayload {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id.0,
            kind: match a.kind {
                reconmc_core::model::AccountType::Cracked => "cracked".to_string(),
                reconmc_core::model::AccountType::Microsoft => "microsoft".to_string(),
            },
            username: a.username.clone(),
            access_token: a.access_token.clone(),
            refresh_token: a.refresh_token.clone(),
        }
    }
}

#[derive(Clone)]
pub struct QueueService {
    pub(crate) pg: PgPool,
    pub(crate) redis: Option<ConnectionManager>,
}

impl QueueService {
    pub fn new(pg: PgPool, redis: Option<ConnectionManager>) -> Self {
        Self { pg, redis }
    }
}
