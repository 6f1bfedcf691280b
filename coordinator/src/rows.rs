//! Plain `sqlx::FromRow` row shapes and their conversions into
//! `reconmc_core::model` types.
//!
//! The domain types use newtype ids, enums, and `IpAddr` — none of which
//! `sqlx`'s derive can decode directly from Postgres columns without extra
//! `Type`/`Decode` impls per type. A plain row-struct-plus-mapping keeps the
//! domain types free of a `sqlx` dependency on the type level, at the cost
//! of one `From` impl per table.

use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use reconmc_core::error::ScanError;
use reconmc_core::model::*;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(FromRow)]
pub struct ProxyRow {
    pub id: Uuid,
    pub host: String,
    pub port: i32,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: String,
    pub current_usage: i32,
    pub max_concurrent: i32,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProxyRow> for Proxy {
    type Error = ScanError;

    fn try_from(r: ProxyRow) -> Result<Self, Self::Error> {
        let protocol = match r.protocol.as_str() {
            "socks4" => ProxyProtocol::Socks4,
            "socks5" => ProxyProtocol::Socks5,
            other => return Err(ScanError::Internal(format!("unknown proxy protocol {other}"))),
        };
        Ok(Proxy {
            id: ProxyId(r.id),
            host: r.host,
            port: r.port as u16,
            username: r.username,
            password: r.password,
            protocol,
            current_usage: r.current_usage,
            max_concurrent: r.max_concurrent,
            is_active: r.is_active,
            last_used_at: r.last_used_at,
        })
    }
}

#[derive(FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub current_usage: i32,
    pub max_concurrent: i32,
    pub is_active: bool,
    pub is_valid: bool,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub last_validation_error: Option<String>,
}

impl TryFrom<AccountRow> for Account {
    type Error = ScanError;

    fn try_from(r: AccountRow) -> Result<Self, Self::Error> {
        let kind = match r.kind.as_str() {
            "cracked" => AccountType::Cracked,
            "microsoft" => AccountType::Microsoft,
            other => return Err(ScanError::Internal(format!("unknown account type {other}"))),
        };
        Ok(Account {
            id: AccountId(r.id),
            kind,
            username: r.username,
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            current_usage: r.current_usage,
            max_concurrent: r.max_concurrent,
            is_active: r.is_active,
            is_valid: r.is_valid,
            last_validated_at: r.last_validated_at,
            last_validation_error: r.last_validation_error,
        })
    }
}

#[derive(FromRow)]
pub struct AgentRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub current_queue_id: Option<Uuid>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = ScanError;

    fn try_from(r: AgentRow) -> Result<Self, Self::Error> {
        let status = match r.status.as_str() {
            "idle" => AgentStatus::Idle,
            "busy" => AgentStatus::Busy,
            other => return Err(ScanError::Internal(format!("unknown agent status {other}"))),
        };
        Ok(Agent {
            id: AgentId(r.id),
            name: r.name,
            status,
            current_queue_id: r.current_queue_id.map(QueueId),
            last_heartbeat: r.last_heartbeat,
            registered_at: r.registered_at,
        })
    }
}

#[derive(FromRow)]
pub struct ScanQueueRow {
    pub id: Uuid,
    pub server_address: String,
    pub hostname: Option<String>,
    pub resolved_ip: String,
    pub port: i32,
    pub status: String,
    pub assigned_agent_id: Option<String>,
    pub assigned_proxy_id: Option<Uuid>,
    pub assigned_account_id: Option<Uuid>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScanQueueRow> for ScanQueueEntry {
    type Error = ScanError;

    fn try_from(r: ScanQueueRow) -> Result<Self, Self::Error> {
        let status = match r.status.as_str() {
            "pending" => QueueStatus::Pending,
            "processing" => QueueStatus::Processing,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            other => return Err(ScanError::Internal(format!("unknown queue status {other}"))),
        };
        let resolved_ip = IpAddr::from_str(&r.resolved_ip)
            .map_err(|e| ScanError::Internal(format!("corrupt resolved_ip in row: {e}")))?;
        Ok(ScanQueueEntry {
            id: QueueId(r.id),
            server_address: r.server_address,
            hostname: r.hostname,
            resolved_ip,
            port: r.port as u16,
            status,
            assigned_agent_id: r.assigned_agent_id.map(AgentId),
            assigned_proxy_id: r.assigned_proxy_id.map(ProxyId),
            assigned_account_id: r.assigned_account_id.map(AccountId),
            retry_count: r.retry_count,
            error_message: r.error_message,
            created_at: r.created_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
        })
    }
}

#[derive(FromRow)]
pub struct ServerRow {
    pub resolved_ip: String,
    pub port: i32,
    pub server_address: String,
    pub hostnames: Vec<String>,
    pub primary_hostname: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_scanned_at: DateTime<Utc>,
    pub scan_count: i64,
    pub latest_result: Option<serde_json::Value>,
    pub scan_history: serde_json::Value,
}

impl TryFrom<ServerRow> for Server {
    type Error = ScanError;

    fn try_from(r: ServerRow) -> Result<Self, Self::Error> {
        let resolved_ip = IpAddr::from_str(&r.resolved_ip)
            .map_err(|e| ScanError::Internal(format!("corrupt resolved_ip in row: {e}")))?;
        let scan_history: Vec<ScanHistoryEntry> = serde_json::from_value(r.scan_history)
            .map_err(|e| ScanError::Internal(format!("corrupt scan_history jsonb: {e}")))?;
        Ok(Server {
            resolved_ip,
            port: r.port as u16,
            server_address: r.server_address,
            hostnames: r.hostnames,
            primary_hostname: r.primary_hostname,
            first_seen_at: r.first_seen_at,
            last_scanned_at: r.last_scanned_at,
            scan_count: r.scan_count,
            latest_result: r.latest_result,
            scan_history,
        })
    }
}

#[derive(FromRow)]
pub struct TaskLogRow {
    pub id: Uuid,
    pub queue_id: Uuid,
    pub agent_id: String,
    pub level: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<TaskLogRow> for TaskLog {
    type Error = ScanError;

    fn try_from(r: TaskLogRow) -> Result<Self, Self::Error> {
        let level = match r.level.as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => return Err(ScanError::Internal(format!("unknown log level {other}"))),
        };
        Ok(TaskLog {
            id: r.id,
            queue_id: QueueId(r.queue_id),
            agent_id: AgentId(r.agent_id),
            level,
            message: r.message,
            timestamp: r.timestamp,
        })
    }
}
