//! Data model shared by both binaries.
//!
//! Newtype ids keep the four identifier spaces (proxy/account/agent/queue)
//! from getting crossed at call sites; the original schema just used bare
//! columns but nothing stops a Rust signature from being stricter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(pub Uuid);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `^[A-Za-z0-9_-]{1,100}$`
pub fn is_valid_agent_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 100
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ── Proxy ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Socks4,
    Socks5,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    pub id: ProxyId,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: ProxyProtocol,
    pub current_usage: i32,
    pub max_concurrent: i32,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

// ── Account ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Cracked,
    Microsoft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    #[serde(rename = "type")]
    pub kind: AccountType,
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

// ── Agent ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub current_queue_id: Option<QueueId>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    /// `now - lastHeartbeat > 60s`.
    pub fn is_offline(&self, now: DateTime<Utc>) -> bool {
        (now - self.last_heartbeat).num_seconds() > 60
    }
}

pub const AGENT_HEARTBEAT_TTL_SECS: u64 = 70;
pub const AGENT_OFFLINE_THRESHOLD_SECS: i64 = 60;

// ── ScanQueue ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanQueueEntry {
    pub id: QueueId,
    pub server_address: String,
    pub hostname: Option<String>,
    pub resolved_ip: IpAddr,
    pub port: u16,
    pub status: QueueStatus,
    pub assigned_agent_id: Option<AgentId>,
    pub assigned_proxy_id: Option<ProxyId>,
    pub assigned_account_id: Option<AccountId>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ScanQueueEntry {
    /// Dedupe key used for the unique `(resolvedIp, port)` constraint and
    /// for the Redis `queue:duplicates` hash.
    pub fn dedupe_key(ip: IpAddr, port: u16) -> String {
        format!("{ip}:{port}")
    }
}

pub const STUCK_TASK_THRESHOLD_SECS: i64 = 5 * 60;
pub const QUEUE_ITEM_LOCK_TTL_SECS: u64 = 300;

// ── Server ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub logs: Vec<TaskLogLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogLine {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub resolved_ip: IpAddr,
    pub port: u16,
    pub server_address: String,
    pub hostnames: Vec<String>,
    pub primary_hostname: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_scanned_at: DateTime<Utc>,
    pub scan_count: i64,
    pub latest_result: Option<serde_json::Value>,
    pub scan_history: Vec<ScanHistoryEntry>,
}

pub const SERVER_HISTORY_CAP: usize = 100;
pub const TASK_LOG_FETCH_CAP: i64 = 500;
pub const SCAN_HISTORY_LOG_CAP: usize = 500;

impl Server {
    /// Prepend `entry` and truncate to [`SERVER_HISTORY_CAP`], newest first.
    pub fn push_history(&mut self, entry: ScanHistoryEntry) {
        self.scan_history.insert(0, entry);
        self.scan_history.truncate(SERVER_HISTORY_CAP);
    }

    pub fn add_hostname(&mut self, hostname: &str) {
        if !self.hostnames.iter().any(|h| h == hostname) {
            self.hostnames.push(hostname.to_string());
        }
    }
}

// ── TaskLog ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    pub id: Uuid,
    pub queue_id: QueueId,
    pub agent_id: AgentId,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Floor-at-zero release, as required by the allocator's double-release
/// safety invariant.
pub fn release_usage(current: i32) -> i32 {
    (current - 1).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_regex() {
        assert!(is_valid_agent_id("agent-1"));
        assert!(is_valid_agent_id("a"));
        assert!(!is_valid_agent_id(""));
        assert!(!is_valid_agent_id("agent 1"));
        assert!(!is_valid_agent_id(&"a".repeat(101)));
    }

    #[test]
    fn release_usage_floors_at_zero() {
        assert_eq!(release_usage(1), 0);
        assert_eq!(release_usage(0), 0);
        assert_eq!(release_usage(5), 4);
    }

    #[test]
    fn dedupe_key_format() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(ScanQueueEntry::dedupe_key(ip, 25565), "192.0.2.7:25565");
    }
}
