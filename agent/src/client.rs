//! Coordinator REST client.
//!
//! Plain `reqwest` over ordinary HTTPS/HTTP — only the SLP/bot-connect leg
//! and, optionally, the Microsoft auth chain dial through the assigned
//! SOCKS proxy; talking to the coordinator itself never does.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use reconmc_core::error::ScanError;
use reconmc_core::model::{Agent, ProxyProtocol, QueueId};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedProxy {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub protocol: String,
}

impl ClaimedProxy {
    /// Turns the wire payload into the `reconmc_core::model::Proxy` shape
    /// the tunnel/SOCKS code expects, with the usage counters the agent has
    /// no business tracking set to a dummy value.
    pub fn to_proxy(&self) -> reconmc_core::model::Proxy {
        reconmc_core::model::Proxy {
            id: reconmc_core::model::ProxyId(self.id),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            protocol: if self.protocol == "socks4" {
                ProxyProtocol::Socks4
            } else {
                ProxyProtocol::Socks5
            },
            current_usage: 0,
            max_concurrent: 0,
            is_active: true,
            last_used_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedAccount {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl ClaimedAccount {
    pub fn is_cracked(&self) -> bool {
        self.kind == "cracked"
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedTask {
    pub queue_id: Uuid,
    pub server_address: String,
    pub port: u16,
    pub proxy: ClaimedProxy,
    pub account: ClaimedAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub level: &'static str,
    pub message: String,
}

impl LogLine {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level: level.as_str(),
            message: message.into(),
        }
    }
}

pub struct CoordinatorClient {
    http: Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, agent_id: &str, name: Option<&str>) -> Result<Agent, ScanError> {
        let resp = self
            .http
            .post(self.url("/api/agents/register"))
            .json(&json!({ "agentId": agent_id, "name": name }))
            .send()
            .await?;
        expect_ok(&resp)?;
        Ok(resp.json::<Agent>().await?)
    }

    pub async fn heartbeat(&self, agent_id: &str, status: &str) -> Result<(), ScanError> {
        let resp = self
            .http
            .post(self.url("/api/agents/heartbeat"))
            .json(&json!({ "agentId": agent_id, "status": status }))
            .send()
            .await?;
        expect_ok(&resp)?;
        Ok(())
    }

    pub async fn claim(&self, agent_id: &str) -> Result<Option<ClaimedTask>, ScanError> {
        let resp = self
            .http
            .post(self.url("/api/queue/claim"))
            .json(&json!({ "agentId": agent_id }))
            .send()
            .await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        expect_ok(&resp)?;
        Ok(Some(resp.json::<ClaimedTask>().await?))
    }

    pub async fn complete(&self, id: QueueId, result: Value, duration_ms: i64) -> Result<(), ScanError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/queue/{}/complete", id.0)))
            .json(&json!({ "result": result, "durationMs": duration_ms }))
            .send()
            .await?;
        expect_ok(&resp)?;
        Ok(())
    }

    pub async fn fail(&self, id: QueueId, error_message: &str, duration_ms: i64) -> Result<(), ScanError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/queue/{}/fail", id.0)))
            .json(&json!({ "errorMessage": error_message, "durationMs": duration_ms }))
            .send()
            .await?;
        expect_ok(&resp)?;
        Ok(())
    }

    pub async fn push_logs(&self, id: QueueId, agent_id: &str, logs: &[LogLine]) -> Result<(), ScanError> {
        if logs.is_empty() {
            return Ok(());
        }
        let resp = self
            .http
            .post(self.url(&format!("/api/tasks/{}/logs", id.0)))
            .json(&json!({ "agentId": agent_id, "logs": logs }))
            .send()
            .await?;
        expect_ok(&resp)?;
        Ok(())
    }

    pub async fn report_token_update(
        &self,
        account_id: Uuid,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), ScanError> {
        let resp = self
            .http
            .post(self.url(&format!("/api/accounts/{account_id}/token")))
            .json(&json!({ "accessToken": access_token, "refreshToken": refresh_token }))
            .send()
            .await?;
        expect_ok(&resp)?;
        Ok(())
    }
}

fn expect_ok(resp: &reqwest::Response) -> Result<(), ScanError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(ScanError::Network(format!(
            "coordinator returned {}",
            resp.status()
        )))
    }
}
