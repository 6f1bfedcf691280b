//! Process configuration.
//!
//! Loaded through `config` + `dotenvy`, same layering as the coordinator's
//! `Settings`: a `.env` file (if present) is read first, then real
//! environment variables win. Only `COORDINATOR_URL` is required; the rest
//! default to values sane for a single local agent.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub coordinator_url: String,

    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    pub agent_name: Option<String>,

    /// Whether this agent's Microsoft auth chain dials through its assigned
    /// SOCKS proxy rather than directly.
    #[serde(default)]
    pub route_ms_auth_through_proxy: bool,

    #[serde(default)]
    pub enable_auto_auth: bool,

    /// Verify sampled player ids against Minetools/PlayerDB instead of the
    /// strict-regex fast path — the coordinator's full-scan mode.
    #[serde(default)]
    pub use_async_classification: bool,

    #[serde(default = "default_cracked_password")]
    pub cracked_auth_password: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_agent_id() -> String {
    format!("agent-{}", uuid::Uuid::new_v4().simple())
}

fn default_cracked_password() -> String {
    "reconmc".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_heartbeat_interval_secs() -> u64 {
    20
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .set_default("agent_id", default_agent_id())?
            .set_default("route_ms_auth_through_proxy", false)?
            .set_default("enable_auto_auth", false)?
            .set_default("use_async_classification", false)?
            .set_default("cracked_auth_password", default_cracked_password())?
            .set_default("poll_interval_ms", default_poll_interval_ms())?
            .set_default("heartbeat_interval_secs", default_heartbeat_interval_secs())?
            .add_source(config::Environment::default())
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
