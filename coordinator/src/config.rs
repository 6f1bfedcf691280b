//! Process configuration.
//!
//! Loaded through `config` + `dotenvy`: a `.env` file (if present) is read
//! first, then real environment variables take precedence. Nothing panics
//! on a missing optional var — only `DATABASE_URL` is required.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub reconmc_api_key: Option<String>,
    #[serde(default)]
    pub reconmc_disable_auth: bool,
    #[serde(default = "default_bind")]
    pub bind_addr: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let cfg = config::Config::builder()
            .set_default("bind_addr", default_bind())?
            .set_default("reconmc_disable_auth", false)?
            .add_source(config::Environment::default())
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    pub fn auth_enabled(&self) -> bool {
        !self.reconmc_disable_auth
    }
}
