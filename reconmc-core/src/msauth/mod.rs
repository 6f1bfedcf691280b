//! Microsoft -> Xbox Live -> XSTS -> Minecraft authentication chain.
//!
//! [`MsAuthChain::refresh`] is the single entry point: it tries the
//! account's cached `(clientId, scope)` combo first, falls back to a full
//! 5x4 scan on a cache miss or cached-combo failure, and invokes the
//! configured callback whenever a refresh mints a new Microsoft refresh
//! token so the caller can persist it before the old one is invalidated by
//! the next rotation.

mod cache;
mod steps;
mod types;

pub use cache::{Combo, ComboCache};
pub use types::{McProfile, TokenBundle, TokenUpdate};

use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::model::AccountId;

use types::all_combos;

/// Invoked after every successful refresh that rotates the Microsoft
/// refresh token. Boxed so the coordinator can close over a database handle
/// without `MsAuthChain` needing to know about storage.
pub type TokenCallback = Box<dyn Fn(TokenUpdate) + Send + Sync>;

pub struct MsAuthChain {
    client: Client,
    cache: Arc<ComboCache>,
    on_token_update: Option<TokenCallback>,
}

impl MsAuthChain {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: Arc::new(ComboCache::new()),
            on_token_update: None,
        }
    }

    pub fn with_callback(mut self, callback: TokenCallback) -> Self {
        self.on_token_update = Some(callback);
        self
    }

    /// Full refresh flow for `account_id`. `current_mc_token`, if given,
    /// enables the fast path: a single profile-endpoint call that skips the
    /// whole chain when the existing token is still live.
    pub async fn refresh(
        &self,
        account_id: AccountId,
        ms_refresh_token: &str,
        current_mc_token: Option<&str>,
    ) -> Result<TokenBundle, ScanError> {
        if let Some(token) = current_mc_token {
            if steps::profile_still_valid(&self.client, token).await {
                debug!(%account_id, "fast path: existing access token still valid");
                let profile = steps::fetch_profile(&self.client, token)
                    .await
                    .or_else(|_| {
                        steps::profile_from_jwt(token).ok_or(ScanError::Auth(
                            "fast path valid but profile lookup failed".to_string(),
                        ))
                    })?;
                return Ok(TokenBundle {
                    account_id,
                    mc_access_token: token.to_string(),
                    ms_refresh_token: ms_refresh_token.to_string(),
                    profile,
                    expires_at: chrono::Utc::now() + chrono::Duration::hours(24),
                    combo: Combo {
                        client_id: "",
                        scope: "",
                    },
                });
            }
        }

        let cached = self.cache.get(ms_refresh_token);
        let combos: Vec<Combo> = match cached {
            Some(combo) => std::iter::once(combo).chain(all_combos()).collect(),
            None => all_combos(),
        };

        let mut last_err = None;
        for combo in combos {
            match self.try_combo(account_id, ms_refresh_token, combo).await {
                Ok(bundle) => {
                    self.cache.put(ms_refresh_token, combo);
                    if let Some(cb) = &self.on_token_update {
                        cb(TokenUpdate {
                            account_id,
                            ms_refresh_token: bundle.ms_refresh_token.clone(),
                            mc_access_token: bundle.mc_access_token.clone(),
                            expires_at: bundle.expires_at,
                        });
                    }
                    return Ok(bundle);
                }
                Err(ScanError::RateLimited { retry_after_secs }) => {
                    tokio::time::sleep(std::time::Duration::from_secs(retry_after_secs)).await;
                    last_err = Some(ScanError::RateLimited { retry_after_secs });
                }
                Err(e) => {
                    self.cache.invalidate(ms_refresh_token);
                    last_err = Some(e);
                }
            }
        }

        warn!(%account_id, "exhausted all client/scope combinations");
        Err(last_err.unwrap_or(ScanError::Auth("no combo accepted".to_string())))
    }

    async fn try_combo(
        &self,
        account_id: AccountId,
        ms_refresh_token: &str,
        combo: Combo,
    ) -> Result<TokenBundle, ScanError> {
        let ms_token = steps::ms_refresh(&self.client, ms_refresh_token, combo).await?;
        let xbl = steps::xbl_authenticate(&self.client, &ms_token.access_token).await?;
        let user_hash = xbl
            .display_claims
            .xui
            .first()
            .map(|e| e.uhs.clone())
            .ok_or_else(|| ScanError::Auth("XBL response missing user hash".to_string()))?;
        let xsts = steps::xsts_authenticate(&self.client, &xbl.token).await?;
        let mc = steps::mc_login(&self.client, &user_hash, &xsts.token).await?;

        let profile = match steps::fetch_profile(&self.client, &mc.access_token).await {
            Ok(p) => p,
            Err(_) => steps::profile_from_jwt(&mc.access_token)
                .ok_or_else(|| ScanError::Auth("no profile available via any path".to_string()))?,
        };

        Ok(TokenBundle {
            account_id,
            mc_access_token: mc.access_token,
            ms_refresh_token: ms_token.refresh_token,
            profile,
            expires_at: chrono::Utc::now() + chrono::Duration::hours(24),
            combo,
        })
    }
}
