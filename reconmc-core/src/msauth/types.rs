//! Request/response shapes for the Microsoft -> Xbox Live -> XSTS ->
//! Minecraft chain.

use serde::{Deserialize, Serialize};

use crate::model::AccountId;

use super::cache::Combo;

/// Known-good `(clientId, scope)` pairs tried in order during a full scan.
/// `CLIENT_IDS x SCOPES` gives the 5x4 = 20-combination search space tried
/// during a full scan; a cached combo skips straight to one entry.
pub const CLIENT_IDS: &[&str] = &[
    "00000000402b5328",
    "000000004c12ae6f",
    "54fcdf8a-3d1b-4bfe-823f-2e3b04e20c67",
    "1fddcde6-9d1d-4b3a-8b26-7c7702fc1fc7",
    "00000000480ba593",
];

pub const SCOPES: &[&str] = &[
    "XboxLive.signin%20XboxLive.offline_access",
    "service::user.auth.xboxlive.com::MBI_SSL",
    "XboxLive.signin offline_access",
    "service::user.auth.xboxlive.com::MBI_SSL offline_access",
];

pub fn all_combos() -> Vec<Combo> {
    let mut out = Vec::with_capacity(CLIENT_IDS.len() * SCOPES.len());
    for client_id in CLIENT_IDS {
        for scope in SCOPES {
            out.push(Combo { client_id, scope });
        }
    }
    out
}

#[derive(Debug, Deserialize)]
pub(super) struct MsTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub(super) struct XblAuthRequest<'a> {
    #[serde(rename = "Properties")]
    pub properties: XblAuthProperties<'a>,
    #[serde(rename = "RelyingParty")]
    pub relying_party: &'a str,
    #[serde(rename = "TokenType")]
    pub token_type: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct XblAuthProperties<'a> {
    #[serde(rename = "AuthMethod")]
    pub auth_method: &'a str,
    #[serde(rename = "SiteName")]
    pub site_name: &'a str,
    #[serde(rename = "RpsTicket")]
    pub rps_ticket: String,
}

#[derive(Debug, Serialize)]
pub(super) struct XstsAuthRequest<'a> {
    #[serde(rename = "Properties")]
    pub properties: XstsAuthProperties,
    #[serde(rename = "RelyingParty")]
    pub relying_party: &'a str,
    #[serde(rename = "TokenType")]
    pub token_type: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct XstsAuthProperties {
    #[serde(rename = "SandboxId")]
    pub sandbox_id: String,
    #[serde(rename = "UserTokens")]
    pub user_tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct XboxAuthResponse {
    #[serde(rename = "Token")]
    pub token: String,
    #[serde(rename = "DisplayClaims")]
    pub display_claims: DisplayClaims,
}

#[derive(Debug, Deserialize)]
pub(super) struct DisplayClaims {
    pub xui: Vec<XuiEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct XuiEntry {
    pub uhs: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    pub xerr: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct McLoginRequest {
    pub identity_token: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct McLoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McProfile {
    pub id: String,
    pub name: String,
}

/// Final bundle handed back to the caller (and, via the callback, persisted
/// by the coordinator) after a successful refresh.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub account_id: AccountId,
    pub mc_access_token: String,
    pub ms_refresh_token: String,
    pub profile: McProfile,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub combo: Combo,
}

/// Emitted to the caller's callback whenever a refresh mints a new
/// Microsoft refresh token, so the coordinator can persist it before the
/// old one expires.
#[derive(Debug, Clone)]
pub struct TokenUpdate {
    pub account_id: AccountId,
    pub ms_refresh_token: String,
    pub mc_access_token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}
