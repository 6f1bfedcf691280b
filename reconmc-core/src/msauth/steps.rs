//! The five HTTP calls of the refresh chain, each a thin wrapper that maps
//! transport and status-code outcomes onto `ScanError`.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::ScanError;

use super::cache::Combo;
use super::types::*;

const MS_TOKEN_URL: &str = "https://login.live.com/oauth20_token.srf";
const XBL_AUTH_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
const XSTS_AUTH_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
const MC_LOGIN_URL: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
const MC_PROFILE_URL: &str = "https://api.minecraftservices.com/minecraft/profile";

const RPS_TICKET_FORMATS: &[&str] = &["d=", "t=", ""];

/// Step 1: exchange a Microsoft refresh token for a fresh access/refresh
/// pair under the given `(clientId, scope)` combo.
///
/// The request body is built by hand, not via `reqwest::Form`, because both
/// `refresh_token` and `scope` must land on the wire exactly as given —
/// `scope` already carries its own `%20` escaping and must not be
/// double-encoded, and the refresh token must not be re-percent-encoded
/// either.
pub(super) async fn ms_refresh(
    client: &Client,
    refresh_token: &str,
    combo: Combo,
) -> Result<MsTokenResponse, ScanError> {
    let body = format!(
        "grant_type=refresh_token&client_id={client_id}&refresh_token={refresh_token}&scope={scope}",
        client_id = combo.client_id,
        refresh_token = refresh_token,
        scope = combo.scope,
    );

    let resp = client
        .post(MS_TOKEN_URL)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body)
        .timeout(Duration::from_secs(30))
        .send()
        .await?;

    match resp.status() {
        StatusCode::OK => Ok(resp.json::<MsTokenResponse>().await?),
        StatusCode::TOO_MANY_REQUESTS => Err(ScanError::RateLimited {
            retry_after_secs: 5,
        }),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
            Err(ScanError::Auth(format!("combo rejected: {:?}", combo)))
        }
        other => Err(ScanError::Auth(format!(
            "unexpected status from MS token endpoint: {other}"
        ))),
    }
}

/// Step 2: Xbox Live user authentication. Microsoft's RPS-ticket prefix
/// convention has drifted across client generations; try each known form
/// before giving up.
pub(super) async fn xbl_authenticate(
    client: &Client,
    ms_access_token: &str,
) -> Result<XboxAuthResponse, ScanError> {
    let mut last_err = None;
    for prefix in RPS_TICKET_FORMATS {
        let req = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS",
                site_name: "user.auth.xboxlive.com",
                rps_ticket: format!("{prefix}{ms_access_token}"),
            },
            relying_party: "http://auth.xboxlive.com",
            token_type: "JWT",
        };
        let resp = client
            .post(XBL_AUTH_URL)
            .json(&req)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        if resp.status() == StatusCode::OK {
            return Ok(resp.json::<XboxAuthResponse>().await?);
        }
        last_err = Some(format!(
            "XBL auth rejected ticket format {prefix:?}: {}",
            resp.status()
        ));
    }
    Err(ScanError::Auth(
        last_err.unwrap_or_else(|| "XBL auth failed".to_string()),
    ))
}

/// Step 3: XSTS authorization against the Minecraft relying party. A 401
/// here is terminal — the account needs adult-verification, is banned from
/// Xbox Live, or has no Xbox profile, and retrying will not help.
pub(super) async fn xsts_authenticate(
    client: &Client,
    xbl_token: &str,
) -> Result<XboxAuthResponse, ScanError> {
    let req = XstsAuthRequest {
        properties: XstsAuthProperties {
            sandbox_id: "RETAIL".to_string(),
            user_tokens: vec![xbl_token.to_string()],
        },
        relying_party: "rp://api.minecraftservices.com/",
        token_type: "JWT",
    };

    let resp = client
        .post(XSTS_AUTH_URL)
        .json(&req)
        .timeout(Duration::from_secs(30))
        .send()
        .await?;

    if resp.status() == StatusCode::UNAUTHORIZED {
        let detail = resp
            .json::<XstsErrorResponse>()
            .await
            .ok()
            .and_then(|e| e.xerr)
            .map(|code| format!("XErr {code}"))
            .unwrap_or_else(|| "unknown XSTS rejection".to_string());
        return Err(ScanError::Auth(format!("XSTS rejected account: {detail}")));
    }
    if resp.status() != StatusCode::OK {
        return Err(ScanError::Auth(format!(
            "unexpected XSTS status: {}",
            resp.status()
        )));
    }
    Ok(resp.json::<XboxAuthResponse>().await?)
}

const MC_LOGIN_BACKOFFS_SECS: &[u64] = &[5, 10, 15];

/// Step 4: exchange the XSTS token for a Minecraft access token, retrying
/// on 429 with a 5/10/15s backoff schedule up to three attempts.
pub(super) async fn mc_login(
    client: &Client,
    user_hash: &str,
    xsts_token: &str,
) -> Result<McLoginResponse, ScanError> {
    let identity_token = format!("XBL3.0 x={user_hash};{xsts_token}");

    for (attempt, backoff) in MC_LOGIN_BACKOFFS_SECS.iter().enumerate() {
        let resp = client
            .post(MC_LOGIN_URL)
            .json(&McLoginRequest {
                identity_token: identity_token.clone(),
            })
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => return Ok(resp.json::<McLoginResponse>().await?),
            StatusCode::TOO_MANY_REQUESTS if attempt + 1 < MC_LOGIN_BACKOFFS_SECS.len() => {
                tokio::time::sleep(Duration::from_secs(*backoff)).await;
                continue;
            }
            other => {
                return Err(ScanError::Auth(format!(
                    "minecraft login failed: {other}"
                )))
            }
        }
    }
    Err(ScanError::RateLimited {
        retry_after_secs: *MC_LOGIN_BACKOFFS_SECS.last().unwrap(),
    })
}

/// Step 5: profile lookup. On rate-limit, sleep once and retry; if it still
/// fails, the caller falls back to decoding the MC access token's JWT
/// payload for an embedded profile claim.
pub(super) async fn fetch_profile(
    client: &Client,
    mc_access_token: &str,
) -> Result<McProfile, ScanError> {
    for attempt in 0..2 {
        let resp = client
            .get(MC_PROFILE_URL)
            .bearer_auth(mc_access_token)
            .timeout(Duration::from_secs(30))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => return Ok(resp.json::<McProfile>().await?),
            StatusCode::TOO_MANY_REQUESTS if attempt == 0 => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            StatusCode::NOT_FOUND => {
                return Err(ScanError::Auth(
                    "account owns no Minecraft profile".to_string(),
                ))
            }
            other => return Err(ScanError::Auth(format!("profile lookup failed: {other}"))),
        }
    }
    Err(ScanError::RateLimited {
        retry_after_secs: 5,
    })
}

/// Fast path: if the caller's current MC
/// access token still validates against the profile endpoint, skip the
/// entire refresh chain.
pub(super) async fn profile_still_valid(client: &Client, mc_access_token: &str) -> bool {
    matches!(
        client
            .get(MC_PROFILE_URL)
            .bearer_auth(mc_access_token)
            .timeout(Duration::from_secs(30))
            .send()
            .await,
        Ok(resp) if resp.status() == StatusCode::OK
    )
}

/// Best-effort fallback: a Minecraft access token is itself a JWT; its
/// payload sometimes embeds `pfd` (profile data) or legacy `profiles.mc`
/// claims that let us recover `{id, name}` without calling the profile
/// endpoint at all.
pub(super) fn profile_from_jwt(mc_access_token: &str) -> Option<McProfile> {
    let payload_b64 = mc_access_token.split('.').nth(1)?;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&payload).ok()?;

    if let Some(entry) = value
        .get("pfd")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.iter().find(|e| e.get("type").and_then(|t| t.as_str()) == Some("mc")))
    {
        let id = entry.get("id")?.as_str()?.to_string();
        let name = entry.get("name")?.as_str()?.to_string();
        return Some(McProfile { id, name });
    }

    let entry = value.get("profiles")?.get("mc")?;
    let id = entry.get("id")?.as_str()?.to_string();
    let name = entry.get("name")?.as_str()?.to_string();
    Some(McProfile { id, name })
}
