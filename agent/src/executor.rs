//! Scan executor: the per-task pipeline a claimed queue item runs through.
//!
//! Resolve (SSRF-guarded) → optional SRV → SLP over the assigned SOCKS
//! proxy → server-mode classification → bot connect/spawn → anti-auth chat
//! watch → plugin detection → redacted result bundle. Mirrors the staged
//! shape of `bot::connect_and_spawn` itself: each stage either produces the
//! next stage's input or short-circuits into a terminal result, so a scan
//! that fails halfway still reports everything it learned up to that
//! point instead of the whole task going to `fail`.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use reconmc_core::classify::{classify_async, classify_sync, ServerMode};
use reconmc_core::error::ScanError;
use reconmc_core::model::{AccountId, Proxy};
use reconmc_core::msauth::MsAuthChain;
use reconmc_core::net::tunnel::Tunnel;
use reconmc_core::net::{build_proxy_client, dns};
use reconmc_core::slp::{
    encode_handshake, encode_ping, encode_status_request, validate_status_json, DecodeOutcome,
    DecodedPacket, Decoder, ValidatedStatus, DEFAULT_PROTOCOL_VERSION,
};

use crate::bot::{self, BotAccount, BotConnection, LoginFailure};
use crate::client::{ClaimedAccount, ClaimedTask, CoordinatorClient, LogLevel, LogLine};
use crate::config::Settings;
use crate::plugins;

const SLP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SLP_RETRIES: u32 = 2;
const SLP_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const HTTP_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one `run_scan` call produced: the result bundle destined for
/// `CoordinatorClient::complete`, plus the task-log lines gathered along
/// the way for `CoordinatorClient::push_logs`.
pub struct ScanOutcome {
    pub result: Value,
    pub logs: Vec<LogLine>,
}

pub async fn run_scan(
    settings: &Settings,
    client: &CoordinatorClient,
    task: &ClaimedTask,
) -> Result<ScanOutcome, ScanError> {
    let mut logs = Vec::new();
    let proxy = task.proxy.to_proxy();
    let tunnel = Tunnel::new(&proxy);

    macro_rules! log {
        ($level:expr, $($arg:tt)*) => {{
            let msg = format!($($arg)*);
            logs.push(LogLine::new($level, msg));
        }};
    }

    // Step 1: SSRF-guarded resolve. Direct IP inputs are validated the
    // same way inside `resolve_ipv4`.
    if let Err(e) = dns::resolve_ipv4(&task.server_address).await {
        log!(LogLevel::Warn, "resolve rejected: {e}");
        return Ok(ScanOutcome {
            result: ping_failure_result(&e),
            logs,
        });
    }

    // Step 2: optional SRV redirect. Every claimed task carries an
    // assigned proxy, so this is always skipped in practice per the rule
    // that SRV is only attempted when no proxy is in use — kept as a real
    // conditional (exercised directly in tests) rather than deleted,
    // since a future direct-connect mode would need it back.
    let (dial_host, dial_port) = resolve_dial_target(&task.server_address, task.port, true).await;

    // Step 3: SLP.
    let slp = match probe_slp_with_retry(&tunnel, &dial_host, dial_port).await {
        Ok(slp) => slp,
        Err(e) => {
            log!(LogLevel::Warn, "SLP probe failed: {e}");
            return Ok(ScanOutcome {
                result: ping_failure_result(&e),
                logs,
            });
        }
    };
    log!(
        LogLevel::Info,
        "SLP ok: protocol={} players={}/{} latency={}ms",
        slp.validated.protocol,
        slp.validated.players_online,
        slp.validated.players_max,
        slp.latency_ms
    );

    // Step 4: server-mode classification.
    let server_mode = if settings.use_async_classification {
        classify_async(&tunnel, &slp.validated.sample).await
    } else {
        classify_sync(&slp.validated.sample)
    };
    info!(?server_mode, server = %task.server_address, "classified server mode");

    let ping_block = json!({
        "success": true,
        "latencyMs": slp.latency_ms,
    });

    // Step 6: online mode demands a Microsoft account.
    if server_mode == ServerMode::Online && task.account.kind != "microsoft" {
        log!(LogLevel::Warn, "account/server-mode mismatch, not connecting");
        return Ok(ScanOutcome {
            result: json!({
                "ping": ping_block,
                "serverMode": server_mode_str(server_mode),
                "status": slp_status_block(&slp.validated),
                "connection": { "error": { "code": "ACCOUNT_MISMATCH" } },
            }),
            logs,
        });
    }

    // Step 7: bot connect/spawn.
    let online_mode = server_mode == ServerMode::Online;
    let (access_token, username, uuid) = if task.account.is_cracked() {
        (
            None,
            task.account
                .username
                .clone()
                .unwrap_or_else(|| "Scanner".to_string()),
            None,
        )
    } else {
        match ensure_microsoft_token(settings, &proxy, client, &task.account).await {
            Ok((token, name, uuid)) => (Some(token), name, Some(uuid)),
            Err(e) => {
                log!(LogLevel::Error, "microsoft auth chain failed: {e}");
                return Ok(ScanOutcome {
                    result: json!({
                        "ping": ping_block,
                        "serverMode": server_mode_str(server_mode),
                        "status": slp_status_block(&slp.validated),
                        "connection": { "error": { "code": e.code(), "message": e.to_string() } },
                    }),
                    logs,
                });
            }
        }
    };

    let bot_account = BotAccount {
        username: &username,
        uuid,
        access_token: access_token.as_deref(),
    };

    let connect_result = bot::connect_and_spawn(
        &proxy,
        &dial_host,
        dial_port,
        &task.server_address,
        DEFAULT_PROTOCOL_VERSION,
        &bot_account,
        online_mode,
    )
    .await;

    let (mut conn, spawn) = match connect_result {
        Ok(pair) => pair,
        Err(LoginFailure::Kicked(reason)) => {
            log!(LogLevel::Info, "kicked during login: {reason}");
            return Ok(ScanOutcome {
                result: json!({
                    "ping": ping_block,
                    "serverMode": server_mode_str(server_mode),
                    "status": slp_status_block(&slp.validated),
                    "connection": { "kicked": true, "kickReason": reason },
                }),
                logs,
            });
        }
        Err(LoginFailure::AccountMismatch) => {
            return Ok(ScanOutcome {
                result: json!({
                    "ping": ping_block,
                    "serverMode": server_mode_str(server_mode),
                    "status": slp_status_block(&slp.validated),
                    "connection": { "error": { "code": "ACCOUNT_MISMATCH" } },
                }),
                logs,
            });
        }
        Err(LoginFailure::Protocol(e)) => {
            log!(LogLevel::Warn, "bot connect failed: {e}");
            return Ok(ScanOutcome {
                result: json!({
                    "ping": ping_block,
                    "serverMode": server_mode_str(server_mode),
                    "status": slp_status_block(&slp.validated),
                    "connection": { "error": { "code": e.code(), "message": e.to_string() } },
                }),
                logs,
            });
        }
    };

    log!(
        LogLevel::Info,
        "spawned as {} at ({:.1}, {:.1}, {:.1})",
        spawn.username,
        spawn.spawn_x,
        spawn.spawn_y,
        spawn.spawn_z
    );

    let mut auth_failed = false;
    if settings.enable_auto_auth && task.account.is_cracked() {
        auth_failed = run_auto_auth_watch(&mut conn, &settings.cracked_auth_password, &mut logs).await;
    }

    let detection = plugins::detect_plugins(&mut conn, &spawn.command_nodes, spawn.command_root_index)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "plugin detection aborted");
            plugins::PluginDetection::default()
        });
    log!(
        LogLevel::Info,
        "plugin detection method={} count={}",
        detection.method,
        detection.plugins.len()
    );

    Ok(ScanOutcome {
        result: json!({
            "ping": ping_block,
            "serverMode": server_mode_str(server_mode),
            "status": slp_status_block(&slp.validated),
            "connection": {
                "success": true,
                "uuid": spawn.uuid,
                "spawnPosition": { "x": spawn.spawn_x, "y": spawn.spawn_y, "z": spawn.spawn_z },
                "autoAuthFailed": auth_failed,
            },
            "plugins": {
                "method": detection.method,
                "versionCommand": detection.version_command,
                "list": detection.plugins,
            },
        }),
        logs,
    })
}

async fn run_auto_auth_watch(
    conn: &mut BotConnection,
    password: &str,
    logs: &mut Vec<LogLine>,
) -> bool {
    const MAX_ROUNDS: usize = 10;
    let mut last_prompt = None;
    for _ in 0..MAX_ROUNDS {
        match bot::watch_auto_auth_round(conn, password, &mut last_prompt).await {
            Ok(true) => {
                logs.push(LogLine::new(LogLevel::Warn, "auto-auth failed: repeated prompt".into()));
                return true;
            }
            Ok(false) => continue,
            Err(e) => {
                logs.push(LogLine::new(LogLevel::Warn, format!("auto-auth watch aborted: {e}")));
                return false;
            }
        }
    }
    false
}

/// Refresh (or fast-path-validate) the allocated Microsoft account's
/// token, reporting any rotated refresh token back to the coordinator
/// before returning.
async fn ensure_microsoft_token(
    settings: &Settings,
    proxy: &Proxy,
    client: &CoordinatorClient,
    account: &ClaimedAccount,
) -> Result<(String, String, Uuid), ScanError> {
    let refresh_token = account
        .refresh_token
        .as_deref()
        .ok_or_else(|| ScanError::Auth("microsoft account missing refresh token".to_string()))?;

    let http = if settings.route_ms_auth_through_proxy {
        build_proxy_client(proxy, HTTP_UPSTREAM_TIMEOUT)?
    } else {
        reqwest::Client::builder()
            .timeout(HTTP_UPSTREAM_TIMEOUT)
            .build()
            .map_err(|e| ScanError::Network(e.to_string()))?
    };

    let chain = MsAuthChain::new(http);
    let bundle = chain
        .refresh(AccountId(account.id), refresh_token, account.access_token.as_deref())
        .await?;

    if let Err(e) = client
        .report_token_update(account.id, &bundle.mc_access_token, &bundle.ms_refresh_token)
        .await
    {
        debug!(error = %e, "failed to report refreshed token to coordinator");
    }

    let uuid = parse_profile_uuid(&bundle.profile.id)?;
    Ok((bundle.mc_access_token, bundle.profile.name, uuid))
}

fn parse_profile_uuid(id: &str) -> Result<Uuid, ScanError> {
    if let Ok(u) = Uuid::parse_str(id) {
        return Ok(u);
    }
    if id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        let dashed = format!(
            "{}-{}-{}-{}-{}",
            &id[0..8],
            &id[8..12],
            &id[12..16],
            &id[16..20],
            &id[20..32]
        );
        return Uuid::parse_str(&dashed)
            .map_err(|e| ScanError::Protocol(format!("malformed profile uuid: {e}")));
    }
    Err(ScanError::Protocol(format!("unrecognized profile uuid shape: {id}")))
}

async fn resolve_dial_target(hostname: &str, port: u16, proxy_in_use: bool) -> (String, u16) {
    if port == 25565 && !proxy_in_use {
        if let Ok(Some(srv)) = dns::lookup_srv(hostname).await {
            return (srv.host, srv.port);
        }
    }
    (hostname.to_string(), port)
}

struct SlpProbe {
    validated: ValidatedStatus,
    latency_ms: u128,
}

async fn probe_slp_with_retry(tunnel: &Tunnel<'_>, host: &str, port: u16) -> Result<SlpProbe, ScanError> {
    let mut last_err = None;
    for attempt in 0..=SLP_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(SLP_RETRY_BACKOFF).await;
        }
        match tokio::time::timeout(SLP_CONNECT_TIMEOUT, probe_slp(tunnel, host, port)).await {
            Ok(Ok(probe)) => return Ok(probe),
            Ok(Err(e)) => last_err = Some(e),
            Err(_) => last_err = Some(ScanError::Network("ETIMEDOUT".to_string())),
        }
    }
    Err(last_err.unwrap_or(ScanError::Network("SLP probe failed".to_string())))
}

/// Handshake + status request sent back-to-back, then a separate ping
/// round trip measured on its own once the status response is in hand.
async fn probe_slp(tunnel: &Tunnel<'_>, host: &str, port: u16) -> Result<SlpProbe, ScanError> {
    let mut tcp = tunnel.dial_tcp(host, port).await?;

    let mut out = encode_handshake(DEFAULT_PROTOCOL_VERSION, host, port);
    out.extend_from_slice(&encode_status_request());
    tcp.write_all(&out).await?;

    let mut decoder = Decoder::new();
    let mut buf = [0u8; 4096];
    let validated = loop {
        match decoder.poll()? {
            DecodeOutcome::Packet(DecodedPacket::StatusResponse(bytes)) => {
                break validate_status_json(&bytes)?;
            }
            DecodeOutcome::Packet(DecodedPacket::Pong(_)) => {
                return Err(ScanError::Protocol("unexpected pong before status response".into()));
            }
            DecodeOutcome::Incomplete => {
                let n = tcp.read(&mut buf).await?;
                if n == 0 {
                    return Err(ScanError::Network("connection closed during SLP".into()));
                }
                decoder.push(&buf[..n]);
            }
        }
    };

    let ping_payload: i64 = rand::random();
    let send_at = Instant::now();
    tcp.write_all(&encode_ping(ping_payload)).await?;

    loop {
        match decoder.poll()? {
            DecodeOutcome::Packet(DecodedPacket::Pong(echoed)) => {
                if echoed != ping_payload {
                    return Err(ScanError::Protocol("ping payload mismatch".into()));
                }
                break;
            }
            DecodeOutcome::Packet(DecodedPacket::StatusResponse(_)) => continue,
            DecodeOutcome::Incomplete => {
                let n = tcp.read(&mut buf).await?;
                if n == 0 {
                    return Err(ScanError::Network("connection closed during ping".into()));
                }
                decoder.push(&buf[..n]);
            }
        }
    }

    Ok(SlpProbe {
        validated,
        latency_ms: send_at.elapsed().as_millis(),
    })
}

fn server_mode_str(mode: ServerMode) -> &'static str {
    match mode {
        ServerMode::Online => "online",
        ServerMode::Cracked => "cracked",
        ServerMode::Unknown => "unknown",
    }
}

fn slp_status_block(v: &ValidatedStatus) -> Value {
    json!({
        "protocol": v.protocol,
        "playersOnline": v.players_online,
        "playersMax": v.players_max,
        "description": v.description,
        "favicon": v.favicon,
    })
}

fn ping_failure_result(e: &ScanError) -> Value {
    json!({
        "ping": {
            "success": false,
            "error": { "code": e.code(), "message": e.to_string() },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn srv_is_skipped_when_proxy_in_use() {
        let (host, port) = resolve_dial_target("mc.example.com", 25565, true).await;
        assert_eq!(host, "mc.example.com");
        assert_eq!(port, 25565);
    }

    #[tokio::test]
    async fn srv_is_skipped_for_non_default_port() {
        let (host, port) = resolve_dial_target("mc.example.com", 25566, false).await;
        assert_eq!(host, "mc.example.com");
        assert_eq!(port, 25566);
    }

    #[test]
    fn parses_dashed_and_undashed_profile_uuids() {
        let dashed = "3b9f1234-5678-4abc-9def-0123456789ab";
        assert_eq!(parse_profile_uuid(dashed).unwrap().to_string(), dashed);

        let undashed = "3b9f123456784abc9def0123456789ab";
        assert_eq!(parse_profile_uuid(undashed).unwrap().to_string(), dashed);
    }

    #[test]
    fn rejects_malformed_profile_uuid() {
        assert!(parse_profile_uuid("not-a-uuid").is_err());
    }
}
