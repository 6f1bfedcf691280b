//! Operator-facing surface: `X-API-Key` protected, thin reads
//! plus the target-insertion endpoint.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use reconmc_core::error::ScanError;
use reconmc_core::model::{AccountType, Proxy, Server};

use crate::queue::EnqueueSummary;
use crate::rows::{AccountRow, ProxyRow, ServerRow};
use crate::state::AppState;

use super::error::ApiResult;

#[derive(Debug, Deserialize)]
pub struct AddServersRequest {
    pub servers: Vec<String>,
}

pub async fn add_servers(
    State(state): State<AppState>,
    Json(body): Json<AddServersRequest>,
) -> ApiResult<Json<EnqueueSummary>> {
    let summary = state.queue.enqueue(body.servers).await?;
    Ok(Json(summary))
}

pub async fn list_servers(State(state): State<AppState>) -> ApiResult<Json<Vec<Server>>> {
    let rows: Vec<ServerRow> = sqlx::query_as(
        "SELECT resolved_ip, port, server_address, hostnames, primary_hostname, \
         first_seen_at, last_scanned_at, scan_count, latest_result, scan_history \
         FROM servers ORDER BY last_scanned_at DESC",
    )
    .fetch_all(&state.pg)
    .await
    .map_err(ScanError::from)?;

    let servers = rows
        .into_iter()
        .map(Server::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(servers))
}

pub async fn get_server(
    State(state): State<AppState>,
    Path((ip, port)): Path<(String, u16)>,
) -> ApiResult<Json<Server>> {
    let _: IpAddr = ip
        .parse()
        .map_err(|_| ScanError::Validation(format!("invalid ip: {ip}")))?;

    let row: Option<ServerRow> = sqlx::query_as(
        "SELECT resolved_ip, port, server_address, hostnames, primary_hostname, \
         first_seen_at, last_scanned_at, scan_count, latest_result, scan_history \
         FROM servers WHERE resolved_ip = $1 AND port = $2",
    )
    .bind(&ip)
    .bind(port as i32)
    .fetch_optional(&state.pg)
    .await
    .map_err(ScanError::from)?;

    let row = row.ok_or(ScanError::NotFound)?;
    Ok(Json(row.try_into()?))
}

/// Listing accounts never returns the raw tokens — only enough to tell
/// accounts apart and judge their health.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: uuid::Uuid,
    #[serde(rename = "type")]
    pub kind: AccountType,
    pub username: Option<String>,
    pub current_usage: i32,
    pub max_concurrent: i32,
    pub is_active: bool,
    pub is_valid: bool,
    pub last_validation_error: Option<String>,
}

pub async fn list_accounts(State(state): State<AppState>) -> ApiResult<Json<Vec<AccountSummary>>> {
    let rows: Vec<AccountRow> = sqlx::query_as(
        "SELECT id, type, username, access_token, refresh_token, current_usage, max_concurrent, \
         is_active, is_valid, last_validated_at, last_validation_error FROM accounts ORDER BY id",
    )
    .fetch_all(&state.pg)
    .await
    .map_err(ScanError::from)?;

    let summaries = rows
        .into_iter()
        .map(|r| AccountSummary {
            id: r.id,
            kind: match r.kind.as_str() {
                "cracked" => AccountType::Cracked,
                _ => AccountType::Microsoft,
            },
            username: r.username,
            current_usage: r.current_usage,
            max_concurrent: r.max_concurrent,
            is_active: r.is_active,
            is_valid: r.is_valid,
            last_validation_error: r.last_validation_error,
        })
        .collect();
    Ok(Json(summaries))
}

pub async fn list_proxies(State(state): State<AppState>) -> ApiResult<Json<Vec<Proxy>>> {
    let rows: Vec<ProxyRow> = sqlx::query_as(
        "SELECT id, host, port, username, password, protocol, current_usage, max_concurrent, \
         is_active, last_used_at FROM proxies ORDER BY id",
    )
    .fetch_all(&state.pg)
    .await
    .map_err(ScanError::from)?;

    // Password is part of the Proxy type (the agent needs it to dial), but
    // an operator listing has no business seeing it either.
    let proxies = rows
        .into_iter()
        .map(Proxy::try_from)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|mut p: Proxy| {
            p.password = None;
            p
        })
        .collect();
    Ok(Json(proxies))
}

pub async fn queue_stats(State(state): State<AppState>) -> ApiResult<Json<crate::queue::QueueStats>> {
    let stats = state.queue.stats().await?;
    Ok(Json(stats))
}
