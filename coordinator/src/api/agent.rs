//! Agent-facing surface: no auth, trusted network.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use reconmc_core::error::ScanError;
use reconmc_core::model::{is_valid_agent_id, Agent, AgentStatus, LogLevel, QueueId};

use crate::registry::Update;
use crate::state::AppState;

use super::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub agent_id: String,
    pub name: Option<String>,
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<Json<Agent>> {
    let agent = state.registry.register(&body.agent_id, body.name).await?;
    Ok(Json(agent))
}

pub async fn heartbeat(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<Json<Value>> {
    let agent_id = body
        .get("agentId")
        .and_then(Value::as_str)
        .ok_or_else(|| ScanError::Validation("agentId is required".to_string()))?;

    let status = match body.get("status").and_then(Value::as_str) {
        Some("idle") => Some(AgentStatus::Idle),
        Some("busy") => Some(AgentStatus::Busy),
        Some(other) => {
            return Err(ScanError::Validation(format!("unknown status {other}")).into());
        }
        None => None,
    };

    // Distinguish "key absent" (leave unchanged) from "currentQueueId: null"
    // (explicitly clear).
    let current_queue_id = match body.get("currentQueueId") {
        None => Update::Unchanged,
        Some(Value::Null) => Update::Clear,
        Some(v) => {
            let raw = v
                .as_str()
                .ok_or_else(|| ScanError::Validation("currentQueueId must be a string or null".to_string()))?;
            let uuid: Uuid = raw
                .parse()
                .map_err(|_| ScanError::Validation("currentQueueId must be a UUID".to_string()))?;
            Update::Set(QueueId(uuid))
        }
    };

    if !is_valid_agent_id(agent_id) {
        return Err(ScanError::Validation(format!("invalid agent id: {agent_id}")).into());
    }

    state.registry.heartbeat(agent_id, status, current_queue_id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub agent_id: String,
}

pub async fn claim(State(state): State<AppState>, Json(body): Json<ClaimRequest>) -> ApiResult<Response> {
    match state.queue.claim(&body.agent_id).await? {
        Some(response) => Ok(Json(response).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub result: Value,
    #[serde(rename = "durationMs")]
    pub duration_ms: Option<i64>,
}

pub async fn complete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state.queue.complete(QueueId(id), body.result, body.duration_ms).await?;
    Ok(Json(json!({ "ok": true, "outcome": outcome })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailRequest {
    pub error_message: String,
    pub duration_ms: Option<i64>,
}

pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<FailRequest>,
) -> ApiResult<Json<Value>> {
    let outcome = state
        .queue
        .fail(QueueId(id), body.error_message, body.duration_ms)
        .await?;
    Ok(Json(json!({ "ok": true, "outcome": outcome })))
}

#[derive(Debug, Deserialize)]
pub struct LogLine {
    pub level: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsRequest {
    pub agent_id: String,
    pub logs: Vec<LogLine>,
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<LogsRequest>,
) -> ApiResult<Json<Value>> {
    let mut received = 0usize;
    for line in &body.logs {
        let level = match line.level.as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            other => return Err(ScanError::Validation(format!("unknown log level {other}")).into()),
        };
        let level_str = match level {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        sqlx::query("INSERT INTO task_logs (queue_id, agent_id, level, message) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(&body.agent_id)
            .bind(level_str)
            .bind(&line.message)
            .execute(&state.pg)
            .await
            .map_err(ScanError::from)?;
        received += 1;
    }
    Ok(Json(json!({ "ok": true, "received": received })))
}

/// Accepts the rotated token pair an agent's Microsoft auth chain mints
/// mid-scan.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUpdateRequest {
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn token_update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TokenUpdateRequest>,
) -> ApiResult<Json<Value>> {
    let result = sqlx::query(
        "UPDATE accounts SET access_token = $1, refresh_token = $2, is_valid = TRUE, \
         last_validated_at = now(), last_validation_error = NULL WHERE id = $3",
    )
    .bind(&body.access_token)
    .bind(&body.refresh_token)
    .bind(id)
    .execute(&state.pg)
    .await
    .map_err(ScanError::from)?;

    if result.rows_affected() == 0 {
        return Err(ApiError(ScanError::NotFound));
    }
    Ok(Json(json!({ "ok": true })))
}
