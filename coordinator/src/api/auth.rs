//! `X-API-Key` guard for the operator-facing surface, bypassable
//! via `RECONMC_DISABLE_AUTH` for local dev.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.settings.auth_enabled() {
        return Ok(next.run(request).await);
    }

    let expected = state.settings.reconmc_api_key.as_deref().unwrap_or_default();
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if expected.is_empty() || provided != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
