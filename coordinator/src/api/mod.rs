//! REST surface: agent-facing routes are open to the trusted
//! network, operator-facing routes sit behind `X-API-Key`.

mod agent;
mod auth;
mod error;
mod operator;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let agent_routes = Router::new()
        .route("/api/agents/register", post(agent::register))
        .route("/api/agents/heartbeat", post(agent::heartbeat))
        .route("/api/queue/claim", post(agent::claim))
        .route("/api/queue/:id/complete", post(agent::complete))
        .route("/api/queue/:id/fail", post(agent::fail))
        .route("/api/tasks/:id/logs", post(agent::logs))
        .route("/api/accounts/:id/token", post(agent::token_update));

    let operator_routes = Router::new()
        .route("/api/servers/add", post(operator::add_servers))
        .route("/api/servers", get(operator::list_servers))
        .route("/api/servers/:ip/:port", get(operator::get_server))
        .route("/api/accounts", get(operator::list_accounts))
        .route("/api/proxies", get(operator::list_proxies))
        .route("/api/queue/stats", get(operator::queue_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .merge(agent_routes)
        .merge(operator_routes)
        .with_state(state)
}
