//! reconmc coordinator: durable work queue, resource allocator, REST surface.

mod allocator;
mod api;
mod config;
mod queue;
mod recovery;
mod redis_keys;
mod registry;
mod rows;
mod state;

use anyhow::Context;
use redis::aio::ConnectionManager;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Settings;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("reconmc_coordinator=info".parse()?),
        )
        .compact()
        .init();

    let settings = Settings::load().context("failed to load configuration")?;

    let pg = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to postgres")?;

    sqlx::migrate!("./migrations").run(&pg).await.context("failed to run migrations")?;

    let redis = connect_redis(settings.redis_url.as_deref()).await;

    let bind_addr = settings.bind_addr.clone();
    let state = AppState::new(pg, redis, settings);

    tokio::spawn(recovery::run(state.queue.clone()));

    let router = api::router(state);

    info!(%bind_addr, "reconmc coordinator starting");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, router).await.context("axum server exited")?;

    Ok(())
}

async fn connect_redis(url: Option<&str>) -> Option<ConnectionManager> {
    let url = url?;
    match redis::Client::open(url) {
        Ok(client) => match client.get_connection_manager().await {
            Ok(manager) => {
                info!("connected to redis fast path");
                Some(manager)
            }
            Err(e) => {
                warn!(error = %e, "redis configured but unreachable, falling back to postgres-only queue");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "invalid redis url, falling back to postgres-only queue");
            None
        }
    }
}
