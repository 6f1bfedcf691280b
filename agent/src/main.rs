//! reconmc agent: claims scan tasks from the coordinator, runs them, and
//! reports results back.

mod bot;
mod client;
mod config;
mod executor;
mod plugins;

use std::time::Instant;

use anyhow::Context;
use reconmc_core::model::QueueId;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use client::CoordinatorClient;
use config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("reconmc_agent=info".parse()?))
        .compact()
        .init();

    let settings = Settings::load().context("failed to load configuration")?;
    let client = CoordinatorClient::new(settings.coordinator_url.clone());

    let agent = client
        .register(&settings.agent_id, settings.agent_name.as_deref())
        .await
        .context("failed to register with coordinator")?;
    info!(agent_id = %agent.id, "registered with coordinator");

    tokio::spawn(heartbeat_loop(
        client_clone(&settings),
        settings.agent_id.clone(),
        settings.heartbeat_interval(),
    ));

    run_claim_loop(&settings, &client).await
}

/// The heartbeat loop gets its own short-lived client rather than sharing
/// the main loop's, since `CoordinatorClient` holds no per-request state —
/// cheaper than threading an `Arc` through `tokio::spawn`'s `'static` bound.
fn client_clone(settings: &Settings) -> CoordinatorClient {
    CoordinatorClient::new(settings.coordinator_url.clone())
}

async fn heartbeat_loop(client: CoordinatorClient, agent_id: String, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = client.heartbeat(&agent_id, "idle").await {
            warn!(error = %e, "heartbeat failed");
        }
    }
}

async fn run_claim_loop(settings: &Settings, client: &CoordinatorClient) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(settings.poll_interval());
    loop {
        ticker.tick().await;

        let task = match client.claim(&settings.agent_id).await {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "claim request failed");
                continue;
            }
        };

        let queue_id = QueueId(task.queue_id);
        info!(server = %task.server_address, port = task.port, "claimed task");

        let started = Instant::now();
        let outcome = executor::run_scan(settings, client, &task).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(outcome) => {
                if let Err(e) = client.push_logs(queue_id, &settings.agent_id, &outcome.logs).await {
                    warn!(error = %e, "failed to push task logs");
                }
                if let Err(e) = client.complete(queue_id, outcome.result, duration_ms).await {
                    error!(error = %e, "failed to report task completion");
                }
            }
            Err(e) => {
                error!(error = %e, "scan failed before producing a result");
                if let Err(e) = client.fail(queue_id, &e.to_string(), duration_ms).await {
                    error!(error = %e, "failed to report task failure");
                }
            }
        }
    }
}
