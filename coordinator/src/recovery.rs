//! Stuck-task recovery: a background sweep that
//! fails `processing` rows stuck past the timeout so their resources and
//! agent slot get released even when an agent crashes mid-scan.

use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use reconmc_core::error::Result;
use reconmc_core::model::{QueueId, STUCK_TASK_THRESHOLD_SECS};

use crate::queue::QueueService;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Runs until the process exits; intended to be `tokio::spawn`ed once from
/// `main`.
pub async fn run(queue: QueueService) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&queue).await {
            error!(error = %e, "stuck task recovery sweep failed");
        }
    }
}

async fn sweep_once(queue: &QueueService) -> Result<()> {
    let stuck: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM scan_queue WHERE status = 'processing' \
         AND started_at < now() - ($1 || ' seconds')::interval",
    )
    .bind(STUCK_TASK_THRESHOLD_SECS.to_string())
    .fetch_all(&queue.pg)
    .await?;

    for id in stuck {
        match queue
            .fail(
                QueueId(id),
                "Task automatically recovered: stuck in processing for over 5 minutes".to_string(),
                None,
            )
            .await
        {
            Ok(_) => info!(queue_id = %id, "recovered stuck task"),
            Err(e) => warn!(queue_id = %id, error = %e, "failed to recover stuck task, retrying next sweep"),
        }
    }

    Ok(())
}
