//! Shared application state handed to every Axum handler.

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::Settings;
use crate::queue::QueueService;
use crate::registry::AgentRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pg: PgPool,
    pub redis: Option<ConnectionManager>,
    pub queue: QueueService,
    pub registry: AgentRegistry,
    pub settings: Settings,
}

impl AppState {
    pub fn new(pg: PgPool, redis: Option<ConnectionManager>, settings: Settings) -> Self {
        let queue = QueueService::new(pg.clone(), redis.clone());
        let registry = AgentRegistry::new(pg.clone(), redis.clone());
        Self {
            pg,
            redis,
            queue,
            registry,
            settings,
        }
    }
}
