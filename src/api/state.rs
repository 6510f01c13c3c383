//! Shared handler state.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::domain::models::Config;
use crate::orchestrator::Orchestrator;
use crate::services::{
    AgentManager, AuditService, EventBus, MetricsService, StateStore, TaskScheduler,
    WebhookDispatcher,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<TaskScheduler>,
    pub agent_manager: Arc<AgentManager>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub state_store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsService>,
    pub audit: Arc<AuditService>,
    pub db_pool: SqlitePool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn from_orchestrator(orchestrator: &Orchestrator) -> Self {
        Self {
            config: Arc::new(orchestrator.config.clone()),
            scheduler: orchestrator.scheduler.clone(),
            agent_manager: orchestrator.agent_manager.clone(),
            webhooks: orchestrator.webhooks.clone(),
            state_store: orchestrator.state.clone(),
            bus: orchestrator.bus.clone(),
            metrics: orchestrator.metrics.clone(),
            audit: orchestrator.audit.clone(),
            db_pool: orchestrator.db.pool().clone(),
            started_at: Utc::now(),
        }
    }
}
