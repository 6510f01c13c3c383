//! Agent lifecycle management: spawn, status, heartbeats, termination,
//! pool attachment and stale-agent detection.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::AgentError;
use crate::domain::models::{
    Agent, AgentConfig, AgentPool, AgentStatus, AgentType, EventEnvelope, EventType,
    HeartbeatConfig,
};
use crate::domain::ports::{AgentFilters, AgentRepository, PoolRepository};
use crate::infrastructure::database::utils::with_write_retry;
use crate::services::audit_service::AuditService;
use crate::services::event_bus::EventBus;
use crate::services::metrics::MetricsService;
use crate::services::ready_queue::AgentCapacity;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSpawnRequest {
    pub agent_type: AgentType,
    pub name: Option<String>,
    /// Skill tags advertised by the new agent.
    pub capabilities: Option<Vec<String>>,
    pub config: Option<AgentConfig>,
    pub max_concurrent_tasks: Option<u32>,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSpawnResult {
    pub agent_id: Uuid,
    pub status: AgentStatus,
    pub message: String,
}

pub struct AgentManager {
    repo: Arc<dyn AgentRepository>,
    pools: Arc<dyn PoolRepository>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsService>,
    audit: Arc<AuditService>,
    heartbeat: HeartbeatConfig,
    max_agents: usize,
}

impl AgentManager {
    pub fn new(
        repo: Arc<dyn AgentRepository>,
        pools: Arc<dyn PoolRepository>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsService>,
        audit: Arc<AuditService>,
        heartbeat: HeartbeatConfig,
        max_agents: usize,
    ) -> Self {
        Self {
            repo,
            pools,
            bus,
            metrics,
            audit,
            heartbeat,
            max_agents,
        }
    }

    /// Ensure one default pool exists per agent type.
    pub async fn seed_default_pools(&self) -> Result<(), AgentError> {
        for agent_type in [
            AgentType::Orchestrator,
            AgentType::Worker,
            AgentType::Research,
            AgentType::Analysis,
            AgentType::Specialist,
            AgentType::Coordinator,
        ] {
            let existing = self
                .pools
                .find_by_type(agent_type)
                .await
                .map_err(|e| AgentError::Storage(e.to_string()))?;
            if existing.is_none() {
                let pool = AgentPool::default_for(agent_type, self.max_agents as u32);
                self.pools
                    .insert(&pool)
                    .await
                    .map_err(|e| AgentError::Storage(e.to_string()))?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, request), fields(agent_type = %request.agent_type), err)]
    pub async fn spawn(&self, request: AgentSpawnRequest) -> Result<AgentSpawnResult, AgentError> {
        let active = self
            .repo
            .count_active()
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        if active >= self.max_agents {
            warn!(max_agents = self.max_agents, "agent limit reached");
            return Err(AgentError::CapacityExceeded(self.max_agents));
        }

        if let Some(parent_id) = request.parent_id {
            let parent = self
                .repo
                .get(parent_id)
                .await
                .map_err(|e| AgentError::Storage(e.to_string()))?;
            if parent.is_none() {
                return Err(AgentError::Validation(format!(
                    "parent agent {parent_id} does not exist"
                )));
            }
        }

        let name = request
            .name
            .clone()
            .unwrap_or_else(|| Agent::generate_name(request.agent_type));
        let mut agent = Agent::new(name, request.agent_type);
        agent.parent_id = request.parent_id;
        if let Some(skills) = request.capabilities {
            agent.capabilities.skills = skills;
        }
        if let Some(max_concurrent) = request.max_concurrent_tasks {
            agent.capabilities.max_concurrent_tasks = max_concurrent;
        }
        if let Some(config) = request.config {
            agent.config = config;
        }
        agent
            .capabilities
            .validate()
            .map_err(AgentError::Validation)?;

        with_write_retry(|| async { self.repo.insert(&agent).await })
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        // Attach to the matching pool when one exists.
        match self.pools.find_by_type(agent.agent_type).await {
            Ok(Some(pool)) => {
                if let Err(err) = self.pools.add_member(pool.id, agent.id).await {
                    warn!(agent_id = %agent.id, error = %err, "pool attach failed");
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "pool lookup failed"),
        }

        self.publish_lifecycle(
            EventType::AgentSpawned,
            &agent,
            json!({
                "agent_id": agent.id,
                "agent_type": agent.agent_type,
                "agent_name": agent.name,
            }),
        )
        .await;

        self.metrics
            .agent_spawned_total
            .with_label_values(&[agent.agent_type.as_str()])
            .inc();
        self.metrics
            .agent_active
            .with_label_values(&[agent.agent_type.as_str(), agent.status.as_str()])
            .inc();
        self.audit
            .record(
                "system",
                "agent.spawn",
                "agent",
                Some(agent.id.to_string()),
                Some(json!({"agent_type": agent.agent_type, "name": agent.name})),
            )
            .await;

        info!(agent_id = %agent.id, name = %agent.name, "agent spawned");
        Ok(AgentSpawnResult {
            agent_id: agent.id,
            status: agent.status,
            message: format!("Agent {} spawned successfully", agent.name),
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Agent>, AgentError> {
        self.repo
            .get(id)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))
    }

    pub async fn list(&self, filters: &AgentFilters) -> Result<Vec<Agent>, AgentError> {
        self.repo
            .list(filters)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))
    }

    /// Transition an agent through the lifecycle state machine.
    #[instrument(skip(self), err)]
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: AgentStatus,
    ) -> Result<Agent, AgentError> {
        let mut agent = self
            .repo
            .get(id)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?
            .ok_or(AgentError::NotFound(id))?;

        let old_status = agent.status;
        if old_status == new_status {
            return Ok(agent);
        }
        if !old_status.can_transition_to(new_status) {
            return Err(AgentError::InvalidTransition {
                from: old_status,
                to: new_status,
            });
        }

        agent.status = new_status;
        let now = Utc::now();
        agent.updated_at = now;
        if matches!(new_status, AgentStatus::Idle | AgentStatus::Busy) {
            agent.record_heartbeat(now);
        }

        with_write_retry(|| async { self.repo.update(&agent).await })
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        self.metrics
            .agent_active
            .with_label_values(&[agent.agent_type.as_str(), old_status.as_str()])
            .dec();
        self.metrics
            .agent_active
            .with_label_values(&[agent.agent_type.as_str(), new_status.as_str()])
            .inc();

        info!(agent_id = %id, from = %old_status, to = %new_status, "agent status updated");
        Ok(agent)
    }

    /// Stamp the heartbeat and publish `agent.heartbeat`.
    pub async fn record_heartbeat(
        &self,
        id: Uuid,
        metrics: Option<serde_json::Value>,
    ) -> Result<(), AgentError> {
        let touched = self
            .repo
            .touch_heartbeat(id, Utc::now())
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        let agent = self
            .repo
            .get(id)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?
            .ok_or(AgentError::NotFound(id))?;
        // A stale stamp is ignored by the monotonic guard; the agent is
        // still alive, so the event is published either way.
        let _ = touched;

        self.publish_lifecycle(
            EventType::AgentHeartbeat,
            &agent,
            json!({
                "agent_id": id,
                "status": agent.status,
                "metrics": metrics,
            }),
        )
        .await;
        Ok(())
    }

    /// Stamp a heartbeat observed on the bus. Unlike
    /// [`record_heartbeat`](Self::record_heartbeat) this publishes
    /// nothing, so the consuming handler stays loop-free. Unknown agents
    /// are ignored.
    pub async fn observe_heartbeat(&self, id: Uuid) -> Result<(), AgentError> {
        self.repo
            .touch_heartbeat(id, Utc::now())
            .await
            .map(|_| ())
            .map_err(|e| AgentError::Storage(e.to_string()))
    }

    /// Force an agent offline and announce it. Owned tasks are released
    /// by the scheduler reacting to `agent.stopped`.
    #[instrument(skip(self), err)]
    pub async fn terminate(&self, id: Uuid, reason: &str) -> Result<(), AgentError> {
        let mut agent = self
            .repo
            .get(id)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?
            .ok_or(AgentError::NotFound(id))?;

        if agent.status == AgentStatus::Offline {
            return Ok(());
        }

        let old_status = agent.status;
        agent.status = AgentStatus::Offline;
        agent.updated_at = Utc::now();
        with_write_retry(|| async { self.repo.update(&agent).await })
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        self.publish_lifecycle(
            EventType::AgentStopped,
            &agent,
            json!({"agent_id": id, "reason": reason}),
        )
        .await;

        self.metrics
            .agent_active
            .with_label_values(&[agent.agent_type.as_str(), old_status.as_str()])
            .dec();
        self.audit
            .record(
                "system",
                "agent.terminate",
                "agent",
                Some(id.to_string()),
                Some(json!({"reason": reason})),
            )
            .await;

        info!(agent_id = %id, reason, "agent terminated");
        Ok(())
    }

    /// Least-recently-assigned idle agent matching type and skills.
    pub async fn pick_available(
        &self,
        agent_type: Option<AgentType>,
        required_skills: Option<&[String]>,
    ) -> Result<Option<Agent>, AgentError> {
        let idle = self
            .repo
            .list_idle(agent_type)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        Ok(idle.into_iter().find(|agent| {
            required_skills
                .is_none_or(|skills| agent.capabilities.has_all_skills(skills))
        }))
    }

    /// Capacity snapshot for ML-optimized selection.
    pub async fn capacity_snapshot(
        &self,
        agent_type: Option<AgentType>,
    ) -> Result<Vec<AgentCapacity>, AgentError> {
        let idle = self
            .repo
            .list_idle(agent_type)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;
        Ok(idle
            .into_iter()
            .map(|agent| AgentCapacity {
                agent_id: agent.id,
                agent_type: agent.agent_type,
                max_concurrent: agent.capabilities.max_concurrent_tasks,
                current_load: 0,
                success_rate: 1.0,
                avg_execution_time_ms: 0.0,
            })
            .collect())
    }

    /// One health sweep: agents whose heartbeat exceeded the timeout are
    /// forced offline. Idempotent; returns the affected ids.
    pub async fn check_stale_agents(&self) -> Result<Vec<Uuid>, AgentError> {
        let timeout = ChronoDuration::seconds(self.heartbeat.timeout_seconds as i64);
        let cutoff = Utc::now() - timeout;
        let stale = self
            .repo
            .list_stale(cutoff)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        let mut marked = Vec::new();
        for mut agent in stale {
            warn!(
                agent_id = %agent.id,
                last_heartbeat = ?agent.last_heartbeat_at,
                "agent heartbeat timeout"
            );
            let old_status = agent.status;
            agent.status = AgentStatus::Offline;
            agent.updated_at = Utc::now();
            if let Err(err) = self.repo.update(&agent).await {
                error!(agent_id = %agent.id, error = %err, "failed to mark agent offline");
                continue;
            }

            self.publish_lifecycle(
                EventType::AgentStopped,
                &agent,
                json!({"agent_id": agent.id, "reason": "heartbeat_timeout"}),
            )
            .await;
            self.metrics
                .agent_active
                .with_label_values(&[agent.agent_type.as_str(), old_status.as_str()])
                .dec();
            marked.push(agent.id);
        }

        if !marked.is_empty() {
            info!(count = marked.len(), "marked stale agents offline");
        }
        Ok(marked)
    }

    /// Periodic health monitor; runs only on the leader.
    pub async fn run_health_monitor(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.heartbeat.interval_seconds);
        info!(interval_seconds = self.heartbeat.interval_seconds, "health monitor started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    if let Err(err) = self.check_stale_agents().await {
                        error!(error = %err, "health monitor sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("health monitor stopped");
    }

    async fn publish_lifecycle(&self, event_type: EventType, agent: &Agent, payload: serde_json::Value) {
        let envelope = EventEnvelope::new(event_type, agent.id.to_string(), payload);
        // Publish failures do not roll back the database write; the
        // scheduler reconciles from durable state.
        if let Err(err) = self.bus.publish_event(envelope).await {
            error!(event = %event_type, error = %err, "lifecycle publish failed");
        }
    }
}
