//! Persistence port for agent records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DatabaseError;
use crate::domain::models::{Agent, AgentStatus, AgentType};

#[derive(Debug, Clone, Default)]
pub struct AgentFilters {
    pub agent_type: Option<AgentType>,
    pub status: Option<AgentStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn insert(&self, agent: &Agent) -> Result<(), DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Agent>, DatabaseError>;

    async fn update(&self, agent: &Agent) -> Result<(), DatabaseError>;

    async fn list(&self, filters: &AgentFilters) -> Result<Vec<Agent>, DatabaseError>;

    /// Count of agents in starting, idle or busy.
    async fn count_active(&self) -> Result<usize, DatabaseError>;

    /// Idle agents of the given type (any type when `None`), least
    /// recently touched first.
    async fn list_idle(&self, agent_type: Option<AgentType>) -> Result<Vec<Agent>, DatabaseError>;

    /// Idle or busy agents whose last heartbeat is older than `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Agent>, DatabaseError>;

    /// Stamp `last_heartbeat_at = now` without rewriting the whole row.
    async fn touch_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError>;
}
