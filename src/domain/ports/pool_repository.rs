//! Persistence port for agent pools.

use async_trait::async_trait;
use uuid::Uuid;

use super::errors::DatabaseError;
use crate::domain::models::{AgentPool, AgentType};

#[async_trait]
pub trait PoolRepository: Send + Sync {
    async fn insert(&self, pool: &AgentPool) -> Result<(), DatabaseError>;

    async fn find_by_type(&self, agent_type: AgentType) -> Result<Option<AgentPool>, DatabaseError>;

    async fn list(&self) -> Result<Vec<AgentPool>, DatabaseError>;

    /// Idempotent; re-adding an existing membership is a no-op.
    async fn add_member(&self, pool_id: Uuid, agent_id: Uuid) -> Result<(), DatabaseError>;

    async fn member_count(&self, pool_id: Uuid) -> Result<usize, DatabaseError>;
}
