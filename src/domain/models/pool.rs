//! Agent pools: named groups of one agent type with size bounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPool {
    pub id: Uuid,
    pub name: String,
    pub agent_type: AgentType,
    pub min_agents: u32,
    pub max_agents: u32,
    pub created_at: DateTime<Utc>,
}

impl AgentPool {
    pub fn new(name: impl Into<String>, agent_type: AgentType, min_agents: u32, max_agents: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_type,
            min_agents,
            max_agents,
            created_at: Utc::now(),
        }
    }

    /// Default pool created for a type when none exists.
    pub fn default_for(agent_type: AgentType, max_agents: u32) -> Self {
        Self::new(format!("{}-pool", agent_type.as_str()), agent_type, 0, max_agents)
    }
}

/// Membership relation; an agent belongs to at most one pool per pool id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMembership {
    pub agent_id: Uuid,
    pub pool_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

impl PoolMembership {
    pub fn new(agent_id: Uuid, pool_id: Uuid) -> Self {
        Self {
            agent_id,
            pool_id,
            joined_at: Utc::now(),
        }
    }
}
