//! SQLite implementation of `AgentRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::utils::parse_datetime;
use crate::domain::models::{Agent, AgentCapabilities, AgentConfig, AgentStatus, AgentType};
use crate::domain::ports::{AgentFilters, AgentRepository, DatabaseError};

pub struct AgentRepositoryImpl {
    pool: SqlitePool,
}

impl AgentRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<Agent, DatabaseError> {
        let type_str: String = row.get("agent_type");
        let agent_type = AgentType::parse_str(&type_str)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown agent type {type_str}")))?;
        let status_str: String = row.get("status");
        let status = AgentStatus::parse_str(&status_str)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown status {status_str}")))?;

        let capabilities: AgentCapabilities =
            serde_json::from_str(&row.get::<String, _>("capabilities"))?;
        let config: AgentConfig = serde_json::from_str(&row.get::<String, _>("config"))?;

        Ok(Agent {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
            name: row.get("name"),
            agent_type,
            status,
            capabilities,
            config,
            parent_id: row
                .get::<Option<String>, _>("parent_id")
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()?,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
            updated_at: parse_datetime(row.get::<String, _>("updated_at").as_str())?,
            last_heartbeat_at: row
                .get::<Option<String>, _>("last_heartbeat_at")
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

#[async_trait]
impl AgentRepository for AgentRepositoryImpl {
    async fn insert(&self, agent: &Agent) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, agent_type, status, capabilities, config,
                parent_id, created_at, updated_at, last_heartbeat_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(agent.id.to_string())
        .bind(&agent.name)
        .bind(agent.agent_type.as_str())
        .bind(agent.status.as_str())
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(serde_json::to_string(&agent.config)?)
        .bind(agent.parent_id.map(|id| id.to_string()))
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.last_heartbeat_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Agent>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_agent).transpose()
    }

    async fn update(&self, agent: &Agent) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE agents SET
                name = ?, agent_type = ?, status = ?, capabilities = ?,
                config = ?, parent_id = ?, updated_at = ?, last_heartbeat_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&agent.name)
        .bind(agent.agent_type.as_str())
        .bind(agent.status.as_str())
        .bind(serde_json::to_string(&agent.capabilities)?)
        .bind(serde_json::to_string(&agent.config)?)
        .bind(agent.parent_id.map(|id| id.to_string()))
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.last_heartbeat_at.map(|dt| dt.to_rfc3339()))
        .bind(agent.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::RowNotFound);
        }
        Ok(())
    }

    async fn list(&self, filters: &AgentFilters) -> Result<Vec<Agent>, DatabaseError> {
        let mut sql = String::from("SELECT * FROM agents WHERE 1=1");
        if filters.agent_type.is_some() {
            sql.push_str(" AND agent_type = ?");
        }
        if filters.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(agent_type) = filters.agent_type {
            query = query.bind(agent_type.as_str());
        }
        if let Some(status) = filters.status {
            query = query.bind(status.as_str());
        }
        query = query
            .bind(filters.limit.map_or(i64::MAX, |l| l as i64))
            .bind(filters.offset.unwrap_or(0) as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn count_active(&self) -> Result<usize, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM agents WHERE status IN ('starting', 'idle', 'busy')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as usize)
    }

    async fn list_idle(&self, agent_type: Option<AgentType>) -> Result<Vec<Agent>, DatabaseError> {
        let mut sql = String::from("SELECT * FROM agents WHERE status = 'idle'");
        if agent_type.is_some() {
            sql.push_str(" AND agent_type = ?");
        }
        // Least recently touched first so assignment rotates across agents.
        sql.push_str(" ORDER BY updated_at ASC");

        let mut query = sqlx::query(&sql);
        if let Some(agent_type) = agent_type {
            query = query.bind(agent_type.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Agent>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM agents WHERE status IN ('idle', 'busy')
             AND (last_heartbeat_at IS NULL OR last_heartbeat_at < ?)",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }

    async fn touch_heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let stamp = at.to_rfc3339();
        // Guarded so a delayed write can never move the heartbeat backwards.
        let result = sqlx::query(
            "UPDATE agents SET last_heartbeat_at = ?, updated_at = ?
             WHERE id = ? AND (last_heartbeat_at IS NULL OR last_heartbeat_at <= ?)",
        )
        .bind(&stamp)
        .bind(&stamp)
        .bind(id.to_string())
        .bind(&stamp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
