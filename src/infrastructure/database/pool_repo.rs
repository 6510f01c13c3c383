//! SQLite implementation of `PoolRepository`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::utils::parse_datetime;
use crate::domain::models::{AgentPool, AgentType};
use crate::domain::ports::{DatabaseError, PoolRepository};

pub struct PoolRepositoryImpl {
    pool: SqlitePool,
}

impl PoolRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_pool(row: &sqlx::sqlite::SqliteRow) -> Result<AgentPool, DatabaseError> {
        let type_str: String = row.get("agent_type");
        let agent_type = AgentType::parse_str(&type_str)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown agent type {type_str}")))?;
        Ok(AgentPool {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
            name: row.get("name"),
            agent_type,
            min_agents: row.get::<i64, _>("min_agents") as u32,
            max_agents: row.get::<i64, _>("max_agents") as u32,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
        })
    }
}

#[async_trait]
impl PoolRepository for PoolRepositoryImpl {
    async fn insert(&self, pool: &AgentPool) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO agent_pools (id, name, agent_type, min_agents, max_agents, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(pool.id.to_string())
        .bind(&pool.name)
        .bind(pool.agent_type.as_str())
        .bind(i64::from(pool.min_agents))
        .bind(i64::from(pool.max_agents))
        .bind(pool.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_type(&self, agent_type: AgentType) -> Result<Option<AgentPool>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM agent_pools WHERE agent_type = ? LIMIT 1")
            .bind(agent_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_pool).transpose()
    }

    async fn list(&self) -> Result<Vec<AgentPool>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM agent_pools ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_pool).collect()
    }

    async fn add_member(&self, pool_id: Uuid, agent_id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT OR IGNORE INTO pool_memberships (agent_id, pool_id, joined_at)
             VALUES (?, ?, ?)",
        )
        .bind(agent_id.to_string())
        .bind(pool_id.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn member_count(&self, pool_id: Uuid) -> Result<usize, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pool_memberships WHERE pool_id = ?")
                .bind(pool_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 as usize)
    }
}
