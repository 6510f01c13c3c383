//! SQLite implementation of `TaskRepository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::utils::parse_datetime;
use crate::domain::models::{Task, TaskMetadata, TaskStatus};
use crate::domain::ports::{DatabaseError, TaskFilters, TaskRepository};

pub struct TaskRepositoryImpl {
    pool: SqlitePool,
}

impl TaskRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task, DatabaseError> {
        let status_str: String = row.get("status");
        let status = TaskStatus::parse_str(&status_str)
            .ok_or_else(|| DatabaseError::Serialization(format!("unknown status {status_str}")))?;

        let metadata: TaskMetadata = serde_json::from_str(&row.get::<String, _>("metadata"))?;

        Ok(Task {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
            description: row.get("description"),
            status,
            priority: row.get::<i64, _>("priority") as i8,
            input_data: row
                .get::<Option<String>, _>("input_data")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            output_data: row
                .get::<Option<String>, _>("output_data")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            metadata,
            agent_id: row
                .get::<Option<String>, _>("agent_id")
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()?,
            parent_task_id: row
                .get::<Option<String>, _>("parent_task_id")
                .as_deref()
                .map(Uuid::parse_str)
                .transpose()?,
            deadline: row
                .get::<Option<String>, _>("deadline")
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
            updated_at: parse_datetime(row.get::<String, _>("updated_at").as_str())?,
            started_at: row
                .get::<Option<String>, _>("started_at")
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            completed_at: row
                .get::<Option<String>, _>("completed_at")
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, description, status, priority, input_data, output_data,
                metadata, agent_id, parent_task_id, deadline,
                created_at, updated_at, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(i64::from(task.priority))
        .bind(task.input_data.as_ref().map(|v| v.to_string()))
        .bind(task.output_data.as_ref().map(|v| v.to_string()))
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(task.agent_id.map(|id| id.to_string()))
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(task.deadline.map(|dt| dt.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.started_at.map(|dt| dt.to_rfc3339()))
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task: &Task) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                description = ?, status = ?, priority = ?, input_data = ?,
                output_data = ?, metadata = ?, agent_id = ?, parent_task_id = ?,
                deadline = ?, updated_at = ?, started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(i64::from(task.priority))
        .bind(task.input_data.as_ref().map(|v| v.to_string()))
        .bind(task.output_data.as_ref().map(|v| v.to_string()))
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(task.agent_id.map(|id| id.to_string()))
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(task.deadline.map(|dt| dt.to_rfc3339()))
        .bind(task.updated_at.to_rfc3339())
        .bind(task.started_at.map(|dt| dt.to_rfc3339()))
        .bind(task.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::RowNotFound);
        }
        Ok(())
    }

    async fn list(&self, filters: &TaskFilters) -> Result<Vec<Task>, DatabaseError> {
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        if filters.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filters.agent_id.is_some() {
            sql.push_str(" AND agent_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");
        sql.push_str(" LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(status) = filters.status {
            query = query.bind(status.as_str());
        }
        if let Some(agent_id) = filters.agent_id {
            query = query.bind(agent_id.to_string());
        }
        query = query
            .bind(filters.limit.map_or(i64::MAX, |l| l as i64))
            .bind(filters.offset.unwrap_or(0) as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn count_active(&self) -> Result<usize, DatabaseError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks
             WHERE status IN ('pending', 'queued', 'in_progress', 'retrying')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as usize)
    }

    async fn list_schedulable(&self) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status IN ('pending', 'retrying')
             ORDER BY priority DESC, created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_running_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE status = 'in_progress' AND started_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn list_owned_by(&self, agent_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE agent_id = ?
             AND status IN ('queued', 'in_progress')",
        )
        .bind(agent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn assign(&self, task_id: Uuid, agent_id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE tasks SET status = 'queued', agent_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(agent_id.to_string())
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DatabaseError::RowNotFound);
        }

        let updated = sqlx::query(
            "UPDATE agents SET status = 'busy', updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(agent_id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(DatabaseError::RowNotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO task_dependencies (task_id, depends_on_task_id, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(depends_on.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dependencies_of(&self, task_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|(s,)| Uuid::parse_str(s).map_err(DatabaseError::from))
            .collect()
    }

    async fn dependents_of(&self, task_id: Uuid) -> Result<Vec<Uuid>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT task_id FROM task_dependencies WHERE depends_on_task_id = ?",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|(s,)| Uuid::parse_str(s).map_err(DatabaseError::from))
            .collect()
    }

    async fn all_dependency_edges(&self) -> Result<Vec<(Uuid, Uuid)>, DatabaseError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT task_id, depends_on_task_id FROM task_dependencies",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|(a, b)| Ok((Uuid::parse_str(a)?, Uuid::parse_str(b)?)))
            .collect()
    }
}
