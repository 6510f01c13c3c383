//! Persistence port for tasks and their dependency edges.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::DatabaseError;
use crate::domain::models::{Task, TaskStatus};

/// Filters for task listing.
#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub agent_id: Option<Uuid>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>, DatabaseError>;

    async fn update(&self, task: &Task) -> Result<(), DatabaseError>;

    async fn list(&self, filters: &TaskFilters) -> Result<Vec<Task>, DatabaseError>;

    /// Count of tasks in statuses that occupy queue capacity
    /// (pending, queued, in_progress, retrying).
    async fn count_active(&self) -> Result<usize, DatabaseError>;

    /// Tasks eligible for scheduling consideration: pending or retrying.
    async fn list_schedulable(&self) -> Result<Vec<Task>, DatabaseError>;

    /// In-progress tasks that started before `cutoff`.
    async fn list_running_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError>;

    /// Non-terminal tasks owned by an agent.
    async fn list_owned_by(&self, agent_id: Uuid) -> Result<Vec<Task>, DatabaseError>;

    /// Bind a task to an agent and flip the agent busy, atomically.
    async fn assign(&self, task_id: Uuid, agent_id: Uuid) -> Result<(), DatabaseError>;

    async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<(), DatabaseError>;

    /// Direct dependencies of a task.
    async fn dependencies_of(&self, task_id: Uuid) -> Result<Vec<Uuid>, DatabaseError>;

    /// Tasks that directly depend on `task_id`.
    async fn dependents_of(&self, task_id: Uuid) -> Result<Vec<Uuid>, DatabaseError>;

    /// Every `(task, depends_on)` edge in the graph.
    async fn all_dependency_edges(&self) -> Result<Vec<(Uuid, Uuid)>, DatabaseError>;
}
