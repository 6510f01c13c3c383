//! Task domain model.
//!
//! Tasks are discrete units of work routed to agents. They form a DAG
//! through the dependency edge table; terminal statuses are write-once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentType;
use crate::domain::error::TaskError;

/// Lowest admissible task priority.
pub const PRIORITY_MIN: i8 = -10;
/// Highest admissible task priority.
pub const PRIORITY_MAX: i8 = 10;

/// Status of a task in the scheduling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, waiting for dependencies and an agent.
    Pending,
    /// Bound to an agent, assignment event emitted.
    Queued,
    /// The owning agent is executing it.
    InProgress,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed with no retry budget left. Terminal.
    Failed,
    /// Cancelled before execution. Terminal.
    Cancelled,
    /// Failed but will re-enter the ready set after a backoff.
    Retrying,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Retrying => "retrying",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "retrying" => Some(Self::Retrying),
            _ => None,
        }
    }

    /// Terminal statuses are write-once: no field changes after entry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that count against the queue admission limit.
    pub fn counts_against_queue(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Queued | Self::InProgress | Self::Retrying
        )
    }

    /// Statuses from which the scheduler may hand the task to an agent.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Retrying)
    }

    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Queued, Self::Cancelled],
            Self::Queued => &[
                Self::InProgress,
                Self::Cancelled,
                Self::Retrying,
                Self::Failed,
            ],
            Self::InProgress => &[Self::Completed, Self::Failed, Self::Retrying],
            Self::Retrying => &[Self::Queued, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping attached to a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Distributed trace correlation id; minted at submission if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Routing hint restricting which agent type may execute the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    #[serde(default)]
    pub retry_count: u32,
    /// Fractional progress in [0, 1] while in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest instant a retrying task re-enters the ready set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A unit of work with inputs, priority, optional deadline and dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub status: TaskStatus,
    /// Priority in [-10, 10]; higher runs sooner.
    pub priority: i8,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub metadata: TaskMetadata,
    /// Owning agent while queued/in progress. Cleared on retry.
    pub agent_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: 0,
            input_data: None,
            output_data: None,
            metadata: TaskMetadata::default(),
            agent_id: None,
            parent_task_id: None,
            deadline: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.description.trim().is_empty() {
            return Err(TaskError::Validation("description must not be empty".into()));
        }
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&self.priority) {
            return Err(TaskError::Validation(format!(
                "priority {} out of range {}..={}",
                self.priority, PRIORITY_MIN, PRIORITY_MAX
            )));
        }
        if let Some(progress) = self.metadata.progress {
            if !(0.0..=1.0).contains(&progress) {
                return Err(TaskError::Validation(format!(
                    "progress {progress} out of range 0..=1"
                )));
            }
        }
        Ok(())
    }

    /// Effective progress as reported to status queries.
    pub fn progress(&self) -> f64 {
        match self.status {
            TaskStatus::Completed => 1.0,
            TaskStatus::InProgress => self.metadata.progress.unwrap_or(0.5),
            _ => 0.0,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.metadata.trace_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Retrying.is_terminal());
        assert!(TaskStatus::Completed.valid_transitions().is_empty());
    }

    #[test]
    fn queue_accounting() {
        assert!(TaskStatus::Pending.counts_against_queue());
        assert!(TaskStatus::Retrying.counts_against_queue());
        assert!(!TaskStatus::Completed.counts_against_queue());
        assert!(!TaskStatus::Cancelled.counts_against_queue());
    }

    #[test]
    fn validation_rejects_empty_description() {
        let task = Task::new("  ");
        assert!(task.validate().is_err());
    }

    #[test]
    fn validation_rejects_out_of_range_priority() {
        let mut task = Task::new("work");
        task.priority = 11;
        assert!(task.validate().is_err());
        task.priority = -10;
        assert!(task.validate().is_ok());
    }

    #[test]
    fn progress_by_status() {
        let mut task = Task::new("work");
        assert_eq!(task.progress(), 0.0);
        task.status = TaskStatus::InProgress;
        assert_eq!(task.progress(), 0.5);
        task.metadata.progress = Some(0.8);
        assert_eq!(task.progress(), 0.8);
        task.status = TaskStatus::Completed;
        assert_eq!(task.progress(), 1.0);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::Retrying,
        ] {
            assert_eq!(TaskStatus::parse_str(status.as_str()), Some(status));
        }
    }
}
