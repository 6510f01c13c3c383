//! The task scheduler: submission, DAG gating, assignment, progress,
//! retry, cancellation and completion.
//!
//! Every status transition runs under the task's state-store lock, so
//! transitions for one task are observed in causal order. Terminal
//! statuses are write-once: operations on finished tasks return `false`
//! and change nothing, which also makes the event handlers that call
//! back into the scheduler idempotent under at-least-once delivery.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::error::TaskError;
use crate::domain::models::{
    AgentStatus, AgentType, EventEnvelope, EventType, SchedulerConfig, SchedulingStrategy, Task,
    TaskStatus,
};
use crate::domain::ports::{TaskFilters, TaskRepository};
use crate::services::agent_manager::AgentManager;
use crate::services::audit_service::AuditService;
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::event_bus::EventBus;
use crate::services::metrics::MetricsService;
use crate::services::ready_queue::{QueueStats, QueuedTask, ReadyQueue};
use crate::services::state_store::{StateStore, LOCK_TTL};

const LOCK_BLOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmitRequest {
    pub description: String,
    #[serde(default)]
    pub priority: i8,
    pub deadline: Option<DateTime<Utc>>,
    pub context: Option<serde_json::Value>,
    pub agent_type: Option<AgentType>,
    /// Target a specific idle agent directly.
    pub agent_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSubmitResult {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub assigned_agent: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub assigned_agent: Option<Uuid>,
    pub progress: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
}

pub struct TaskScheduler {
    tasks: Arc<dyn TaskRepository>,
    agents: Arc<AgentManager>,
    queue: Arc<ReadyQueue>,
    resolver: DependencyResolver,
    state: Arc<StateStore>,
    bus: Arc<EventBus>,
    metrics: Arc<MetricsService>,
    audit: Arc<AuditService>,
    config: SchedulerConfig,
    service_id: String,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        agents: Arc<AgentManager>,
        queue: Arc<ReadyQueue>,
        state: Arc<StateStore>,
        bus: Arc<EventBus>,
        metrics: Arc<MetricsService>,
        audit: Arc<AuditService>,
        config: SchedulerConfig,
        service_id: String,
    ) -> Self {
        Self {
            tasks,
            agents,
            queue,
            resolver: DependencyResolver::new(),
            state,
            bus,
            metrics,
            audit,
            config,
            service_id,
        }
    }

    pub fn queue(&self) -> &ReadyQueue {
        &self.queue
    }

    // Submission

    #[instrument(skip(self, request), err)]
    pub async fn submit_task(&self, request: TaskSubmitRequest) -> Result<TaskSubmitResult, TaskError> {
        let active = self
            .tasks
            .count_active()
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;
        if active >= self.config.queue_max_size {
            return Err(TaskError::QueueFull(self.config.queue_max_size));
        }

        let mut task = Task::new(request.description.clone());
        task.priority = request.priority;
        task.deadline = request.deadline;
        task.parent_task_id = request.parent_task_id;
        task.metadata.trace_id = Some(
            request
                .trace_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        );
        task.metadata.agent_type = request.agent_type;
        task.input_data = Some(json!({
            "query": request.description,
            "context": request.context.clone().unwrap_or_else(|| json!({})),
        }));
        task.validate()?;

        self.tasks
            .insert(&task)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        self.publish_task_event(
            EventType::TaskCreated,
            &task.id.to_string(),
            &task,
            json!({
                "task_id": task.id,
                "description": task.description,
                "priority": task.priority,
            }),
        )
        .await;

        // Direct binding to a requested idle agent.
        let mut assigned_agent = None;
        if let Some(agent_id) = request.agent_id {
            if self.assign(task.id, agent_id).await? {
                assigned_agent = Some(agent_id);
            }
        }

        if assigned_agent.is_none() {
            self.queue.enqueue(self.queued_entry(&task, HashSet::new()));
        }

        self.metrics
            .task_submitted_total
            .with_label_values(&[
                task.metadata
                    .agent_type
                    .map_or("general", |t| t.as_str()),
                &task.priority.to_string(),
            ])
            .inc();
        self.metrics.task_queue_size.set((active + 1) as i64);
        self.audit
            .record(
                "client",
                "task.submit",
                "task",
                Some(task.id.to_string()),
                Some(json!({"priority": task.priority})),
            )
            .await;

        let status = if assigned_agent.is_some() {
            TaskStatus::Queued
        } else {
            TaskStatus::Pending
        };
        info!(task_id = %task.id, status = %status, "task submitted");
        Ok(TaskSubmitResult {
            task_id: task.id,
            status,
            assigned_agent,
            message: "Task submitted successfully".to_string(),
        })
    }

    // Queries

    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, TaskError> {
        self.tasks
            .get(id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))
    }

    pub async fn list(&self, filters: &TaskFilters) -> Result<Vec<Task>, TaskError> {
        self.tasks
            .list(filters)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))
    }

    pub async fn get_status(&self, id: Uuid) -> Result<Option<TaskStatusView>, TaskError> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(None);
        };

        let estimated_completion = match (task.status, task.started_at) {
            (TaskStatus::InProgress, Some(started)) => {
                Some(started + ChronoDuration::seconds(self.config.task_timeout_seconds as i64))
            }
            _ => None,
        };

        Ok(Some(TaskStatusView {
            task_id: task.id,
            status: task.status,
            assigned_agent: task.agent_id,
            progress: task.progress(),
            started_at: task.started_at,
            estimated_completion,
            result: task
                .output_data
                .as_ref()
                .and_then(|o| o.get("result").cloned()),
        }))
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats(Utc::now())
    }

    // Assignment

    /// Bind a ready task to an idle agent. Returns false when either side
    /// is no longer in an assignable state.
    #[instrument(skip(self), err)]
    pub async fn assign(&self, task_id: Uuid, agent_id: Uuid) -> Result<bool, TaskError> {
        let lock = self.task_lock(task_id).await?;
        let result = self.assign_locked(task_id, agent_id).await;
        self.state.release_lock(&lock).await;
        result
    }

    async fn assign_locked(&self, task_id: Uuid, agent_id: Uuid) -> Result<bool, TaskError> {
        let Some(task) = self.get_task(task_id).await? else {
            return Ok(false);
        };
        if !task.status.is_assignable() {
            return Ok(false);
        }

        let agent = self
            .agents
            .get(agent_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;
        let Some(agent) = agent else {
            return Ok(false);
        };
        if agent.status != AgentStatus::Idle {
            return Ok(false);
        }

        // One transaction: task -> queued (bound), agent -> busy.
        self.tasks
            .assign(task_id, agent_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        self.queue.remove(task_id);
        self.queue.note_assignment(agent_id);

        // Keyed by agent id so the owning worker sees assignments in order.
        self.publish_task_event(
            EventType::TaskAssigned,
            &agent_id.to_string(),
            &task,
            json!({
                "task_id": task_id,
                "agent_id": agent_id,
                "description": task.description,
                "priority": task.priority,
                "deadline": task.deadline,
                "input_data": task.input_data,
                "trace_id": task.trace_id(),
            }),
        )
        .await;

        info!(task_id = %task_id, agent_id = %agent_id, "task assigned");
        Ok(true)
    }

    // Progress and terminal transitions

    /// queued -> in_progress.
    pub async fn start_task(&self, id: Uuid) -> Result<bool, TaskError> {
        let lock = self.task_lock(id).await?;
        let result = async {
            let Some(mut task) = self.get_task(id).await? else {
                return Ok(false);
            };
            if task.status != TaskStatus::Queued {
                return Ok(false);
            }

            let now = Utc::now();
            task.status = TaskStatus::InProgress;
            task.started_at = Some(now);
            task.updated_at = now;
            self.update(&task).await?;

            self.publish_task_event(
                EventType::TaskStarted,
                &id.to_string(),
                &task,
                json!({"task_id": id, "agent_id": task.agent_id}),
            )
            .await;
            info!(task_id = %id, "task started");
            Ok(true)
        }
        .await;
        self.state.release_lock(&lock).await;
        result
    }

    pub async fn report_progress(
        &self,
        id: Uuid,
        progress: f64,
        message: Option<String>,
    ) -> Result<bool, TaskError> {
        if !(0.0..=1.0).contains(&progress) {
            return Err(TaskError::Validation(format!(
                "progress {progress} out of range 0..=1"
            )));
        }

        let Some(mut task) = self.get_task(id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::InProgress {
            return Ok(false);
        }

        task.metadata.progress = Some(progress);
        task.metadata.progress_message = message.clone();
        task.updated_at = Utc::now();
        self.update(&task).await?;

        self.publish_task_event(
            EventType::TaskProgress,
            &id.to_string(),
            &task,
            json!({
                "task_id": id,
                "agent_id": task.agent_id,
                "progress": progress,
                "message": message,
            }),
        )
        .await;
        Ok(true)
    }

    /// Change a task's base priority and re-score its ready-set entry.
    /// Terminal tasks are left untouched and return false.
    pub async fn update_task_priority(&self, id: Uuid, priority: i8) -> Result<bool, TaskError> {
        if !(crate::domain::models::PRIORITY_MIN..=crate::domain::models::PRIORITY_MAX)
            .contains(&priority)
        {
            return Err(TaskError::Validation(format!(
                "priority {priority} out of range {}..={}",
                crate::domain::models::PRIORITY_MIN,
                crate::domain::models::PRIORITY_MAX
            )));
        }

        let lock = self.task_lock(id).await?;
        let outcome = async {
            let Some(mut task) = self.get_task(id).await? else {
                return Ok(false);
            };
            if task.status.is_terminal() {
                return Ok(false);
            }

            task.priority = priority;
            task.updated_at = Utc::now();
            self.update(&task).await?;
            self.queue.update_priority(id, priority);

            info!(task_id = %id, priority, "task priority updated");
            Ok(true)
        }
        .await;
        self.state.release_lock(&lock).await;
        outcome
    }

    /// in_progress -> completed. Frees the owning agent and unblocks
    /// dependents. Idempotent: a second call returns false.
    #[instrument(skip(self, result), err)]
    pub async fn complete_task(
        &self,
        id: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<bool, TaskError> {
        let lock = self.task_lock(id).await?;
        let outcome = self.complete_locked(id, result).await;
        self.state.release_lock(&lock).await;
        outcome
    }

    async fn complete_locked(
        &self,
        id: Uuid,
        result: Option<serde_json::Value>,
    ) -> Result<bool, TaskError> {
        let Some(mut task) = self.get_task(id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::InProgress {
            return Ok(false);
        }

        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        task.output_data = Some(json!({"result": result}));
        self.update(&task).await?;

        self.release_agent(task.agent_id).await;

        self.publish_task_event(
            EventType::TaskCompleted,
            &id.to_string(),
            &task,
            json!({"task_id": id, "agent_id": task.agent_id, "result": result}),
        )
        .await;

        let task_type = task.metadata.agent_type.map_or("general", |t| t.as_str());
        self.metrics
            .task_completed_total
            .with_label_values(&[task_type, "success"])
            .inc();
        if let Some(started) = task.started_at {
            let secs = (now - started).num_milliseconds().max(0) as f64 / 1000.0;
            self.metrics
                .task_duration_seconds
                .with_label_values(&[task_type])
                .observe(secs);
        }

        // Unblock dependents in the ready set.
        let unblocked = self.queue.resolve_dependency(id);
        if unblocked > 0 {
            debug!(task_id = %id, unblocked, "dependents unblocked");
        }

        self.audit
            .record("system", "task.complete", "task", Some(id.to_string()), None)
            .await;
        info!(task_id = %id, "task completed");
        Ok(true)
    }

    /// Mark a queued/in-progress task failed. With retry budget left and
    /// `retry = true`, the task re-enters the ready set after
    /// `retry_delay * 2^attempt` seconds with its agent binding cleared.
    #[instrument(skip(self), err)]
    pub async fn fail_task(&self, id: Uuid, error: &str, retry: bool) -> Result<bool, TaskError> {
        let lock = self.task_lock(id).await?;
        let outcome = self.fail_locked(id, error, retry).await;
        self.state.release_lock(&lock).await;
        outcome
    }

    async fn fail_locked(&self, id: Uuid, error: &str, retry: bool) -> Result<bool, TaskError> {
        let Some(mut task) = self.get_task(id).await? else {
            return Ok(false);
        };
        if !matches!(task.status, TaskStatus::Queued | TaskStatus::InProgress) {
            return Ok(false);
        }

        let now = Utc::now();
        let former_agent = task.agent_id;
        let retry_count = task.metadata.retry_count;
        let task_type = task.metadata.agent_type.map_or("general", |t| t.as_str());
        let will_retry = retry && retry_count < self.config.max_retries;

        if will_retry {
            let backoff_secs =
                self.config.retry_delay_seconds.saturating_mul(1 << retry_count.min(16));
            task.status = TaskStatus::Retrying;
            task.metadata.retry_count = retry_count + 1;
            task.metadata.last_error = Some(error.to_string());
            task.metadata.next_retry_at = Some(now + ChronoDuration::seconds(backoff_secs as i64));
            task.agent_id = None;
            task.updated_at = now;
            self.update(&task).await?;

            self.metrics
                .task_retry_total
                .with_label_values(&[task_type])
                .inc();
            warn!(
                task_id = %id,
                retry_count = retry_count + 1,
                backoff_secs,
                error,
                "task will be retried"
            );

            let mut entry = self.queued_entry(&task, HashSet::new());
            entry.not_before = task.metadata.next_retry_at;
            self.queue.enqueue(entry);
        } else {
            task.status = TaskStatus::Failed;
            task.metadata.last_error = Some(error.to_string());
            task.completed_at = Some(now);
            task.updated_at = now;
            task.output_data = Some(json!({"error": error}));
            self.update(&task).await?;

            self.metrics
                .task_failed_total
                .with_label_values(&[task_type, "execution_error"])
                .inc();
            error!(task_id = %id, error, "task failed permanently");
        }

        self.release_agent(former_agent).await;

        self.publish_task_event(
            EventType::TaskFailed,
            &id.to_string(),
            &task,
            json!({
                "task_id": id,
                "agent_id": former_agent,
                "error": error,
                "retry_count": task.metadata.retry_count,
                "will_retry": will_retry,
            }),
        )
        .await;
        Ok(true)
    }

    /// Cancel a pending or queued task. Cancelling a terminal task is a
    /// no-op returning false; any other state is rejected.
    #[instrument(skip(self), err)]
    pub async fn cancel_task(&self, id: Uuid) -> Result<bool, TaskError> {
        let lock = self.task_lock(id).await?;
        let outcome = async {
            let Some(mut task) = self.get_task(id).await? else {
                return Err(TaskError::NotFound(id));
            };
            if task.status.is_terminal() {
                return Ok(false);
            }
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Queued) {
                return Err(TaskError::InvalidState {
                    task: id,
                    status: task.status,
                });
            }

            let now = Utc::now();
            let former_agent = task.agent_id;
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(now);
            task.updated_at = now;
            task.agent_id = None;
            self.update(&task).await?;

            self.queue.remove(id);
            self.release_agent(former_agent).await;

            self.publish_task_event(
                EventType::TaskCancelled,
                &id.to_string(),
                &task,
                json!({"task_id": id}),
            )
            .await;
            self.audit
                .record("client", "task.cancel", "task", Some(id.to_string()), None)
                .await;
            info!(task_id = %id, "task cancelled");
            Ok(true)
        }
        .await;
        self.state.release_lock(&lock).await;
        outcome
    }

    // Dependencies

    /// Add a `task -> depends_on` edge, rejecting self-edges and cycles.
    #[instrument(skip(self), err)]
    pub async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid) -> Result<(), TaskError> {
        if task_id == depends_on {
            return Err(TaskError::SelfDependency(task_id));
        }

        let task = self
            .get_task(task_id)
            .await?
            .ok_or(TaskError::NotFound(task_id))?;
        let upstream = self
            .get_task(depends_on)
            .await?
            .ok_or(TaskError::NotFound(depends_on))?;

        let edges = self
            .tasks
            .all_dependency_edges()
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;
        if self.resolver.would_create_cycle(&edges, task_id, depends_on) {
            return Err(TaskError::CyclicDependency {
                task: task_id,
                depends_on,
            });
        }

        self.tasks
            .add_dependency(task_id, depends_on)
            .await
            .map_err(|e| match e {
                crate::domain::ports::DatabaseError::ConstraintViolation(_) => {
                    TaskError::Validation("dependency already exists".to_string())
                }
                other => TaskError::Storage(other.to_string()),
            })?;

        // Gate the ready-set entry until the upstream task finishes.
        if upstream.status != TaskStatus::Completed {
            self.queue.add_dependency(task_id, depends_on);
        }

        debug!(task_id = %task.id, depends_on = %depends_on, "dependency added");
        Ok(())
    }

    // Failure recovery

    /// Re-queue every task owned by a lost agent.
    pub async fn handle_agent_lost(&self, agent_id: Uuid, reason: &str) -> Result<usize, TaskError> {
        let owned = self
            .tasks
            .list_owned_by(agent_id)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;
        let mut released = 0;
        for task in owned {
            if self.fail_task(task.id, reason, true).await? {
                released += 1;
            }
        }
        if released > 0 {
            info!(agent_id = %agent_id, released, reason, "released tasks from lost agent");
        }
        Ok(released)
    }

    // Scheduler loop

    /// One scheduling pass: reconcile the ready set from durable rows,
    /// apply aging, time out overrunning tasks, then offer ready tasks to
    /// eligible agents in strategy order.
    pub async fn tick(&self) -> Result<usize, TaskError> {
        let now = Utc::now();
        self.sync_ready_set().await?;
        self.queue.apply_aging(now);
        self.sweep_timeouts(now).await?;

        let mut assigned = 0;
        for candidate in self.queue.peek_ready(self.config.batch_size, now) {
            let agent = self.select_agent(&candidate).await?;
            let Some(agent_id) = agent else {
                continue;
            };
            if !self.queue.may_assign(agent_id) {
                continue;
            }
            match self.assign(candidate.task_id, agent_id).await {
                Ok(true) => assigned += 1,
                Ok(false) => {}
                Err(err) if err.is_transient() => {
                    warn!(task_id = %candidate.task_id, error = %err, "assignment deferred");
                }
                Err(err) => return Err(err),
            }
        }

        if let Ok(active) = self.tasks.count_active().await {
            self.metrics.task_queue_size.set(active as i64);
        }
        Ok(assigned)
    }

    async fn select_agent(&self, candidate: &QueuedTask) -> Result<Option<Uuid>, TaskError> {
        if self.queue.strategy() == SchedulingStrategy::MlOptimized {
            let capacities = self
                .agents
                .capacity_snapshot(candidate.agent_type)
                .await
                .map_err(|e| TaskError::Storage(e.to_string()))?;
            return Ok(self.queue.best_agent(candidate, &capacities));
        }
        let agent = self
            .agents
            .pick_available(candidate.agent_type, None)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;
        Ok(agent.map(|a| a.id))
    }

    /// Mirror pending/retrying rows into the in-memory ready set. Also
    /// recovers state after a restart or a lost event.
    async fn sync_ready_set(&self) -> Result<(), TaskError> {
        let schedulable = self
            .tasks
            .list_schedulable()
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;

        for task in schedulable {
            if self.queue.contains(task.id) {
                continue;
            }
            let deps = self
                .tasks
                .dependencies_of(task.id)
                .await
                .map_err(|e| TaskError::Storage(e.to_string()))?;
            let mut unresolved = HashSet::new();
            for dep in deps {
                let done = self
                    .get_task(dep)
                    .await?
                    .is_some_and(|d| d.status == TaskStatus::Completed);
                if !done {
                    unresolved.insert(dep);
                }
            }
            let mut entry = self.queued_entry(&task, unresolved);
            entry.not_before = task.metadata.next_retry_at;
            self.queue.enqueue(entry);
        }
        Ok(())
    }

    /// Fail-with-retry any in-progress task that outlived `task_timeout`.
    async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<usize, TaskError> {
        let cutoff = now - ChronoDuration::seconds(self.config.task_timeout_seconds as i64);
        let overdue = self
            .tasks
            .list_running_since(cutoff)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))?;
        let mut swept = 0;
        for task in overdue {
            warn!(task_id = %task.id, "task exceeded timeout");
            if self.fail_task(task.id, "TIMEOUT", true).await? {
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// The 1-second scheduler loop; runs only on the leader.
    pub async fn run_scheduler_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_interval_seconds.max(1));
        info!(strategy = self.queue.strategy().as_str(), "scheduler loop started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "scheduler tick failed");
                        self.publish_alert("error", &format!("scheduler tick failed: {err}")).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler loop stopped");
    }

    // Helpers

    fn queued_entry(&self, task: &Task, dependencies: HashSet<Uuid>) -> QueuedTask {
        let mut entry = QueuedTask::new(task.id, task.priority, task.created_at);
        entry.deadline = task.deadline;
        entry.agent_type = task.metadata.agent_type;
        entry.dependencies = dependencies;
        entry
    }

    async fn task_lock(&self, task_id: Uuid) -> Result<crate::services::state_store::StateLock, TaskError> {
        let name = format!("task:{task_id}");
        self.state
            .acquire_lock(&name, LOCK_TTL, LOCK_BLOCK_TIMEOUT)
            .await
            .ok_or(TaskError::LockUnavailable(name))
    }

    async fn update(&self, task: &Task) -> Result<(), TaskError> {
        self.tasks
            .update(task)
            .await
            .map_err(|e| TaskError::Storage(e.to_string()))
    }

    /// Scheduler-owned busy -> idle release. Transition errors (agent
    /// already offline or failed) are logged and swallowed.
    async fn release_agent(&self, agent_id: Option<Uuid>) {
        let Some(agent_id) = agent_id else { return };
        if let Err(err) = self.agents.update_status(agent_id, AgentStatus::Idle).await {
            debug!(agent_id = %agent_id, error = %err, "agent not released to idle");
        }
    }

    async fn publish_task_event(
        &self,
        event_type: EventType,
        key: &str,
        task: &Task,
        payload: serde_json::Value,
    ) {
        let envelope = EventEnvelope::new(event_type, key, payload)
            .with_trace(task.metadata.trace_id.clone());
        if let Err(err) = self.bus.publish_event(envelope).await {
            error!(event = %event_type, error = %err, "task event publish failed");
        }
    }

    async fn publish_alert(&self, severity: &str, message: &str) {
        let envelope = EventEnvelope::new(
            EventType::SystemAlert,
            self.service_id.clone(),
            json!({"service": self.service_id, "severity": severity, "message": message}),
        );
        let _ = self.bus.publish_event(envelope).await;
    }
}
