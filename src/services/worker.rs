//! Worker runtime: consumes `task.assigned` events, executes agent logic
//! under a timeout and a concurrency semaphore, and reports outcomes back
//! through the bus.
//!
//! The worker never decides retries itself: it classifies failures as
//! recoverable or not and the scheduler applies the retry policy.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::error::ExecutionError;
use crate::domain::models::{
    Agent, EventEnvelope, EventType, MemoryEntry, MemoryKind, WorkerConfig,
};
use crate::domain::ports::{AgentRepository, KnowledgeStore};
use crate::services::event_bus::{EventBus, EventConsumer, EventHandler};
use crate::services::runners::RunnerRegistry;

/// Terminal execution outcomes, as the worker observes them.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Done(serde_json::Value),
    Failed { error: String, recoverable: bool },
    TimedOut,
    Cancelled,
}

pub struct WorkerRuntime {
    worker_id: String,
    registry: Arc<RunnerRegistry>,
    agents: Arc<dyn AgentRepository>,
    knowledge: Arc<dyn KnowledgeStore>,
    bus: Arc<EventBus>,
    semaphore: Arc<Semaphore>,
    task_timeout: Duration,
    heartbeat_interval: Duration,
    drain_timeout: Duration,
    /// Agents this runtime has executed for; they get heartbeats.
    local_agents: RwLock<HashSet<Uuid>>,
    in_flight: Mutex<HashMap<Uuid, tokio::task::JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(
        worker_id: impl Into<String>,
        registry: Arc<RunnerRegistry>,
        agents: Arc<dyn AgentRepository>,
        knowledge: Arc<dyn KnowledgeStore>,
        bus: Arc<EventBus>,
        config: &WorkerConfig,
        task_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            registry,
            agents,
            knowledge,
            bus,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
            task_timeout,
            heartbeat_interval,
            drain_timeout: Duration::from_secs(config.drain_timeout_seconds),
            local_agents: RwLock::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn active_task_count(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|_, handle| !handle.is_finished());
        in_flight.len()
    }

    /// Wire this runtime into a consumer group.
    pub async fn register_with(self: Arc<Self>, consumer: &EventConsumer) {
        consumer
            .register_handler(EventType::TaskAssigned, Arc::new(AssignmentHandler(self)))
            .await;
    }

    /// Accept one assignment: spawn the execution so the partition loop
    /// is not blocked for the task's duration.
    pub async fn handle_assignment(self: Arc<Self>, event: EventEnvelope) {
        let Some(task_id) = event
            .payload
            .get("task_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            warn!("assignment event without task_id");
            return;
        };
        let Some(agent_id) = event
            .payload
            .get("agent_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            warn!(task_id = %task_id, "assignment event without agent_id");
            return;
        };
        let input = event
            .payload
            .get("input_data")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let trace_id = event.trace_id.clone();

        let runtime = self.clone();
        let handle = tokio::spawn(async move {
            runtime.execute_assignment(task_id, agent_id, input, trace_id).await;
        });
        self.in_flight.lock().await.insert(task_id, handle);
    }

    async fn execute_assignment(
        self: Arc<Self>,
        task_id: Uuid,
        agent_id: Uuid,
        input: serde_json::Value,
        trace_id: Option<String>,
    ) {
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };

        let agent = match self.agents.get(agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                self.publish_failed(task_id, agent_id, "unknown agent", false, 0, &trace_id)
                    .await;
                return;
            }
            Err(err) => {
                self.publish_failed(task_id, agent_id, &err.to_string(), true, 0, &trace_id)
                    .await;
                return;
            }
        };
        self.local_agents.write().await.insert(agent_id);

        self.publish(
            EventType::TaskStarted,
            &task_id.to_string(),
            json!({"task_id": task_id, "agent_id": agent_id}),
            &trace_id,
        )
        .await;

        let started = std::time::Instant::now();
        let outcome = self.run(&agent, &input).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        drop(permit);

        match outcome {
            ExecutionOutcome::Done(result) => {
                debug!(task_id = %task_id, duration_ms, "execution finished");
                self.remember_result(&agent, &input, &result).await;
                self.publish(
                    EventType::TaskCompleted,
                    &task_id.to_string(),
                    json!({"task_id": task_id, "agent_id": agent_id, "result": result}),
                    &trace_id,
                )
                .await;
            }
            ExecutionOutcome::Failed { error, recoverable } => {
                warn!(task_id = %task_id, error, recoverable, "execution failed");
                self.publish_failed(task_id, agent_id, &error, recoverable, duration_ms, &trace_id)
                    .await;
            }
            ExecutionOutcome::TimedOut => {
                warn!(task_id = %task_id, timeout = ?self.task_timeout, "execution timed out");
                self.publish_failed(task_id, agent_id, "TIMEOUT", true, duration_ms, &trace_id)
                    .await;
            }
            ExecutionOutcome::Cancelled => {
                info!(task_id = %task_id, "execution cancelled");
                self.publish(
                    EventType::TaskCancelled,
                    &task_id.to_string(),
                    json!({"task_id": task_id, "agent_id": agent_id}),
                    &trace_id,
                )
                .await;
            }
        }

        self.in_flight.lock().await.remove(&task_id);
    }

    /// Run the agent's runner under the per-task timeout.
    async fn run(&self, agent: &Agent, input: &serde_json::Value) -> ExecutionOutcome {
        let Some(runner) = self.registry.resolve(agent.agent_type) else {
            return ExecutionOutcome::Failed {
                error: format!("no runner for agent type {}", agent.agent_type),
                recoverable: false,
            };
        };

        let timeout = if agent.config.timeout_seconds > 0 {
            Duration::from_secs(agent.config.timeout_seconds)
        } else {
            self.task_timeout
        };

        match tokio::time::timeout(timeout, runner.execute(input)).await {
            Ok(Ok(result)) => ExecutionOutcome::Done(result),
            Ok(Err(ExecutionError::Cancelled)) => ExecutionOutcome::Cancelled,
            Ok(Err(err)) => ExecutionOutcome::Failed {
                recoverable: err.is_recoverable(),
                error: err.to_string(),
            },
            Err(_) => ExecutionOutcome::TimedOut,
        }
    }

    /// Record the result in the knowledge store. Only successful
    /// executions are remembered; failures leave no memory behind.
    async fn remember_result(&self, agent: &Agent, input: &serde_json::Value, result: &serde_json::Value) {
        if !agent.config.memory_enabled {
            return;
        }
        let query = input.get("query").and_then(|q| q.as_str()).unwrap_or("");
        let mut entry = MemoryEntry::new(
            agent.id,
            MemoryKind::Knowledge,
            format!("task: {query}\nresult: {result}"),
        );
        entry.metadata = json!({"worker_id": self.worker_id});
        if let Err(err) = self.knowledge.store(entry).await {
            debug!(agent_id = %agent.id, error = %err, "knowledge store write skipped");
        }
    }

    /// Emit `agent.heartbeat` for every local agent until shutdown.
    pub async fn run_heartbeat_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "heartbeat emitter started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(self.heartbeat_interval) => {
                    let agents: Vec<Uuid> = self.local_agents.read().await.iter().copied().collect();
                    let active = self.active_task_count().await;
                    for agent_id in agents {
                        self.publish(
                            EventType::AgentHeartbeat,
                            &agent_id.to_string(),
                            json!({
                                "agent_id": agent_id,
                                "metrics": {"active_tasks": active, "worker_id": self.worker_id},
                            }),
                            &None,
                        )
                        .await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(worker_id = %self.worker_id, "heartbeat emitter stopped");
    }

    /// Graceful drain: wait up to the drain deadline for in-flight tasks,
    /// then abort the rest and announce each local agent as stopped.
    pub async fn shutdown(&self) {
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        loop {
            if self.active_task_count().await == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                let mut in_flight = self.in_flight.lock().await;
                warn!(remaining = in_flight.len(), "drain deadline reached, aborting tasks");
                for (_, handle) in in_flight.drain() {
                    handle.abort();
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let agents: Vec<Uuid> = self.local_agents.read().await.iter().copied().collect();
        for agent_id in agents {
            self.publish(
                EventType::AgentStopped,
                &agent_id.to_string(),
                json!({"agent_id": agent_id, "reason": "shutdown"}),
                &None,
            )
            .await;
        }
        info!(worker_id = %self.worker_id, "worker runtime drained");
    }

    async fn publish_failed(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        error: &str,
        recoverable: bool,
        duration_ms: u64,
        trace_id: &Option<String>,
    ) {
        self.publish(
            EventType::TaskFailed,
            &task_id.to_string(),
            json!({
                "task_id": task_id,
                "agent_id": agent_id,
                "error": error,
                "will_retry": recoverable,
                "duration_ms": duration_ms,
            }),
            trace_id,
        )
        .await;
    }

    async fn publish(
        &self,
        event_type: EventType,
        key: &str,
        payload: serde_json::Value,
        trace_id: &Option<String>,
    ) {
        let envelope =
            EventEnvelope::new(event_type, key, payload).with_trace(trace_id.clone());
        if let Err(err) = self.bus.publish_event(envelope).await {
            error!(event = %event_type, error = %err, "worker publish failed");
        }
    }
}

/// Bridges the consumer group to the runtime.
struct AssignmentHandler(Arc<WorkerRuntime>);

#[async_trait::async_trait]
impl EventHandler for AssignmentHandler {
    fn name(&self) -> &str {
        "worker-assignment"
    }

    async fn handle(&self, event: EventEnvelope) -> anyhow::Result<()> {
        self.0.clone().handle_assignment(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{topics, AgentType, WorkerConfig};
    use crate::domain::ports::{
        AgentRepository, EchoLanguageModel, NullKnowledgeStore, NullLanguageModel,
    };
    use crate::infrastructure::database::{AgentRepositoryImpl, DatabaseConnection};

    async fn runtime_with_model(
        model: Arc<dyn crate::domain::ports::LanguageModel>,
    ) -> (DatabaseConnection, Arc<WorkerRuntime>, Arc<EventBus>, Agent) {
        let db = DatabaseConnection::new("sqlite::memory:", 1, 5).await.unwrap();
        db.migrate().await.unwrap();
        let agents: Arc<dyn AgentRepository> = Arc::new(AgentRepositoryImpl::new(db.pool().clone()));
        let mut agent = Agent::new("r1", AgentType::Research);
        agent.config.timeout_seconds = 5;
        agents.insert(&agent).await.unwrap();

        let bus = Arc::new(EventBus::new(4));
        let runtime = Arc::new(WorkerRuntime::new(
            "worker-test",
            Arc::new(RunnerRegistry::with_defaults(model)),
            agents,
            Arc::new(NullKnowledgeStore),
            bus.clone(),
            &WorkerConfig::default(),
            Duration::from_secs(5),
            Duration::from_secs(30),
        ));
        (db, runtime, bus, agent)
    }

    fn assignment(task_id: Uuid, agent: &Agent, query: &str) -> EventEnvelope {
        EventEnvelope::new(
            EventType::TaskAssigned,
            agent.id.to_string(),
            json!({
                "task_id": task_id,
                "agent_id": agent.id,
                "input_data": {"query": query},
            }),
        )
    }

    async fn wait_for_event(
        bus: &EventBus,
        topic: &str,
        key: &str,
        event_type: EventType,
    ) -> EventEnvelope {
        let partition = bus.partition_for(key);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let records = bus.fetch(topic, partition, 0, 100).await.unwrap();
                if let Some(record) = records.iter().find(|r| r.envelope.event_type == event_type) {
                    return record.envelope.clone();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("expected event was not published")
    }

    #[tokio::test]
    async fn successful_execution_publishes_started_then_completed() {
        let (_db, runtime, bus, agent) = runtime_with_model(Arc::new(EchoLanguageModel)).await;
        let task_id = Uuid::new_v4();
        runtime.clone().handle_assignment(assignment(task_id, &agent, "summarise X")).await;

        let started =
            wait_for_event(&bus, topics::AGENT_TASKS, &task_id.to_string(), EventType::TaskStarted)
                .await;
        assert_eq!(started.payload["task_id"], json!(task_id));

        let completed = wait_for_event(
            &bus,
            topics::AGENT_TASKS,
            &task_id.to_string(),
            EventType::TaskCompleted,
        )
        .await;
        assert!(completed.payload["result"]["summary"]
            .as_str()
            .unwrap()
            .contains("summarise X"));
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_recoverable() {
        let (_db, runtime, bus, agent) = runtime_with_model(Arc::new(NullLanguageModel)).await;
        let task_id = Uuid::new_v4();
        runtime.clone().handle_assignment(assignment(task_id, &agent, "anything")).await;

        let failed =
            wait_for_event(&bus, topics::AGENT_TASKS, &task_id.to_string(), EventType::TaskFailed)
                .await;
        assert_eq!(failed.payload["will_retry"], json!(true));
    }

    #[tokio::test]
    async fn invalid_input_is_reported_non_recoverable() {
        let (_db, runtime, bus, agent) = runtime_with_model(Arc::new(EchoLanguageModel)).await;
        let task_id = Uuid::new_v4();
        let event = EventEnvelope::new(
            EventType::TaskAssigned,
            agent.id.to_string(),
            json!({"task_id": task_id, "agent_id": agent.id, "input_data": {}}),
        );
        runtime.clone().handle_assignment(event).await;

        let failed =
            wait_for_event(&bus, topics::AGENT_TASKS, &task_id.to_string(), EventType::TaskFailed)
                .await;
        assert_eq!(failed.payload["will_retry"], json!(false));
    }

    #[tokio::test]
    async fn shutdown_announces_local_agents() {
        let (_db, runtime, bus, agent) = runtime_with_model(Arc::new(EchoLanguageModel)).await;
        let task_id = Uuid::new_v4();
        runtime.clone().handle_assignment(assignment(task_id, &agent, "work")).await;
        let _ = wait_for_event(
            &bus,
            topics::AGENT_TASKS,
            &task_id.to_string(),
            EventType::TaskCompleted,
        )
        .await;

        runtime.shutdown().await;
        let stopped = wait_for_event(
            &bus,
            topics::AGENT_LIFECYCLE,
            &agent.id.to_string(),
            EventType::AgentStopped,
        )
        .await;
        assert_eq!(stopped.payload["reason"], "shutdown");
    }
}
