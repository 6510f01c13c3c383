//! Composition root: builds the control plane, wires event handlers and
//! drives the long-running loops.
//!
//! Singleton loops (health monitor, scheduler tick, webhook workers and
//! retry scheduler) run only while this instance holds the leader lease.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{topics, Config, EventEnvelope, EventType};
use crate::domain::ports::{KnowledgeStore, LanguageModel, NullKnowledgeStore, NullLanguageModel};
use crate::infrastructure::database::{
    AgentRepositoryImpl, AuditRepositoryImpl, DatabaseConnection, PoolRepositoryImpl,
    TaskRepositoryImpl,
};
use crate::services::{
    AgentManager, AuditService, ConsumerConfig, EventBus, EventConsumer, FnHandler,
    MetricsService, ReadyQueue, RunnerRegistry, TaskScheduler, StateStore, WebhookDispatcher,
    WorkerRuntime,
};

/// Leader lease TTL; renewal runs at a third of it.
const LEADER_TTL: Duration = Duration::from_secs(30);

/// Event types fanned out to webhooks and the WebSocket channels.
const OBSERVABLE_EVENTS: &[EventType] = &[
    EventType::AgentSpawned,
    EventType::AgentStopped,
    EventType::AgentFailed,
    EventType::TaskCreated,
    EventType::TaskAssigned,
    EventType::TaskStarted,
    EventType::TaskProgress,
    EventType::TaskCompleted,
    EventType::TaskFailed,
    EventType::TaskCancelled,
    EventType::SystemAlert,
    EventType::SystemHealth,
];

pub struct Orchestrator {
    pub config: Config,
    pub db: DatabaseConnection,
    pub state: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsService>,
    pub audit: Arc<AuditService>,
    pub agent_manager: Arc<AgentManager>,
    pub scheduler: Arc<TaskScheduler>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub worker: Arc<WorkerRuntime>,
    pub consumer: Arc<EventConsumer>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    /// Build the full plane with no external collaborators wired in.
    pub async fn build(config: Config) -> Result<Self> {
        Self::build_with(config, Arc::new(NullLanguageModel), Arc::new(NullKnowledgeStore)).await
    }

    /// Build with explicit language-model and knowledge-store ports.
    pub async fn build_with(
        config: Config,
        model: Arc<dyn LanguageModel>,
        knowledge: Arc<dyn KnowledgeStore>,
    ) -> Result<Self> {
        let db = DatabaseConnection::new(
            &config.database.url,
            config.database.min_connections,
            config.database.max_connections,
        )
        .await
        .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to run migrations")?;

        let state = Arc::new(StateStore::new());
        let bus = Arc::new(EventBus::new(config.event_bus.partitions));
        bus.create_default_topics().await;
        let metrics = Arc::new(MetricsService::new());

        let task_repo = Arc::new(TaskRepositoryImpl::new(db.pool().clone()));
        let agent_repo = Arc::new(AgentRepositoryImpl::new(db.pool().clone()));
        let pool_repo = Arc::new(PoolRepositoryImpl::new(db.pool().clone()));
        let audit = Arc::new(AuditService::new(Arc::new(AuditRepositoryImpl::new(
            db.pool().clone(),
        ))));

        let agent_manager = Arc::new(AgentManager::new(
            agent_repo.clone(),
            pool_repo,
            bus.clone(),
            metrics.clone(),
            audit.clone(),
            config.heartbeat.clone(),
            config.max_agents,
        ));
        agent_manager
            .seed_default_pools()
            .await
            .context("Failed to seed agent pools")?;

        let queue = Arc::new(ReadyQueue::new(
            config.scheduler.strategy,
            config.scheduler.queue_max_size,
            config.scheduler.aging_factor,
            config.scheduler.deadline_weight,
            config.scheduler.round_robin_quantum,
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            task_repo,
            agent_manager.clone(),
            queue,
            state.clone(),
            bus.clone(),
            metrics.clone(),
            audit.clone(),
            config.scheduler.clone(),
            config.service_id.clone(),
        ));

        let webhooks = Arc::new(WebhookDispatcher::new(
            state.clone(),
            metrics.clone(),
            config.webhooks.clone(),
        ));
        webhooks.load_webhooks().await;

        let worker_id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let worker = Arc::new(WorkerRuntime::new(
            worker_id,
            Arc::new(RunnerRegistry::with_defaults(model)),
            agent_repo,
            knowledge,
            bus.clone(),
            &config.worker,
            Duration::from_secs(config.scheduler.task_timeout_seconds),
            Duration::from_secs(config.heartbeat.interval_seconds),
        ));

        let consumer = Arc::new(EventConsumer::new(
            bus.clone(),
            ConsumerConfig {
                group_id: config.event_bus.group_id.clone(),
                max_poll_records: config.event_bus.max_poll_records,
                max_handler_failures: config.event_bus.max_handler_failures,
            },
            vec![
                topics::AGENT_LIFECYCLE.to_string(),
                topics::AGENT_TASKS.to_string(),
                topics::AGENT_COMMUNICATION.to_string(),
                topics::AGENT_STATE.to_string(),
                topics::SYSTEM_EVENTS.to_string(),
            ],
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let orchestrator = Self {
            config,
            db,
            state,
            bus,
            metrics,
            audit,
            agent_manager,
            scheduler,
            webhooks,
            worker,
            consumer,
            shutdown_tx,
            shutdown_rx,
        };
        orchestrator.wire_handlers().await;
        Ok(orchestrator)
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Register every bus handler. All handlers are idempotent, so
    /// at-least-once redelivery is safe.
    async fn wire_handlers(&self) {
        // Worker consumes assignments.
        self.worker.clone().register_with(&self.consumer).await;

        // Scheduler reacts to worker progress reports.
        let scheduler = self.scheduler.clone();
        self.consumer
            .register_handler(
                EventType::TaskStarted,
                Arc::new(FnHandler::new("scheduler-start", move |event: EventEnvelope| {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Some(task_id) = payload_uuid(&event, "task_id") {
                            scheduler.start_task(task_id).await?;
                        }
                        Ok(())
                    }
                })),
            )
            .await;

        let scheduler = self.scheduler.clone();
        self.consumer
            .register_handler(
                EventType::TaskProgress,
                Arc::new(FnHandler::new("scheduler-progress", move |event: EventEnvelope| {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Some(task_id) = payload_uuid(&event, "task_id") {
                            let progress = event
                                .payload
                                .get("progress")
                                .and_then(serde_json::Value::as_f64)
                                .unwrap_or(0.0);
                            let message = event
                                .payload
                                .get("message")
                                .and_then(|m| m.as_str())
                                .map(String::from);
                            scheduler.report_progress(task_id, progress, message).await?;
                        }
                        Ok(())
                    }
                })),
            )
            .await;

        let scheduler = self.scheduler.clone();
        self.consumer
            .register_handler(
                EventType::TaskCompleted,
                Arc::new(FnHandler::new("scheduler-complete", move |event: EventEnvelope| {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Some(task_id) = payload_uuid(&event, "task_id") {
                            let result = event.payload.get("result").cloned();
                            scheduler.complete_task(task_id, result).await?;
                        }
                        Ok(())
                    }
                })),
            )
            .await;

        let scheduler = self.scheduler.clone();
        self.consumer
            .register_handler(
                EventType::TaskFailed,
                Arc::new(FnHandler::new("scheduler-fail", move |event: EventEnvelope| {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Some(task_id) = payload_uuid(&event, "task_id") {
                            let error = event
                                .payload
                                .get("error")
                                .and_then(|e| e.as_str())
                                .unwrap_or("unknown error")
                                .to_string();
                            let retry = event
                                .payload
                                .get("will_retry")
                                .and_then(serde_json::Value::as_bool)
                                .unwrap_or(true);
                            scheduler.fail_task(task_id, &error, retry).await?;
                        }
                        Ok(())
                    }
                })),
            )
            .await;

        // Heartbeats observed on the bus stamp the roster without
        // re-publishing.
        let agent_manager = self.agent_manager.clone();
        self.consumer
            .register_handler(
                EventType::AgentHeartbeat,
                Arc::new(FnHandler::new("heartbeat-observer", move |event: EventEnvelope| {
                    let agent_manager = agent_manager.clone();
                    async move {
                        if let Some(agent_id) = payload_uuid(&event, "agent_id") {
                            agent_manager.observe_heartbeat(agent_id).await?;
                        }
                        Ok(())
                    }
                })),
            )
            .await;

        // A stopped agent releases its in-flight tasks back to the queue.
        let scheduler = self.scheduler.clone();
        self.consumer
            .register_handler(
                EventType::AgentStopped,
                Arc::new(FnHandler::new("agent-lost", move |event: EventEnvelope| {
                    let scheduler = scheduler.clone();
                    async move {
                        if let Some(agent_id) = payload_uuid(&event, "agent_id") {
                            let reason = event
                                .payload
                                .get("reason")
                                .and_then(|r| r.as_str())
                                .unwrap_or("agent_terminated");
                            let error = if reason == "heartbeat_timeout" {
                                "agent_lost"
                            } else {
                                "agent_terminated"
                            };
                            scheduler.handle_agent_lost(agent_id, error).await?;
                        }
                        Ok(())
                    }
                })),
            )
            .await;

        // Webhook fan-out and WebSocket channel bridge.
        for &event_type in OBSERVABLE_EVENTS {
            let webhooks = self.webhooks.clone();
            self.consumer
                .register_handler(
                    event_type,
                    Arc::new(FnHandler::new("webhook-fanout", move |event: EventEnvelope| {
                        let webhooks = webhooks.clone();
                        async move {
                            webhooks
                                .trigger_event(
                                    event.event_type.as_str(),
                                    event.payload.clone(),
                                    Some(json!({"trace_id": event.trace_id})),
                                )
                                .await;
                            Ok(())
                        }
                    })),
                )
                .await;

            let state = self.state.clone();
            self.consumer
                .register_handler(
                    event_type,
                    Arc::new(FnHandler::new("channel-bridge", move |event: EventEnvelope| {
                        let state = state.clone();
                        async move {
                            let channel = if event.event_type.as_str().starts_with("task.") {
                                "task.events"
                            } else {
                                "agent.events"
                            };
                            let message = serde_json::to_value(&event)?;
                            state.publish(channel, message).await;
                            Ok(())
                        }
                    })),
                )
                .await;
        }
    }

    /// Acquire leadership, then start every loop. Returns the join
    /// handles of the spawned tasks.
    pub async fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.acquire_leadership().await;

        let mut handles = Vec::new();
        handles.extend(self.consumer.clone().start(self.shutdown_rx.clone()));
        handles.extend(self.webhooks.clone().start(self.shutdown_rx.clone()));
        handles.push(tokio::spawn(
            self.scheduler.clone().run_scheduler_loop(self.shutdown_rx.clone()),
        ));
        handles.push(tokio::spawn(
            self.agent_manager.clone().run_health_monitor(self.shutdown_rx.clone()),
        ));
        handles.push(tokio::spawn(
            self.worker.clone().run_heartbeat_loop(self.shutdown_rx.clone()),
        ));

        // Lease renewal.
        let state = self.state.clone();
        let service_id = self.config.service_id.clone();
        let mut shutdown = self.shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let interval = LEADER_TTL / 3;
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if !state.renew_leadership(&service_id, LEADER_TTL).await {
                            warn!("leader lease lost, attempting to re-acquire");
                            state.try_become_leader(&service_id, LEADER_TTL).await;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        // State-store TTL sweeper.
        let state = self.state.clone();
        let sweep = Duration::from_secs(self.config.state_store.sweep_interval_seconds.max(1));
        let mut shutdown = self.shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(sweep) => {
                        state.sweep_expired().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        info!(service_id = %self.config.service_id, "orchestrator started");
        handles
    }

    async fn acquire_leadership(&self) {
        loop {
            if self
                .state
                .try_become_leader(&self.config.service_id, LEADER_TTL)
                .await
            {
                info!(service_id = %self.config.service_id, "became leader");
                return;
            }
            warn!(service_id = %self.config.service_id, "leader lock held, retrying");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    /// Graceful drain: stop intake, drain the worker, resign, close.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        let _ = self.shutdown_tx.send(true);
        self.worker.shutdown().await;
        self.state
            .resign_leadership(&self.config.service_id)
            .await;
        self.db.close().await;
        info!("orchestrator shutdown complete");
    }
}

fn payload_uuid(event: &EventEnvelope, field: &str) -> Option<Uuid> {
    event
        .payload
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}
