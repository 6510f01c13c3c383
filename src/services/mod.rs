//! Control-plane services.

pub mod agent_manager;
pub mod audit_service;
pub mod dependency_resolver;
pub mod event_bus;
pub mod metrics;
pub mod ready_queue;
pub mod runners;
pub mod scheduler;
pub mod state_store;
pub mod webhook_dispatcher;
pub mod worker;

pub use agent_manager::{AgentManager, AgentSpawnRequest, AgentSpawnResult};
pub use audit_service::AuditService;
pub use dependency_resolver::DependencyResolver;
pub use event_bus::{ConsumerConfig, EventBus, EventConsumer, EventHandler, FnHandler, PublishAck};
pub use metrics::MetricsService;
pub use ready_queue::{priority_score, AgentCapacity, QueueStats, QueuedTask, ReadyQueue};
pub use runners::{Runner, RunnerRegistry};
pub use scheduler::{TaskScheduler, TaskStatusView, TaskSubmitRequest, TaskSubmitResult};
pub use state_store::{StateLock, StateStore};
pub use webhook_dispatcher::{
    sign_payload, verify_signature, WebhookDispatcher, WebhookRegisterRequest,
    WebhookUpdateRequest,
};
pub use worker::WorkerRuntime;
