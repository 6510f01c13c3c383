//! Runtime configuration model.
//!
//! Loaded by `infrastructure::config::ConfigLoader` from defaults, YAML
//! files and the environment.

use serde::{Deserialize, Serialize};

/// How the ready set is drained each scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStrategy {
    Fifo,
    Priority,
    Deadline,
    FairShare,
    RoundRobin,
    MlOptimized,
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        Self::Priority
    }
}

impl SchedulingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::Priority => "priority",
            Self::Deadline => "deadline",
            Self::FairShare => "fair_share",
            Self::RoundRobin => "round_robin",
            Self::MlOptimized => "ml_optimized",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fifo" => Some(Self::Fifo),
            "priority" => Some(Self::Priority),
            "deadline" => Some(Self::Deadline),
            "fair_share" => Some(Self::FairShare),
            "round_robin" => Some(Self::RoundRobin),
            "ml_optimized" => Some(Self::MlOptimized),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address for the HTTP surface.
    pub host: String,
    pub port: u16,
    /// Identity used for leader election and system event keys.
    pub service_id: String,
    /// Active-agent spawn ceiling.
    pub max_agents: usize,
    pub database: DatabaseConfig,
    pub state_store: StateStoreConfig,
    pub event_bus: EventBusConfig,
    pub scheduler: SchedulerConfig,
    pub heartbeat: HeartbeatConfig,
    pub worker: WorkerConfig,
    pub webhooks: WebhooksConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            service_id: "orchestrator".to_string(),
            max_agents: 100,
            database: DatabaseConfig::default(),
            state_store: StateStoreConfig::default(),
            event_bus: EventBusConfig::default(),
            scheduler: SchedulerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            worker: WorkerConfig::default(),
            webhooks: WebhooksConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:corral.db".to_string(),
            min_connections: 5,
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateStoreConfig {
    /// External endpoint; retained so a networked backend can be swapped in.
    pub url: String,
    pub max_connections: u32,
    /// How often expired keys are swept.
    pub sweep_interval_seconds: u64,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            max_connections: 50,
            sweep_interval_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// External endpoint; retained so a networked backend can be swapped in.
    pub bootstrap_servers: String,
    pub group_id: String,
    pub partitions: usize,
    /// Poll batch ceiling per partition.
    pub max_poll_records: usize,
    /// Handler failures before a record moves to dead.letter.
    pub max_handler_failures: u32,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "corral-orchestrator".to_string(),
            partitions: 16,
            max_poll_records: 50,
            max_handler_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub strategy: SchedulingStrategy,
    pub queue_max_size: usize,
    /// Ready tasks considered per tick.
    pub batch_size: usize,
    pub tick_interval_seconds: u64,
    /// Priority boost per minute of queue age.
    pub aging_factor: f64,
    pub deadline_weight: f64,
    pub fair_share_window_seconds: u64,
    /// Consecutive tasks per agent before round-robin rotation.
    pub round_robin_quantum: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub task_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: SchedulingStrategy::Priority,
            queue_max_size: 10_000,
            batch_size: 10,
            tick_interval_seconds: 1,
            aging_factor: 0.1,
            deadline_weight: 2.0,
            fair_share_window_seconds: 3600,
            round_robin_quantum: 5,
            max_retries: 3,
            retry_delay_seconds: 5,
            task_timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            timeout_seconds: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// In-flight executions per worker runtime.
    pub max_concurrent_tasks: usize,
    /// Grace period for in-flight tasks during shutdown.
    pub drain_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            drain_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhooksConfig {
    pub worker_count: usize,
    pub retry_tick_seconds: u64,
    pub delivery_retention_seconds: u64,
}

impl Default for WebhooksConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            retry_tick_seconds: 30,
            delivery_retention_seconds: 7 * 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
