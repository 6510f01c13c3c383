//! Hierarchical configuration loader.
//!
//! Precedence (lowest to highest): programmatic defaults, `corral.yaml`,
//! `corral.local.yaml`, `CORRAL_*` environment variables, and finally the
//! platform's canonical environment keys (`DATABASE_URL`, `REDIS_URL`,
//! `KAFKA_BOOTSTRAP_SERVERS`, ...).

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_agents: {0}. Must be between 1 and 1000")]
    InvalidMaxAgents(usize),

    #[error("Invalid queue_max_size: {0}. Must be positive")]
    InvalidQueueSize(usize),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid rate limit: requests and window must be positive")]
    InvalidRateLimit,

    #[error("Invalid heartbeat configuration: timeout ({timeout}s) must exceed interval ({interval}s)")]
    InvalidHeartbeat { interval: u64, timeout: u64 },

    #[error("Invalid aging factor: {0}. Must be non-negative")]
    InvalidAgingFactor(f64),

    #[error("Invalid environment value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
}

/// Canonical environment keys recognised by the platform.
const ENV_STRING_KEYS: &[(&str, &str)] = &[
    ("ORCHESTRATOR_HOST", "host"),
    ("DATABASE_URL", "database.url"),
    ("REDIS_URL", "state_store.url"),
    ("KAFKA_BOOTSTRAP_SERVERS", "event_bus.bootstrap_servers"),
    ("KAFKA_GROUP_ID", "event_bus.group_id"),
    ("SCHEDULER_STRATEGY", "scheduler.strategy"),
];

const ENV_INTEGER_KEYS: &[(&str, &str)] = &[
    ("ORCHESTRATOR_PORT", "port"),
    ("AGENT_HEARTBEAT_INTERVAL", "heartbeat.interval_seconds"),
    ("AGENT_HEARTBEAT_TIMEOUT", "heartbeat.timeout_seconds"),
    ("MAX_CONCURRENT_AGENTS", "max_agents"),
    ("TASK_DEFAULT_TIMEOUT", "scheduler.task_timeout_seconds"),
    ("TASK_MAX_RETRIES", "scheduler.max_retries"),
    ("TASK_RETRY_DELAY", "scheduler.retry_delay_seconds"),
    ("TASK_QUEUE_MAX_SIZE", "scheduler.queue_max_size"),
    ("RATE_LIMIT_REQUESTS", "rate_limit.requests"),
    ("RATE_LIMIT_WINDOW", "rate_limit.window_seconds"),
];

const ENV_FLOAT_KEYS: &[(&str, &str)] = &[("SCHEDULER_AGING_FACTOR", "scheduler.aging_factor")];

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        Self::load_with_file(None)
    }

    /// Load with an optional explicit YAML path replacing `corral.yaml`.
    pub fn load_with_file(path: Option<&std::path::Path>) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        figment = match path {
            Some(path) => figment.merge(Yaml::file(path)),
            None => figment
                .merge(Yaml::file("corral.yaml"))
                .merge(Yaml::file("corral.local.yaml")),
        };

        figment = figment.merge(Env::prefixed("CORRAL_").split("__"));
        figment = Self::merge_canonical_env(figment)?;

        let config: Config = figment
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Apply the platform's canonical (unprefixed) environment keys.
    fn merge_canonical_env(mut figment: Figment) -> Result<Figment> {
        for (env_key, config_key) in ENV_STRING_KEYS.iter().copied() {
            if let Ok(value) = std::env::var(env_key) {
                figment = figment.merge(Serialized::global(config_key, value));
            }
        }
        for (env_key, config_key) in ENV_INTEGER_KEYS.iter().copied() {
            if let Ok(value) = std::env::var(env_key) {
                let parsed: u64 = value.parse().map_err(|_| ConfigError::InvalidEnvValue {
                    key: (*env_key).to_string(),
                    value: value.clone(),
                })?;
                figment = figment.merge(Serialized::global(config_key, parsed));
            }
        }
        for (env_key, config_key) in ENV_FLOAT_KEYS.iter().copied() {
            if let Ok(value) = std::env::var(env_key) {
                let parsed: f64 = value.parse().map_err(|_| ConfigError::InvalidEnvValue {
                    key: (*env_key).to_string(),
                    value: value.clone(),
                })?;
                figment = figment.merge(Serialized::global(config_key, parsed));
            }
        }
        Ok(figment)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_agents == 0 || config.max_agents > 1000 {
            return Err(ConfigError::InvalidMaxAgents(config.max_agents));
        }
        if config.scheduler.queue_max_size == 0 {
            return Err(ConfigError::InvalidQueueSize(config.scheduler.queue_max_size));
        }
        if config.database.url.is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.rate_limit.requests == 0 || config.rate_limit.window_seconds == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }

        if config.heartbeat.timeout_seconds <= config.heartbeat.interval_seconds {
            return Err(ConfigError::InvalidHeartbeat {
                interval: config.heartbeat.interval_seconds,
                timeout: config.heartbeat.timeout_seconds,
            });
        }

        if config.scheduler.aging_factor < 0.0 {
            return Err(ConfigError::InvalidAgingFactor(config.scheduler.aging_factor));
        }

        Ok(())
    }
}
