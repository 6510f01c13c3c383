//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use corral::domain::models::Config;
use corral::domain::ports::{EchoLanguageModel, LanguageModel, NullKnowledgeStore};
use corral::Orchestrator;

/// Configuration tuned for fast test cycles.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.url = "sqlite::memory:".to_string();
    config.service_id = "orchestrator-test".to_string();
    config.event_bus.partitions = 4;
    config.scheduler.tick_interval_seconds = 1;
    config.scheduler.retry_delay_seconds = 0;
    config.heartbeat.interval_seconds = 1;
    config.heartbeat.timeout_seconds = 30;
    config.webhooks.retry_tick_seconds = 1;
    config.worker.drain_timeout_seconds = 2;
    config
}

pub async fn orchestrator() -> Orchestrator {
    orchestrator_with_model(Arc::new(EchoLanguageModel)).await
}

pub async fn orchestrator_with_model(model: Arc<dyn LanguageModel>) -> Orchestrator {
    Orchestrator::build_with(test_config(), model, Arc::new(NullKnowledgeStore))
        .await
        .expect("orchestrator should build")
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(timeout, async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    result.expect("condition not reached within timeout");
}
