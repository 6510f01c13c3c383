//! Webhook fan-out: reliable delivery with HMAC signatures, exponential
//! retry and a failure-count circuit breaker.
//!
//! Webhook configs and delivery records live in the state store
//! (`webhooks:config:{id}`, `webhooks:delivery:{id}`); deliveries are
//! retained for seven days via the key TTL.

use chrono::{Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::error::WebhookError;
use crate::domain::models::{
    Delivery, DeliveryStatus, Webhook, WebhookStatus, WebhooksConfig, FAILURE_DISABLE_THRESHOLD,
};
use crate::services::metrics::MetricsService;
use crate::services::state_store::StateStore;

type HmacSha256 = Hmac<Sha256>;

const CONFIG_PREFIX: &str = "webhooks:config:";
const DELIVERY_PREFIX: &str = "webhooks:delivery:";

/// Compute the hex HMAC-SHA256 signature carried in `X-Webhook-Signature`.
pub fn sign_payload(payload: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Recipient-side verification of a signature.
pub fn verify_signature(payload: &str, secret: &str, signature: &str) -> bool {
    let Ok(raw) = hex::decode(signature) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload.as_bytes());
    mac.verify_slice(&raw).is_ok()
}

fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookRegisterRequest {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub headers: Option<HashMap<String, String>>,
    pub retry_count: Option<u32>,
    pub retry_delay_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookUpdateRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub status: Option<WebhookStatus>,
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeliveryStats {
    pub period_hours: i64,
    pub total_deliveries: usize,
    pub delivered: usize,
    pub failed: usize,
    pub retrying: usize,
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

pub struct WebhookDispatcher {
    state: Arc<StateStore>,
    metrics: Arc<MetricsService>,
    client: reqwest::Client,
    webhooks: RwLock<HashMap<Uuid, Webhook>>,
    queue_tx: mpsc::Sender<Delivery>,
    queue_rx: Mutex<mpsc::Receiver<Delivery>>,
    config: WebhooksConfig,
}

impl WebhookDispatcher {
    pub fn new(state: Arc<StateStore>, metrics: Arc<MetricsService>, config: WebhooksConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(1024);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        Self {
            state,
            metrics,
            client,
            webhooks: RwLock::new(HashMap::new()),
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            config,
        }
    }

    /// Load persisted webhook configs from the state store.
    pub async fn load_webhooks(&self) {
        let keys = self.state.keys_with_prefix(CONFIG_PREFIX).await;
        let mut webhooks = self.webhooks.write().await;
        for key in keys {
            if let Some(webhook) = self.state.get_json::<Webhook>(&key).await {
                webhooks.insert(webhook.id, webhook);
            }
        }
        if !webhooks.is_empty() {
            info!(count = webhooks.len(), "webhooks loaded");
        }
    }

    /// Spawn the delivery workers and the retry scheduler.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for worker_id in 0..self.config.worker_count.max(1) {
            let dispatcher = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.delivery_worker(worker_id, shutdown).await;
            }));
        }
        let dispatcher = Arc::clone(&self);
        handles.push(tokio::spawn(async move {
            dispatcher.retry_scheduler(shutdown).await;
        }));
        handles
    }

    // Management

    pub async fn register(&self, request: WebhookRegisterRequest) -> Result<Webhook, WebhookError> {
        if request.url.trim().is_empty() {
            return Err(WebhookError::Validation("url must not be empty".into()));
        }
        if request.events.is_empty() {
            return Err(WebhookError::Validation("events must not be empty".into()));
        }

        let mut webhook = Webhook::new(request.name, request.url, request.events);
        webhook.secret = request.secret.unwrap_or_else(generate_secret);
        if let Some(headers) = request.headers {
            webhook.headers = headers;
        }
        if let Some(retry_count) = request.retry_count {
            webhook.retry_count = retry_count.max(1);
        }
        if let Some(delay) = request.retry_delay_seconds {
            webhook.retry_delay_seconds = delay;
        }
        if let Some(timeout) = request.timeout_seconds {
            webhook.timeout_seconds = timeout;
        }

        self.save_webhook(&webhook).await;
        self.webhooks.write().await.insert(webhook.id, webhook.clone());
        info!(webhook_id = %webhook.id, name = %webhook.name, "webhook registered");
        Ok(webhook)
    }

    pub async fn update(
        &self,
        id: Uuid,
        request: WebhookUpdateRequest,
    ) -> Result<Webhook, WebhookError> {
        let mut webhooks = self.webhooks.write().await;
        let webhook = webhooks.get_mut(&id).ok_or(WebhookError::NotFound(id))?;

        if let Some(name) = request.name {
            webhook.name = name;
        }
        if let Some(url) = request.url {
            webhook.url = url;
        }
        if let Some(events) = request.events {
            webhook.events = events;
        }
        if let Some(status) = request.status {
            webhook.status = status;
            if status == WebhookStatus::Active {
                // Reactivation clears the breaker.
                webhook.failure_count = 0;
            }
        }
        if let Some(headers) = request.headers {
            webhook.headers = headers;
        }
        webhook.updated_at = Utc::now();

        let snapshot = webhook.clone();
        drop(webhooks);
        self.save_webhook(&snapshot).await;
        Ok(snapshot)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), WebhookError> {
        let removed = self.webhooks.write().await.remove(&id);
        if removed.is_none() {
            return Err(WebhookError::NotFound(id));
        }
        self.state.delete(&format!("{CONFIG_PREFIX}{id}")).await;
        info!(webhook_id = %id, "webhook deleted");
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<Webhook> {
        self.webhooks.read().await.get(&id).cloned()
    }

    pub async fn list(&self, status: Option<WebhookStatus>) -> Vec<Webhook> {
        let webhooks = self.webhooks.read().await;
        webhooks
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect()
    }

    // Triggering

    /// Fan an event out to every matching active webhook.
    pub async fn trigger_event(
        &self,
        event_type: &str,
        data: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> usize {
        let payload = json!({
            "id": Uuid::new_v4(),
            "type": event_type,
            "timestamp": Utc::now(),
            "data": data,
            "metadata": metadata.unwrap_or_else(|| json!({})),
        });

        let matching: Vec<Webhook> = {
            let webhooks = self.webhooks.read().await;
            webhooks
                .values()
                .filter(|w| w.is_deliverable() && w.matches(event_type))
                .cloned()
                .collect()
        };

        let mut queued = 0;
        for webhook in matching {
            let delivery = Delivery::new(&webhook, event_type, payload.clone());
            self.store_delivery(&delivery).await;
            if self.queue_tx.send(delivery).await.is_ok() {
                queued += 1;
            }
        }
        queued
    }

    /// Send a `system.health` probe to one webhook regardless of its
    /// subscriptions.
    pub async fn test_webhook(&self, id: Uuid) -> Result<Delivery, WebhookError> {
        let webhook = self.get(id).await.ok_or(WebhookError::NotFound(id))?;
        let payload = json!({
            "id": Uuid::new_v4(),
            "type": "system.health",
            "timestamp": Utc::now(),
            "data": {"test": true, "webhook_id": id},
            "metadata": {},
        });
        let mut delivery = Delivery::new(&webhook, "system.health", payload);
        self.deliver_once(&mut delivery).await;
        self.store_delivery(&delivery).await;
        Ok(delivery)
    }

    // Delivery history

    pub async fn delivery_history(&self, webhook_id: Uuid, limit: usize) -> Vec<Delivery> {
        let keys = self.state.keys_with_prefix(DELIVERY_PREFIX).await;
        let mut deliveries = Vec::new();
        for key in keys {
            if let Some(delivery) = self.state.get_json::<Delivery>(&key).await {
                if delivery.webhook_id == webhook_id {
                    deliveries.push(delivery);
                }
            }
        }
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deliveries.truncate(limit);
        deliveries
    }

    pub async fn delivery_stats(&self, webhook_id: Option<Uuid>, hours: i64) -> DeliveryStats {
        let cutoff = Utc::now() - ChronoDuration::hours(hours);
        let keys = self.state.keys_with_prefix(DELIVERY_PREFIX).await;

        let mut total = 0usize;
        let mut delivered = 0usize;
        let mut failed = 0usize;
        let mut retrying = 0usize;
        let mut duration_sum = 0.0;
        let mut duration_count = 0usize;

        for key in keys {
            let Some(delivery) = self.state.get_json::<Delivery>(&key).await else {
                continue;
            };
            if delivery.created_at < cutoff {
                continue;
            }
            if webhook_id.is_some_and(|id| delivery.webhook_id != id) {
                continue;
            }
            total += 1;
            match delivery.status {
                DeliveryStatus::Delivered => {
                    delivered += 1;
                    if let Some(ms) = delivery.duration_ms {
                        duration_sum += ms;
                        duration_count += 1;
                    }
                }
                DeliveryStatus::Failed => failed += 1,
                DeliveryStatus::Retrying => retrying += 1,
                DeliveryStatus::Pending => {}
            }
        }

        DeliveryStats {
            period_hours: hours,
            total_deliveries: total,
            delivered,
            failed,
            retrying,
            success_rate: if total > 0 {
                delivered as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            average_duration_ms: if duration_count > 0 {
                duration_sum / duration_count as f64
            } else {
                0.0
            },
        }
    }

    // Workers

    async fn delivery_worker(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker_id, "webhook delivery worker started");
        loop {
            let delivery = {
                let mut queue = self.queue_rx.lock().await;
                tokio::select! {
                    delivery = queue.recv() => delivery,
                    _ = shutdown.changed() => None,
                }
            };
            let Some(mut delivery) = delivery else {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            };

            self.deliver_once(&mut delivery).await;
            self.store_delivery(&delivery).await;
        }
        debug!(worker_id, "webhook delivery worker stopped");
    }

    /// One delivery attempt, updating the delivery and webhook records.
    async fn deliver_once(&self, delivery: &mut Delivery) {
        let Some(webhook) = self.get(delivery.webhook_id).await else {
            warn!(delivery_id = %delivery.id, "webhook gone, dropping delivery");
            delivery.status = DeliveryStatus::Failed;
            delivery.error = Some("webhook not found".to_string());
            return;
        };

        delivery.attempt_count += 1;
        let payload_json = delivery.payload.to_string();
        let signature = sign_payload(&payload_json, &webhook.secret);

        let mut request = self
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-ID", webhook.id.to_string())
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Timestamp", Utc::now().to_rfc3339())
            .header("X-Delivery-ID", delivery.id.to_string())
            .header("X-Attempt", delivery.attempt_count.to_string())
            .timeout(Duration::from_secs(webhook.timeout_seconds))
            .body(payload_json);
        for (name, value) in &webhook.headers {
            request = request.header(name, value);
        }

        let started = std::time::Instant::now();
        let outcome = request.send().await;
        let duration_ms = started.elapsed().as_millis() as f64;
        delivery.duration_ms = Some(duration_ms);

        match outcome {
            Ok(response) if response.status().is_success() => {
                delivery.status = DeliveryStatus::Delivered;
                delivery.delivered_at = Some(Utc::now());
                delivery.response_status = Some(response.status().as_u16());
                delivery.error = None;
                self.record_success(webhook.id).await;
                self.metrics
                    .webhook_delivery_total
                    .with_label_values(&["delivered"])
                    .inc();
                info!(
                    delivery_id = %delivery.id,
                    webhook = %webhook.name,
                    status = response.status().as_u16(),
                    duration_ms,
                    "webhook delivered"
                );
            }
            Ok(response) => {
                delivery.response_status = Some(response.status().as_u16());
                let body = response.text().await.unwrap_or_default();
                self.record_attempt_failure(
                    delivery,
                    &webhook,
                    &format!("HTTP {}: {}", delivery.response_status.unwrap_or(0), truncate(&body, 200)),
                )
                .await;
            }
            Err(err) => {
                delivery.response_status = None;
                self.record_attempt_failure(delivery, &webhook, &err.to_string()).await;
            }
        }
    }

    async fn record_success(&self, webhook_id: Uuid) {
        let snapshot = {
            let mut webhooks = self.webhooks.write().await;
            let Some(webhook) = webhooks.get_mut(&webhook_id) else {
                return;
            };
            webhook.success_count += 1;
            webhook.failure_count = 0;
            webhook.last_delivery_at = Some(Utc::now());
            webhook.clone()
        };
        self.save_webhook(&snapshot).await;
    }

    async fn record_attempt_failure(&self, delivery: &mut Delivery, webhook: &Webhook, error: &str) {
        delivery.error = Some(error.to_string());

        if delivery.attempt_count < delivery.max_attempts {
            let delay = webhook
                .retry_delay_seconds
                .saturating_mul(1u64 << (delivery.attempt_count - 1).min(16));
            delivery.status = DeliveryStatus::Retrying;
            delivery.scheduled_for = Utc::now() + ChronoDuration::seconds(delay as i64);
            self.metrics
                .webhook_delivery_total
                .with_label_values(&["retrying"])
                .inc();
            warn!(
                delivery_id = %delivery.id,
                webhook = %webhook.name,
                attempt = delivery.attempt_count,
                next_retry_in_secs = delay,
                error,
                "webhook delivery retry scheduled"
            );
            return;
        }

        delivery.status = DeliveryStatus::Failed;
        self.metrics
            .webhook_delivery_total
            .with_label_values(&["failed"])
            .inc();
        error!(
            delivery_id = %delivery.id,
            webhook = %webhook.name,
            attempts = delivery.attempt_count,
            error,
            "webhook delivery failed permanently"
        );

        let snapshot = {
            let mut webhooks = self.webhooks.write().await;
            let Some(stored) = webhooks.get_mut(&webhook.id) else {
                return;
            };
            stored.failure_count += 1;
            if stored.failure_count >= FAILURE_DISABLE_THRESHOLD {
                stored.status = WebhookStatus::Failed;
                warn!(webhook = %stored.name, "webhook disabled after repeated failures");
            }
            stored.clone()
        };
        self.save_webhook(&snapshot).await;
    }

    /// Every `retry_tick_seconds`, re-enqueue retrying deliveries whose
    /// schedule has come due.
    async fn retry_scheduler(&self, mut shutdown: watch::Receiver<bool>) {
        let tick = Duration::from_secs(self.config.retry_tick_seconds.max(1));
        debug!("webhook retry scheduler started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(tick) => {
                    let now = Utc::now();
                    let keys = self.state.keys_with_prefix(DELIVERY_PREFIX).await;
                    for key in keys {
                        let Some(delivery) = self.state.get_json::<Delivery>(&key).await else {
                            continue;
                        };
                        if delivery.status == DeliveryStatus::Retrying && delivery.scheduled_for <= now {
                            debug!(delivery_id = %delivery.id, "re-queueing delivery for retry");
                            let _ = self.queue_tx.send(delivery).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("webhook retry scheduler stopped");
    }

    // Persistence

    async fn save_webhook(&self, webhook: &Webhook) {
        let key = format!("{CONFIG_PREFIX}{}", webhook.id);
        if let Err(err) = self.state.set_json(&key, webhook, None).await {
            error!(webhook_id = %webhook.id, error = %err, "webhook save failed");
        }
    }

    async fn store_delivery(&self, delivery: &Delivery) {
        let key = format!("{DELIVERY_PREFIX}{}", delivery.id);
        let ttl = Duration::from_secs(self.config.delivery_retention_seconds);
        if let Err(err) = self.state.set_json(&key, delivery, Some(ttl)).await {
            error!(delivery_id = %delivery.id, error = %err, "delivery store failed");
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Arc<WebhookDispatcher> {
        Arc::new(WebhookDispatcher::new(
            Arc::new(StateStore::new()),
            Arc::new(MetricsService::new()),
            WebhooksConfig {
                worker_count: 2,
                retry_tick_seconds: 1,
                delivery_retention_seconds: 3600,
            },
        ))
    }

    fn register_request(url: &str, events: Vec<&str>) -> WebhookRegisterRequest {
        WebhookRegisterRequest {
            name: "hook".into(),
            url: url.into(),
            events: events.into_iter().map(String::from).collect(),
            secret: None,
            headers: None,
            retry_count: None,
            retry_delay_seconds: None,
            timeout_seconds: None,
        }
    }

    #[test]
    fn signature_round_trip() {
        let payload = r#"{"type":"task.completed","data":{"x":1}}"#;
        let secret = "s3cret";
        let signature = sign_payload(payload, secret);
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(payload, secret, &signature));
        assert!(!verify_signature(payload, "wrong", &signature));
        assert!(!verify_signature("tampered", secret, &signature));
    }

    #[tokio::test]
    async fn register_mints_secret_and_persists() {
        let dispatcher = dispatcher();
        let webhook = dispatcher
            .register(register_request("http://example.com/hook", vec!["task.completed"]))
            .await
            .unwrap();
        assert_eq!(webhook.secret.len(), 64);
        assert_eq!(webhook.status, WebhookStatus::Active);

        // Reload from the state store into a fresh dispatcher view.
        dispatcher.webhooks.write().await.clear();
        dispatcher.load_webhooks().await;
        assert!(dispatcher.get(webhook.id).await.is_some());
    }

    #[tokio::test]
    async fn trigger_matches_exact_and_wildcard() {
        let dispatcher = dispatcher();
        dispatcher
            .register(register_request("http://example.com/a", vec!["task.completed"]))
            .await
            .unwrap();
        dispatcher
            .register(register_request("http://example.com/b", vec!["*"]))
            .await
            .unwrap();
        dispatcher
            .register(register_request("http://example.com/c", vec!["task.failed"]))
            .await
            .unwrap();

        let queued = dispatcher
            .trigger_event("task.completed", json!({"task_id": "t1"}), None)
            .await;
        assert_eq!(queued, 2);
    }

    #[tokio::test]
    async fn paused_webhooks_do_not_deliver() {
        let dispatcher = dispatcher();
        let webhook = dispatcher
            .register(register_request("http://example.com/a", vec!["*"]))
            .await
            .unwrap();
        dispatcher
            .update(
                webhook.id,
                WebhookUpdateRequest {
                    status: Some(WebhookStatus::Paused),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let queued = dispatcher.trigger_event("task.completed", json!({}), None).await;
        assert_eq!(queued, 0);
    }

    #[tokio::test]
    async fn delivery_to_mock_server_succeeds_and_signs() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .match_header("x-webhook-signature", mockito::Matcher::Regex("^[0-9a-f]{64}$".into()))
            .match_header("x-attempt", "1")
            .with_status(200)
            .create_async()
            .await;

        let dispatcher = dispatcher();
        let webhook = dispatcher
            .register(register_request(&format!("{}/hook", server.url()), vec!["*"]))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = dispatcher.clone().start(shutdown_rx);

        dispatcher.trigger_event("task.completed", json!({"ok": true}), None).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let hook = dispatcher.get(webhook.id).await.unwrap();
                if hook.success_count == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("delivery should succeed");

        mock.assert_async().await;
        let hook = dispatcher.get(webhook.id).await.unwrap();
        assert_eq!(hook.failure_count, 0);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn failed_delivery_schedules_exponential_retry() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .expect_at_least(1)
            .create_async()
            .await;

        let dispatcher = dispatcher();
        let webhook = dispatcher
            .register(WebhookRegisterRequest {
                retry_delay_seconds: Some(60),
                ..register_request(&format!("{}/hook", server.url()), vec!["*"])
            })
            .await
            .unwrap();

        let payload = json!({"type": "task.failed", "data": {}});
        let mut delivery = Delivery::new(&dispatcher.get(webhook.id).await.unwrap(), "task.failed", payload);
        dispatcher.deliver_once(&mut delivery).await;

        assert_eq!(delivery.status, DeliveryStatus::Retrying);
        assert_eq!(delivery.attempt_count, 1);
        // First retry due ~60 s out (base * 2^0).
        let wait = (delivery.scheduled_for - Utc::now()).num_seconds();
        assert!((55..=60).contains(&wait), "unexpected retry delay {wait}");

        dispatcher.deliver_once(&mut delivery).await;
        assert_eq!(delivery.status, DeliveryStatus::Retrying);
        let wait = (delivery.scheduled_for - Utc::now()).num_seconds();
        assert!((115..=120).contains(&wait), "unexpected retry delay {wait}");

        // Third attempt exhausts the budget.
        dispatcher.deliver_once(&mut delivery).await;
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(dispatcher.get(webhook.id).await.unwrap().failure_count, 1);
    }

    #[tokio::test]
    async fn webhook_disables_after_failure_threshold() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect_at_least(1)
            .create_async()
            .await;

        let dispatcher = dispatcher();
        let webhook = dispatcher
            .register(WebhookRegisterRequest {
                retry_count: Some(1),
                ..register_request(&format!("{}/hook", server.url()), vec!["*"])
            })
            .await
            .unwrap();

        for _ in 0..FAILURE_DISABLE_THRESHOLD {
            let hook = dispatcher.get(webhook.id).await.unwrap();
            let mut delivery = Delivery::new(&hook, "task.failed", json!({}));
            dispatcher.deliver_once(&mut delivery).await;
            assert_eq!(delivery.status, DeliveryStatus::Failed);
        }

        let hook = dispatcher.get(webhook.id).await.unwrap();
        assert_eq!(hook.status, WebhookStatus::Failed);

        // Disabled webhooks receive no further deliveries.
        let queued = dispatcher.trigger_event("task.failed", json!({}), None).await;
        assert_eq!(queued, 0);
    }
}
