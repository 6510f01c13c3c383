//! Topic-partitioned, keyed event log with consumer groups.
//!
//! Delivery is at least once: a consumer commits a partition offset only
//! after every registered handler finished without error. A record whose
//! handlers keep failing is redirected to `dead.letter` with its origin
//! attached once the failure budget is spent.
//!
//! Ordering holds within one partition only. All events for one key hash
//! to one partition, so callers that need mutual ordering share a key.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::error::EventBusError;
use crate::domain::models::{topics, EventEnvelope, EventType};

/// Acknowledgement returned once a record is durably appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

/// A record as stored in a partition log.
#[derive(Debug, Clone)]
pub struct Record {
    pub offset: u64,
    pub envelope: EventEnvelope,
    pub headers: HashMap<String, String>,
}

struct Partition {
    records: RwLock<Vec<Arc<Record>>>,
    appended: Notify,
}

impl Partition {
    fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }
}

struct Topic {
    partitions: Vec<Arc<Partition>>,
}

impl Topic {
    fn new(partition_count: usize) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| Arc::new(Partition::new())).collect(),
        }
    }
}

/// The broker: a durable append-only log per (topic, partition).
pub struct EventBus {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    partitions_per_topic: usize,
}

impl EventBus {
    pub fn new(partitions_per_topic: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            partitions_per_topic: partitions_per_topic.max(1),
        }
    }

    /// Pre-create the platform topics.
    pub async fn create_default_topics(&self) {
        for topic in topics::ALL {
            self.topic(topic).await;
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions_per_topic
    }

    /// Stable key -> partition routing.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partitions_per_topic
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        if let Some(topic) = self.topics.read().await.get(name) {
            return topic.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(self.partitions_per_topic)))
            .clone()
    }

    /// Append a record. The returned ack means the record is durable in
    /// the log; publishers must await it before treating the operation
    /// as observable.
    pub async fn publish(
        &self,
        topic_name: &str,
        key: &str,
        envelope: EventEnvelope,
        headers: HashMap<String, String>,
    ) -> Result<PublishAck, EventBusError> {
        let topic = self.topic(topic_name).await;
        let partition_idx = self.partition_for(key);
        let partition = &topic.partitions[partition_idx];

        let offset = {
            let mut records = partition.records.write().await;
            let offset = records.len() as u64;
            records.push(Arc::new(Record {
                offset,
                envelope,
                headers,
            }));
            offset
        };
        partition.appended.notify_waiters();

        debug!(topic = topic_name, partition = partition_idx, offset, "event published");
        Ok(PublishAck {
            topic: topic_name.to_string(),
            partition: partition_idx,
            offset,
        })
    }

    /// Publish to the topic implied by the envelope's event type, keyed by
    /// the envelope key.
    pub async fn publish_event(&self, envelope: EventEnvelope) -> Result<PublishAck, EventBusError> {
        let topic = envelope.topic();
        let key = envelope.key.clone();
        self.publish(topic, &key, envelope, HashMap::new()).await
    }

    /// Read up to `max` records at or after `from_offset`.
    pub async fn fetch(
        &self,
        topic_name: &str,
        partition: usize,
        from_offset: u64,
        max: usize,
    ) -> Result<Vec<Arc<Record>>, EventBusError> {
        let topic = self.topic(topic_name).await;
        let partition = topic
            .partitions
            .get(partition)
            .ok_or_else(|| EventBusError::UnknownTopic(format!("{topic_name}/{partition}")))?;
        let records = partition.records.read().await;
        let start = from_offset as usize;
        Ok(records.iter().skip(start).take(max).cloned().collect())
    }

    /// Log length of one partition.
    pub async fn high_watermark(&self, topic_name: &str, partition: usize) -> u64 {
        let topic = self.topic(topic_name).await;
        match topic.partitions.get(partition) {
            Some(p) => p.records.read().await.len() as u64,
            None => 0,
        }
    }

    async fn wait_for_append(&self, topic_name: &str, partition: usize, timeout: Duration) {
        let topic = self.topic(topic_name).await;
        if let Some(partition) = topic.partitions.get(partition) {
            let _ = tokio::time::timeout(timeout, partition.appended.notified()).await;
        }
    }
}

/// Handler invoked for matching event types. Implementations must be
/// idempotent: at-least-once delivery re-invokes them on redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: EventEnvelope) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: EventEnvelope) -> anyhow::Result<()> {
        (self.func)(event).await
    }
}

/// Consumer-group settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub max_poll_records: usize,
    pub max_handler_failures: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "corral-orchestrator".to_string(),
            max_poll_records: 50,
            max_handler_failures: 3,
        }
    }
}

/// One consumer group over a set of topics. Each partition is driven by
/// its own loop so per-partition FIFO is preserved.
pub struct EventConsumer {
    bus: Arc<EventBus>,
    config: ConsumerConfig,
    subscribed: Vec<String>,
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    offsets: RwLock<HashMap<(String, usize), u64>>,
}

impl EventConsumer {
    pub fn new(bus: Arc<EventBus>, config: ConsumerConfig, subscribed: Vec<String>) -> Self {
        Self {
            bus,
            config,
            subscribed,
            handlers: RwLock::new(HashMap::new()),
            offsets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    pub async fn committed_offset(&self, topic: &str, partition: usize) -> u64 {
        self.offsets
            .read()
            .await
            .get(&(topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    async fn commit(&self, topic: &str, partition: usize, next_offset: u64) {
        self.offsets
            .write()
            .await
            .insert((topic.to_string(), partition), next_offset);
    }

    /// Spawn one polling loop per subscribed (topic, partition). Returns
    /// the join handles; they exit when `shutdown` flips to true.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        for topic in self.subscribed.clone() {
            for partition in 0..self.bus.partition_count() {
                let consumer = Arc::clone(&self);
                let topic = topic.clone();
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move {
                    consumer.partition_loop(topic, partition, shutdown).await;
                }));
            }
        }
        handles
    }

    async fn partition_loop(&self, topic: String, partition: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(group = %self.config.group_id, topic = %topic, partition, "partition loop started");
        let mut failures_at_head: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let offset = self.committed_offset(&topic, partition).await;
            let batch = match self
                .bus
                .fetch(&topic, partition, offset, self.config.max_poll_records)
                .await
            {
                Ok(batch) => batch,
                Err(err) => {
                    error!(topic = %topic, partition, error = %err, "fetch failed");
                    break;
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    () = self.bus.wait_for_append(&topic, partition, Duration::from_millis(200)) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            for record in batch {
                match self.dispatch(&record).await {
                    Ok(()) => {
                        failures_at_head = 0;
                        self.commit(&topic, partition, record.offset + 1).await;
                    }
                    Err(err) => {
                        failures_at_head += 1;
                        warn!(
                            topic = %topic,
                            partition,
                            offset = record.offset,
                            attempt = failures_at_head,
                            error = %err,
                            "handler failed"
                        );
                        if failures_at_head >= self.config.max_handler_failures {
                            self.dead_letter(&topic, &record, &err.to_string()).await;
                            failures_at_head = 0;
                            self.commit(&topic, partition, record.offset + 1).await;
                        }
                        // Re-poll from the uncommitted offset.
                        break;
                    }
                }
            }
        }
        debug!(group = %self.config.group_id, topic = %topic, partition, "partition loop stopped");
    }

    async fn dispatch(&self, record: &Record) -> anyhow::Result<()> {
        let handlers = {
            let map = self.handlers.read().await;
            map.get(&record.envelope.event_type).cloned().unwrap_or_default()
        };
        if handlers.is_empty() {
            return Ok(());
        }
        for handler in handlers {
            handler.handle(record.envelope.clone()).await.map_err(|err| {
                anyhow::anyhow!("{}: {err}", handler.name())
            })?;
        }
        Ok(())
    }

    /// Redirect a poisoned record to `dead.letter`, original coordinates
    /// attached as headers.
    async fn dead_letter(&self, topic: &str, record: &Record, reason: &str) {
        info!(
            topic = %topic,
            offset = record.offset,
            event = %record.envelope.event_type,
            "redirecting record to dead letter"
        );
        let mut headers = record.headers.clone();
        headers.insert("original-topic".to_string(), topic.to_string());
        headers.insert("original-offset".to_string(), record.offset.to_string());
        headers.insert("error".to_string(), reason.to_string());

        if let Err(err) = self
            .bus
            .publish(
                topics::DEAD_LETTER,
                &record.envelope.key,
                record.envelope.clone(),
                headers,
            )
            .await
        {
            error!(error = %err, "dead letter publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn envelope(event_type: EventType, key: &str) -> EventEnvelope {
        EventEnvelope::new(event_type, key, json!({"n": 1}))
    }

    #[tokio::test]
    async fn same_key_routes_to_same_partition() {
        let bus = EventBus::new(16);
        let p1 = bus.partition_for("agent-42");
        let p2 = bus.partition_for("agent-42");
        assert_eq!(p1, p2);
    }

    #[tokio::test]
    async fn publish_assigns_sequential_offsets_per_partition() {
        let bus = EventBus::new(4);
        let key = "task-1";
        let a1 = bus.publish_event(envelope(EventType::TaskStarted, key)).await.unwrap();
        let a2 = bus.publish_event(envelope(EventType::TaskProgress, key)).await.unwrap();
        assert_eq!(a1.partition, a2.partition);
        assert_eq!(a1.offset, 0);
        assert_eq!(a2.offset, 1);
    }

    #[tokio::test]
    async fn consumer_dispatches_and_commits() {
        let bus = Arc::new(EventBus::new(2));
        let consumer = Arc::new(EventConsumer::new(
            bus.clone(),
            ConsumerConfig::default(),
            vec![topics::AGENT_TASKS.to_string()],
        ));

        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_handler = seen.clone();
        consumer
            .register_handler(
                EventType::TaskStarted,
                Arc::new(FnHandler::new("count", move |_event| {
                    let seen = seen_in_handler.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
            )
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = consumer.clone().start(shutdown_rx);

        bus.publish_event(envelope(EventType::TaskStarted, "task-1")).await.unwrap();
        bus.publish_event(envelope(EventType::TaskStarted, "task-2")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("handlers should run for both records");

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn failing_handler_sends_record_to_dead_letter() {
        let bus = Arc::new(EventBus::new(1));
        let consumer = Arc::new(EventConsumer::new(
            bus.clone(),
            ConsumerConfig {
                max_handler_failures: 3,
                ..Default::default()
            },
            vec![topics::AGENT_TASKS.to_string()],
        ));

        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_in_handler = attempts.clone();
        consumer
            .register_handler(
                EventType::TaskFailed,
                Arc::new(FnHandler::new("poison", move |_event| {
                    let attempts = attempts_in_handler.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        anyhow::bail!("handler always fails")
                    }
                })),
            )
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = consumer.clone().start(shutdown_rx);

        bus.publish_event(envelope(EventType::TaskFailed, "task-x")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.high_watermark(topics::DEAD_LETTER, bus.partition_for("task-x")).await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("record should reach dead.letter");

        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let partition = bus.partition_for("task-x");
        let dead = bus.fetch(topics::DEAD_LETTER, partition, 0, 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(
            dead[0].headers.get("original-topic").map(String::as_str),
            Some(topics::AGENT_TASKS)
        );

        // The offset was committed past the poisoned record.
        assert_eq!(consumer.committed_offset(topics::AGENT_TASKS, partition).await, 1);

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn per_partition_order_is_fifo() {
        let bus = Arc::new(EventBus::new(4));
        let consumer = Arc::new(EventConsumer::new(
            bus.clone(),
            ConsumerConfig::default(),
            vec![topics::AGENT_TASKS.to_string()],
        ));

        let order = Arc::new(RwLock::new(Vec::new()));
        let order_in_handler = order.clone();
        consumer
            .register_handler(
                EventType::TaskProgress,
                Arc::new(FnHandler::new("order", move |event: EventEnvelope| {
                    let order = order_in_handler.clone();
                    async move {
                        order.write().await.push(event.payload["n"].as_u64().unwrap());
                        Ok(())
                    }
                })),
            )
            .await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = consumer.clone().start(shutdown_rx);

        for n in 0..20u64 {
            let env = EventEnvelope::new(EventType::TaskProgress, "task-ordered", json!({"n": n}));
            bus.publish_event(env).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while order.read().await.len() < 20 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all records should be consumed");

        let seen = order.read().await.clone();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
