//! Hot key/value state with TTL, counters, rate windows, pub/sub and the
//! two coordination primitives the orchestrator depends on: ownership-token
//! locks and set-if-not-exists leader election.
//!
//! Keys follow the platform conventions: `agent:state:{id}`,
//! `task:state:{id}`, `lock:{name}`, `counter:{name}`, `ratelimit:{id}`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::error::StateStoreError;

/// Default lock TTL.
pub const LOCK_TTL: Duration = Duration::from_secs(30);

const PREFIX_LOCK: &str = "lock:";
const PREFIX_COUNTER: &str = "counter:";
const CHANNEL_CAPACITY: usize = 256;
const LOCK_SPIN_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    /// Ownership token for lock keys; release requires a matching token.
    owner: Option<Uuid>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A held distributed lock. Dropping it does NOT release the key; callers
/// release explicitly so a lost lease can expire on its own.
#[derive(Debug, Clone)]
pub struct StateLock {
    pub name: String,
    token: Uuid,
}

/// In-process state store with the hot-state contract of the platform.
#[derive(Clone)]
pub struct StateStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // Key/value

    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    pub async fn set(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) {
        let entry = Entry {
            value: value.into(),
            expires_at: ttl.map(|d| Instant::now() + d),
            owner: None,
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    /// Set only if the key is absent (or expired). Returns whether the
    /// write happened.
    pub async fn set_nx(&self, key: &str, value: impl Into<String>, ttl: Option<Duration>) -> bool {
        self.set_nx_owned(key, value, ttl, None).await
    }

    async fn set_nx_owned(
        &self,
        key: &str,
        value: impl Into<String>,
        ttl: Option<Duration>,
        owner: Option<Uuid>,
    ) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let occupied = entries.get(key).is_some_and(|e| !e.is_expired(now));
        if occupied {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: ttl.map(|d| now + d),
                owner,
            },
        );
        true
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Refresh a key's TTL. Returns false when the key is missing/expired.
    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StateStoreError> {
        let data =
            serde_json::to_string(value).map_err(|e| StateStoreError::Serialization(e.to_string()))?;
        self.set(key, data, ttl).await;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).ok()
    }

    // Counters

    /// Atomic increment; creates the counter at zero first. A TTL is only
    /// applied when the counter is created by this call.
    pub async fn incr_by(&self, name: &str, amount: i64, ttl: Option<Duration>) -> i64 {
        let key = format!("{PREFIX_COUNTER}{name}");
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&key) {
            if !entry.is_expired(now) {
                let current: i64 = entry.value.parse().unwrap_or(0);
                let next = current + amount;
                entry.value = next.to_string();
                return next;
            }
        }
        entries.insert(
            key,
            Entry {
                value: amount.to_string(),
                expires_at: ttl.map(|d| now + d),
                owner: None,
            },
        );
        amount
    }

    pub async fn get_counter(&self, name: &str) -> i64 {
        self.get(&format!("{PREFIX_COUNTER}{name}"))
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    // Rate limiting

    /// Token-window rate limiting. Returns `(allowed, remaining)`.
    pub async fn check_rate_limit(
        &self,
        identifier: &str,
        limit: u32,
        window: Duration,
    ) -> (bool, u32) {
        let current = self
            .incr_by(&format!("ratelimit:{identifier}"), 1, Some(window))
            .await;
        let current = u32::try_from(current.max(0)).unwrap_or(u32::MAX);
        let remaining = limit.saturating_sub(current);
        (current <= limit, remaining)
    }

    // Distributed locks

    /// Acquire `lock:{name}`, waiting up to `block_timeout`. Returns the
    /// lock handle carrying the ownership token, or None on timeout.
    pub async fn acquire_lock(
        &self,
        name: &str,
        ttl: Duration,
        block_timeout: Duration,
    ) -> Option<StateLock> {
        let key = format!("{PREFIX_LOCK}{name}");
        let token = Uuid::new_v4();
        let deadline = Instant::now() + block_timeout;

        loop {
            if self
                .set_nx_owned(&key, token.to_string(), Some(ttl), Some(token))
                .await
            {
                return Some(StateLock {
                    name: name.to_string(),
                    token,
                });
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(LOCK_SPIN_INTERVAL).await;
        }
    }

    /// Release a held lock. A lock whose lease already expired and was
    /// re-acquired by another owner is left untouched.
    pub async fn release_lock(&self, lock: &StateLock) -> bool {
        let key = format!("{PREFIX_LOCK}{}", lock.name);
        let mut entries = self.entries.write().await;
        let owned = entries
            .get(&key)
            .is_some_and(|entry| entry.owner == Some(lock.token));
        if owned {
            entries.remove(&key);
        }
        owned
    }

    // Leader election

    /// Set-if-not-exists leadership claim for a service instance.
    pub async fn try_become_leader(&self, service_id: &str, ttl: Duration) -> bool {
        let key = format!("{PREFIX_LOCK}leader:{service_id}");
        self.set_nx(&key, format!("{service_id}:{}", Uuid::new_v4()), Some(ttl))
            .await
    }

    pub async fn renew_leadership(&self, service_id: &str, ttl: Duration) -> bool {
        self.expire(&format!("{PREFIX_LOCK}leader:{service_id}"), ttl)
            .await
    }

    pub async fn resign_leadership(&self, service_id: &str) -> bool {
        self.delete(&format!("{PREFIX_LOCK}leader:{service_id}")).await
    }

    pub async fn current_leader(&self, service_id: &str) -> Option<String> {
        self.get(&format!("{PREFIX_LOCK}leader:{service_id}")).await
    }

    // Pub/sub

    pub async fn publish(&self, channel: &str, message: serde_json::Value) -> usize {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            Some(sender) => sender.send(message).map_or(0, |n| n),
            None => 0,
        }
    }

    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop expired entries. Run periodically; reads also skip expired keys.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = StateStore::new();
        store.set("agent:state:1", "busy", None).await;
        assert_eq!(store.get("agent:state:1").await.as_deref(), Some("busy"));
        assert!(store.delete("agent:state:1").await);
        assert!(store.get("agent:state:1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry() {
        let store = StateStore::new();
        store
            .set("session:x", "data", Some(Duration::from_secs(10)))
            .await;
        assert!(store.get("session:x").await.is_some());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get("session:x").await.is_none());
        assert_eq!(store.sweep_expired().await, 1);
    }

    #[tokio::test]
    async fn counters_accumulate() {
        let store = StateStore::new();
        assert_eq!(store.incr_by("tasks", 1, None).await, 1);
        assert_eq!(store.incr_by("tasks", 4, None).await, 5);
        assert_eq!(store.get_counter("tasks").await, 5);
    }

    #[tokio::test]
    async fn rate_limit_window() {
        let store = StateStore::new();
        let window = Duration::from_secs(60);
        for expected_remaining in [2u32, 1, 0] {
            let (allowed, remaining) = store.check_rate_limit("client-a", 3, window).await;
            assert!(allowed);
            assert_eq!(remaining, expected_remaining);
        }
        let (allowed, remaining) = store.check_rate_limit("client-a", 3, window).await;
        assert!(!allowed);
        assert_eq!(remaining, 0);

        // Other identifiers are unaffected.
        let (allowed, _) = store.check_rate_limit("client-b", 3, window).await;
        assert!(allowed);
    }

    #[tokio::test]
    async fn lock_is_exclusive_and_owner_checked() {
        let store = StateStore::new();
        let lock = store
            .acquire_lock("task:1", LOCK_TTL, Duration::from_millis(10))
            .await
            .expect("first acquire should succeed");

        assert!(store
            .acquire_lock("task:1", LOCK_TTL, Duration::from_millis(10))
            .await
            .is_none());

        // A forged handle cannot release another owner's lock.
        let forged = StateLock {
            name: "task:1".to_string(),
            token: Uuid::new_v4(),
        };
        assert!(!store.release_lock(&forged).await);

        assert!(store.release_lock(&lock).await);
        assert!(store
            .acquire_lock("task:1", LOCK_TTL, Duration::from_millis(10))
            .await
            .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_reacquired() {
        let store = StateStore::new();
        let _lost = store
            .acquire_lock("task:2", Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store
            .acquire_lock("task:2", LOCK_TTL, Duration::from_millis(10))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn single_leader_per_service() {
        let store = StateStore::new();
        assert!(store.try_become_leader("orchestrator", LOCK_TTL).await);
        assert!(!store.try_become_leader("orchestrator", LOCK_TTL).await);
        assert!(store.renew_leadership("orchestrator", LOCK_TTL).await);
        assert!(store.resign_leadership("orchestrator").await);
        assert!(store.try_become_leader("orchestrator", LOCK_TTL).await);
    }

    #[tokio::test]
    async fn pubsub_delivers_to_subscribers() {
        let store = StateStore::new();
        let mut rx = store.subscribe("task.events").await;
        let delivered = store
            .publish("task.events", serde_json::json!({"event": "task.started"}))
            .await;
        assert_eq!(delivered, 1);
        let message = rx.recv().await.unwrap();
        assert_eq!(message["event"], "task.started");
    }
}
