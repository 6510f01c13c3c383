//! Webhook and delivery records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Consecutive permanent delivery failures before a webhook is disabled.
pub const FAILURE_DISABLE_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Active,
    Paused,
    Disabled,
    /// Automatically set after repeated delivery failures.
    Failed,
}

impl Default for WebhookStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "disabled" => Some(Self::Disabled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    /// Subscribed event type names; `"*"` subscribes to everything.
    pub events: Vec<String>,
    pub secret: String,
    pub status: WebhookStatus,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Maximum delivery attempts per event.
    pub retry_count: u32,
    /// Base retry delay; attempt n waits `retry_delay_seconds * 2^(n-1)`.
    pub retry_delay_seconds: u64,
    pub timeout_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<DateTime<Utc>>,
    /// Consecutive permanently-failed deliveries; reset on success.
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub success_count: u64,
}

impl Webhook {
    pub fn new(name: impl Into<String>, url: impl Into<String>, events: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            events,
            secret: String::new(),
            status: WebhookStatus::Active,
            headers: HashMap::new(),
            retry_count: 3,
            retry_delay_seconds: 60,
            timeout_seconds: 30,
            created_at: now,
            updated_at: now,
            last_delivery_at: None,
            failure_count: 0,
            success_count: 0,
        }
    }

    /// Exact event match, or a `"*"` subscription.
    pub fn matches(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == "*" || e == event_type)
    }

    pub fn is_deliverable(&self) -> bool {
        self.status == WebhookStatus::Active
    }
}

/// One attempt chain at delivering an event to a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    /// When the next attempt is due.
    pub scheduled_for: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl Delivery {
    pub fn new(webhook: &Webhook, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            webhook_id: webhook.id,
            event_type: event_type.into(),
            payload,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: webhook.retry_count,
            created_at: now,
            scheduled_for: now,
            delivered_at: None,
            response_status: None,
            error: None,
            duration_ms: None,
        }
    }
}
