//! Event envelope and topic routing.
//!
//! Every cross-component fact travels as a self-describing envelope on a
//! keyed, partitioned topic. Key selection pins related events to one
//! partition so a single consumer observes them in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic names used by the control plane.
pub mod topics {
    pub const AGENT_LIFECYCLE: &str = "agent.lifecycle";
    pub const AGENT_TASKS: &str = "agent.tasks";
    pub const AGENT_COMMUNICATION: &str = "agent.communication";
    pub const AGENT_STATE: &str = "agent.state";
    pub const SYSTEM_EVENTS: &str = "system.events";
    pub const DEAD_LETTER: &str = "dead.letter";

    /// All topics the orchestrator pre-creates at startup.
    pub const ALL: &[&str] = &[
        AGENT_LIFECYCLE,
        AGENT_TASKS,
        AGENT_COMMUNICATION,
        AGENT_STATE,
        SYSTEM_EVENTS,
        DEAD_LETTER,
    ];
}

/// Every event type the platform emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Agent lifecycle
    #[serde(rename = "agent.spawned")]
    AgentSpawned,
    #[serde(rename = "agent.started")]
    AgentStarted,
    #[serde(rename = "agent.stopped")]
    AgentStopped,
    #[serde(rename = "agent.failed")]
    AgentFailed,
    #[serde(rename = "agent.heartbeat")]
    AgentHeartbeat,

    // Task pipeline
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.assigned")]
    TaskAssigned,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.progress")]
    TaskProgress,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "task.failed")]
    TaskFailed,
    #[serde(rename = "task.cancelled")]
    TaskCancelled,

    // Agent communication
    #[serde(rename = "agent.message")]
    AgentMessage,
    #[serde(rename = "agent.request")]
    AgentRequest,
    #[serde(rename = "agent.response")]
    AgentResponse,
    #[serde(rename = "agent.broadcast")]
    AgentBroadcast,

    // Shared state
    #[serde(rename = "state.updated")]
    StateUpdated,
    #[serde(rename = "state.synced")]
    StateSynced,

    // System
    #[serde(rename = "system.alert")]
    SystemAlert,
    #[serde(rename = "system.health")]
    SystemHealth,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentSpawned => "agent.spawned",
            Self::AgentStarted => "agent.started",
            Self::AgentStopped => "agent.stopped",
            Self::AgentFailed => "agent.failed",
            Self::AgentHeartbeat => "agent.heartbeat",
            Self::TaskCreated => "task.created",
            Self::TaskAssigned => "task.assigned",
            Self::TaskStarted => "task.started",
            Self::TaskProgress => "task.progress",
            Self::TaskCompleted => "task.completed",
            Self::TaskFailed => "task.failed",
            Self::TaskCancelled => "task.cancelled",
            Self::AgentMessage => "agent.message",
            Self::AgentRequest => "agent.request",
            Self::AgentResponse => "agent.response",
            Self::AgentBroadcast => "agent.broadcast",
            Self::StateUpdated => "state.updated",
            Self::StateSynced => "state.synced",
            Self::SystemAlert => "system.alert",
            Self::SystemHealth => "system.health",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "agent.spawned" => Some(Self::AgentSpawned),
            "agent.started" => Some(Self::AgentStarted),
            "agent.stopped" => Some(Self::AgentStopped),
            "agent.failed" => Some(Self::AgentFailed),
            "agent.heartbeat" => Some(Self::AgentHeartbeat),
            "task.created" => Some(Self::TaskCreated),
            "task.assigned" => Some(Self::TaskAssigned),
            "task.started" => Some(Self::TaskStarted),
            "task.progress" => Some(Self::TaskProgress),
            "task.completed" => Some(Self::TaskCompleted),
            "task.failed" => Some(Self::TaskFailed),
            "task.cancelled" => Some(Self::TaskCancelled),
            "agent.message" => Some(Self::AgentMessage),
            "agent.request" => Some(Self::AgentRequest),
            "agent.response" => Some(Self::AgentResponse),
            "agent.broadcast" => Some(Self::AgentBroadcast),
            "state.updated" => Some(Self::StateUpdated),
            "state.synced" => Some(Self::StateSynced),
            "system.alert" => Some(Self::SystemAlert),
            "system.health" => Some(Self::SystemHealth),
            _ => None,
        }
    }

    /// The topic this event type is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::AgentSpawned
            | Self::AgentStarted
            | Self::AgentStopped
            | Self::AgentFailed
            | Self::AgentHeartbeat => topics::AGENT_LIFECYCLE,
            Self::TaskCreated
            | Self::TaskAssigned
            | Self::TaskStarted
            | Self::TaskProgress
            | Self::TaskCompleted
            | Self::TaskFailed
            | Self::TaskCancelled => topics::AGENT_TASKS,
            Self::AgentMessage
            | Self::AgentRequest
            | Self::AgentResponse
            | Self::AgentBroadcast => topics::AGENT_COMMUNICATION,
            Self::StateUpdated | Self::StateSynced => topics::AGENT_STATE,
            Self::SystemAlert | Self::SystemHealth => topics::SYSTEM_EVENTS,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Self-describing event record.
///
/// The key governs partition routing: agent-id for lifecycle and
/// communication, task-id for task state transitions, service-id for
/// system events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub key: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            trace_id: None,
            key: key.into(),
            payload,
        }
    }

    pub fn with_trace(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Topic derived from the event type.
    pub fn topic(&self) -> &'static str {
        self.event_type.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_types_route_to_their_topics() {
        assert_eq!(EventType::AgentSpawned.topic(), topics::AGENT_LIFECYCLE);
        assert_eq!(EventType::TaskAssigned.topic(), topics::AGENT_TASKS);
        assert_eq!(EventType::AgentBroadcast.topic(), topics::AGENT_COMMUNICATION);
        assert_eq!(EventType::StateSynced.topic(), topics::AGENT_STATE);
        assert_eq!(EventType::SystemAlert.topic(), topics::SYSTEM_EVENTS);
    }

    #[test]
    fn event_type_string_round_trip() {
        for s in [
            "agent.spawned",
            "agent.heartbeat",
            "task.assigned",
            "task.completed",
            "agent.broadcast",
            "system.health",
        ] {
            assert_eq!(EventType::parse_str(s).unwrap().as_str(), s);
        }
        assert!(EventType::parse_str("no.such.event").is_none());
    }

    #[test]
    fn envelope_serializes_event_type_as_dotted_name() {
        let envelope = EventEnvelope::new(
            EventType::TaskCompleted,
            "task-1",
            json!({"result": "done"}),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event_type"], "task.completed");
        assert_eq!(value["key"], "task-1");
    }
}
