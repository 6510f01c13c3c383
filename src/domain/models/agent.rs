//! Agent domain model.
//!
//! Agents are autonomous executors tracked by the control plane. The
//! orchestrator owns their lifecycle records; the worker runtime runs them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of work an agent performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Orchestrator,
    Worker,
    Research,
    Analysis,
    Specialist,
    Coordinator,
}

impl Default for AgentType {
    fn default() -> Self {
        Self::Worker
    }
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Worker => "worker",
            Self::Research => "research",
            Self::Analysis => "analysis",
            Self::Specialist => "specialist",
            Self::Coordinator => "coordinator",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "orchestrator" => Some(Self::Orchestrator),
            "worker" => Some(Self::Worker),
            "research" => Some(Self::Research),
            "analysis" => Some(Self::Analysis),
            "specialist" => Some(Self::Specialist),
            "coordinator" => Some(Self::Coordinator),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
    Offline,
    Failed,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Starting
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Offline => "offline",
            Self::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "starting" => Some(Self::Starting),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "stopping" => Some(Self::Stopping),
            "offline" => Some(Self::Offline),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Active agents count against the spawn limit and receive heartbeats.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Idle | Self::Busy)
    }

    /// Valid transitions out of this status.
    ///
    /// starting -> idle; idle <-> busy; any active -> stopping -> offline;
    /// any -> failed. Offline is terminal except for a restart through
    /// spawn. The heartbeat monitor and terminate force idle/busy agents
    /// straight to offline.
    pub fn valid_transitions(&self) -> &'static [AgentStatus] {
        match self {
            Self::Starting => &[Self::Idle, Self::Stopping, Self::Failed],
            Self::Idle => &[Self::Busy, Self::Stopping, Self::Offline, Self::Failed],
            Self::Busy => &[Self::Idle, Self::Stopping, Self::Offline, Self::Failed],
            Self::Stopping => &[Self::Offline, Self::Failed],
            Self::Offline => &[],
            Self::Failed => &[Self::Offline],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Skill tags and concurrency bounds advertised by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub skills: Vec<String>,
    pub max_concurrent_tasks: u32,
    #[serde(default)]
    pub supported_task_types: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            skills: Vec::new(),
            max_concurrent_tasks: 5,
            supported_task_types: Vec::new(),
            tools: Vec::new(),
        }
    }
}

impl AgentCapabilities {
    /// `max_concurrent_tasks` must stay within [1, 100].
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == 0 || self.max_concurrent_tasks > 100 {
            return Err(format!(
                "max_concurrent_tasks {} out of range 1..=100",
                self.max_concurrent_tasks
            ));
        }
        Ok(())
    }

    pub fn has_all_skills(&self, required: &[String]) -> bool {
        required.iter().all(|s| self.skills.contains(s))
    }
}

/// Model and runtime settings for an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
    pub memory_enabled: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_seconds: 300,
            retry_attempts: 3,
            memory_enabled: true,
        }
    }
}

/// A tracked agent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub agent_type: AgentType,
    pub status: AgentStatus,
    pub capabilities: AgentCapabilities,
    pub config: AgentConfig,
    /// Spawning agent, if any. Forms a tree; termination does not cascade.
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, agent_type: AgentType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agent_type,
            status: AgentStatus::Starting,
            capabilities: AgentCapabilities::default(),
            config: AgentConfig::default(),
            parent_id: None,
            created_at: now,
            updated_at: now,
            last_heartbeat_at: Some(now),
        }
    }

    /// Generated name used when a spawn request omits one.
    pub fn generate_name(agent_type: AgentType) -> String {
        format!(
            "{}-{}",
            agent_type.as_str(),
            &Uuid::new_v4().simple().to_string()[..8]
        )
    }

    /// Whether the last heartbeat is older than `timeout`.
    pub fn is_stale(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match self.last_heartbeat_at {
            Some(beat) => now - beat > timeout,
            None => true,
        }
    }

    /// Heartbeats are monotonically non-decreasing.
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        if self.last_heartbeat_at.is_none_or(|prev| at >= prev) {
            self.last_heartbeat_at = Some(at);
        }
        self.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        assert!(AgentStatus::Starting.can_transition_to(AgentStatus::Idle));
        assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Busy));
        assert!(AgentStatus::Busy.can_transition_to(AgentStatus::Idle));
        assert!(AgentStatus::Idle.can_transition_to(AgentStatus::Stopping));
        assert!(AgentStatus::Stopping.can_transition_to(AgentStatus::Offline));
        assert!(!AgentStatus::Starting.can_transition_to(AgentStatus::Busy));
        assert!(!AgentStatus::Offline.can_transition_to(AgentStatus::Idle));
    }

    #[test]
    fn stale_detection() {
        let mut agent = Agent::new("w1", AgentType::Worker);
        let now = Utc::now();
        agent.last_heartbeat_at = Some(now - Duration::seconds(120));
        assert!(agent.is_stale(Duration::seconds(90), now));
        agent.last_heartbeat_at = Some(now - Duration::seconds(30));
        assert!(!agent.is_stale(Duration::seconds(90), now));
    }

    #[test]
    fn heartbeat_is_monotonic() {
        let mut agent = Agent::new("w1", AgentType::Worker);
        let now = Utc::now();
        agent.record_heartbeat(now);
        agent.record_heartbeat(now - Duration::seconds(10));
        assert_eq!(agent.last_heartbeat_at, Some(now));
    }

    #[test]
    fn generated_name_has_type_prefix() {
        let name = Agent::generate_name(AgentType::Research);
        assert!(name.starts_with("research-"));
        assert_eq!(name.len(), "research-".len() + 8);
    }

    #[test]
    fn capabilities_bounds() {
        let mut caps = AgentCapabilities::default();
        assert!(caps.validate().is_ok());
        caps.max_concurrent_tasks = 0;
        assert!(caps.validate().is_err());
        caps.max_concurrent_tasks = 101;
        assert!(caps.validate().is_err());
    }

    #[test]
    fn skill_matching() {
        let caps = AgentCapabilities {
            skills: vec!["search".into(), "summarize".into()],
            ..Default::default()
        };
        assert!(caps.has_all_skills(&["search".into()]));
        assert!(!caps.has_all_skills(&["search".into(), "code".into()]));
    }
}
