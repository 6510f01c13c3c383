//! Domain error types for the corral control plane.
//!
//! Each enum covers one component's failure modes. `ErrorCode` is the
//! wire-level taxonomy that API responses and alerts carry.

use thiserror::Error;
use uuid::Uuid;

use super::models::{AgentStatus, TaskStatus};

/// Wire-level error taxonomy carried in API error bodies and system alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation,
    NotFound,
    InvalidState,
    InvalidTransition,
    CyclicDependency,
    CapacityExceeded,
    Timeout,
    DependencyUnavailable,
    UpstreamFailure,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::CyclicDependency => "CYCLIC_DEPENDENCY",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::Timeout => "TIMEOUT",
            Self::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            Self::UpstreamFailure => "UPSTREAM_FAILURE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from task submission, scheduling and state transitions.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Task queue full ({0} tasks)")]
    QueueFull(usize),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task {task} is {status}: operation not allowed")]
    InvalidState { task: Uuid, status: TaskStatus },

    #[error("Dependency would create a cycle: {task} -> {depends_on}")]
    CyclicDependency { task: Uuid, depends_on: Uuid },

    #[error("Task cannot depend on itself: {0}")]
    SelfDependency(Uuid),

    #[error("Could not acquire lock {0}")]
    LockUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) | Self::SelfDependency(_) => ErrorCode::Validation,
            Self::QueueFull(_) => ErrorCode::CapacityExceeded,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::CyclicDependency { .. } => ErrorCode::CyclicDependency,
            Self::LockUnavailable(_) => ErrorCode::DependencyUnavailable,
            Self::Storage(_) => ErrorCode::Internal,
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockUnavailable(_) | Self::Storage(_))
    }
}

/// Errors from agent lifecycle operations.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid agent: {0}")]
    Validation(String),

    #[error("Maximum agent limit ({0}) reached")]
    CapacityExceeded(usize),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: AgentStatus,
        to: AgentStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AgentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::Validation,
            Self::CapacityExceeded(_) => ErrorCode::CapacityExceeded,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::Storage(_) => ErrorCode::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Errors from the event bus.
#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Bus is shut down")]
    Closed,
}

impl EventBusError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::DependencyUnavailable
    }
}

/// Errors from the state store.
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Lock {0} is held by another owner")]
    LockHeld(String),
}

/// Errors from webhook management and delivery.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhook not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid webhook: {0}")]
    Validation(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

impl WebhookError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Delivery(_) => ErrorCode::UpstreamFailure,
        }
    }
}

/// Errors raised while executing a task inside the worker runtime.
///
/// The recoverable/non-recoverable split drives the scheduler's retry
/// decision: recoverable failures re-enter the queue, the rest fail hard.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Execution timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("Execution cancelled")]
    Cancelled,
}

impl ExecutionError {
    /// Recoverable errors are retried through the scheduler's retry policy.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_) | Self::RateLimited | Self::Timeout(_)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Upstream(_) | Self::RateLimited => ErrorCode::UpstreamFailure,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Validation(_) | Self::Unsupported(_) => ErrorCode::Validation,
            Self::Cancelled => ErrorCode::InvalidState,
        }
    }
}
