//! Memory entries exchanged with the external knowledge store.
//!
//! The store itself is a pluggable collaborator; only the entry shape and
//! the port contract live in the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Conversation,
    Knowledge,
    Context,
    ShortTerm,
    MidTerm,
    LongTerm,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Knowledge => "knowledge",
            Self::Context => "context",
            Self::ShortTerm => "short_term",
            Self::MidTerm => "mid_term",
            Self::LongTerm => "long_term",
        }
    }
}

/// Fixed embedding dimension expected by the vector column downstream.
pub const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub kind: MemoryKind,
    pub content: String,
    /// Optional fixed-dimension embedding vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryEntry {
    pub fn new(agent_id: Uuid, kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            kind,
            content: content.into(),
            embedding: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            expires_at: None,
        }
    }
}
