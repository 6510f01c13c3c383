//! Pluggable vector-search memory port.
//!
//! The real store (embeddings, cosine index) is an external collaborator;
//! the core writes entries after successful executions and reads context
//! for prompts, degrading to a no-op when the store is absent.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::error::ExecutionError;
use crate::domain::models::{MemoryEntry, MemoryKind};

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn store(&self, entry: MemoryEntry) -> Result<(), ExecutionError>;

    async fn search(
        &self,
        agent_id: Uuid,
        query: &str,
        kind: Option<MemoryKind>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, ExecutionError>;
}

/// No-op store used when memory is disabled or unavailable.
#[derive(Debug, Clone, Default)]
pub struct NullKnowledgeStore;

#[async_trait]
impl KnowledgeStore for NullKnowledgeStore {
    async fn store(&self, _entry: MemoryEntry) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn search(
        &self,
        _agent_id: Uuid,
        _query: &str,
        _kind: Option<MemoryKind>,
        _limit: usize,
    ) -> Result<Vec<MemoryEntry>, ExecutionError> {
        Ok(Vec::new())
    }
}
