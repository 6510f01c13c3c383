//! Persistence port for the append-only audit trail.

use async_trait::async_trait;

use super::errors::DatabaseError;
use crate::domain::models::AuditEntry;

#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), DatabaseError>;

    /// Newest first.
    async fn query(&self, filters: &AuditFilters) -> Result<Vec<AuditEntry>, DatabaseError>;
}
