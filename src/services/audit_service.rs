//! Append-only audit trail over control-plane mutations.
//!
//! Writes are best-effort: an audit failure is logged, never propagated
//! into the operation it records.

use std::sync::Arc;
use tracing::warn;

use crate::domain::models::AuditEntry;
use crate::domain::ports::{AuditFilters, AuditRepository, DatabaseError};

pub struct AuditService {
    repo: Arc<dyn AuditRepository>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<String>,
        detail: Option<serde_json::Value>,
    ) {
        let mut entry = AuditEntry::new(actor, action, resource_type, resource_id);
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }
        if let Err(err) = self.repo.append(&entry).await {
            warn!(action, error = %err, "audit append failed");
        }
    }

    pub async fn query(&self, filters: &AuditFilters) -> Result<Vec<AuditEntry>, DatabaseError> {
        self.repo.query(filters).await
    }
}
