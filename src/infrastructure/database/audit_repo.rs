//! SQLite implementation of `AuditRepository`.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::utils::parse_datetime;
use crate::domain::models::AuditEntry;
use crate::domain::ports::{AuditFilters, AuditRepository, DatabaseError};

pub struct AuditRepositoryImpl {
    pool: SqlitePool,
}

impl AuditRepositoryImpl {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry, DatabaseError> {
        Ok(AuditEntry {
            id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
            actor: row.get("actor"),
            action: row.get("action"),
            resource_type: row.get("resource_type"),
            resource_id: row.get("resource_id"),
            detail: row
                .get::<Option<String>, _>("detail")
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_datetime(row.get::<String, _>("created_at").as_str())?,
        })
    }
}

#[async_trait]
impl AuditRepository for AuditRepositoryImpl {
    async fn append(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO audit_entries (id, actor, action, resource_type, resource_id, detail, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id.as_deref())
        .bind(entry.detail.as_ref().map(|v| v.to_string()))
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, filters: &AuditFilters) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut sql = String::from("SELECT * FROM audit_entries WHERE 1=1");
        if filters.actor.is_some() {
            sql.push_str(" AND actor = ?");
        }
        if filters.action.is_some() {
            sql.push_str(" AND action = ?");
        }
        if filters.resource_type.is_some() {
            sql.push_str(" AND resource_type = ?");
        }
        if filters.resource_id.is_some() {
            sql.push_str(" AND resource_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(actor) = &filters.actor {
            query = query.bind(actor);
        }
        if let Some(action) = &filters.action {
            query = query.bind(action);
        }
        if let Some(resource_type) = &filters.resource_type {
            query = query.bind(resource_type);
        }
        if let Some(resource_id) = &filters.resource_id {
            query = query.bind(resource_id);
        }
        query = query
            .bind(filters.limit.map_or(100, |l| l as i64))
            .bind(filters.offset.unwrap_or(0) as i64);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_entry).collect()
    }
}
