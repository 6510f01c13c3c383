//! Probes, metrics scrape and audit queries.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::domain::models::AuditEntry;
use crate::domain::ports::AuditFilters;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db_pool).await.is_ok();
    let status = if db_ok { "healthy" } else { "unhealthy" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": status,
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "components": [
            {"name": "database", "status": if db_ok { "healthy" } else { "unhealthy" }},
            {"name": "scheduler", "status": "healthy"},
            {"name": "event_bus", "status": "healthy"},
        ],
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
    });
    (code, Json(body))
}

pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db_pool).await.is_ok();
    if db_ok {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready"})),
        )
    }
}

pub async fn live() -> Json<Value> {
    Json(json!({"status": "alive"}))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    50
}

pub async fn audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 500);
    let filters = AuditFilters {
        actor: query.actor,
        action: query.action,
        resource_type: query.resource_type,
        resource_id: query.resource_id,
        limit: Some(page_size),
        offset: Some((page - 1) * page_size),
    };
    let entries = state
        .audit
        .query(&filters)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(entries))
}
