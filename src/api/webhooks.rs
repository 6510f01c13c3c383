//! Webhook administration endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::domain::models::{Delivery, Webhook, WebhookStatus};
use crate::services::{WebhookRegisterRequest, WebhookUpdateRequest};

#[derive(Debug, Deserialize)]
pub struct WebhookListQuery {
    pub status: Option<WebhookStatus>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<WebhookRegisterRequest>,
) -> Result<Json<Webhook>, ApiError> {
    let webhook = state.webhooks.register(request).await?;
    state
        .audit
        .record(
            "client",
            "webhook.create",
            "webhook",
            Some(webhook.id.to_string()),
            Some(json!({"url": webhook.url, "events": webhook.events})),
        )
        .await;
    Ok(Json(webhook))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<WebhookListQuery>,
) -> Json<Value> {
    let webhooks = state.webhooks.list(query.status).await;
    Json(json!({"items": webhooks}))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Webhook>, ApiError> {
    let webhook = state
        .webhooks
        .get(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Webhook not found: {id}")))?;
    Ok(Json(webhook))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<WebhookUpdateRequest>,
) -> Result<Json<Webhook>, ApiError> {
    let webhook = state.webhooks.update(id, request).await?;
    state
        .audit
        .record("client", "webhook.update", "webhook", Some(id.to_string()), None)
        .await;
    Ok(Json(webhook))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.webhooks.delete(id).await?;
    state
        .audit
        .record("client", "webhook.delete", "webhook", Some(id.to_string()), None)
        .await;
    Ok(Json(json!({"deleted": true})))
}

pub async fn deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
) -> Result<Json<Vec<Delivery>>, ApiError> {
    if state.webhooks.get(id).await.is_none() {
        return Err(ApiError::not_found(format!("Webhook not found: {id}")));
    }
    Ok(Json(state.webhooks.delivery_history(id, query.limit).await))
}

pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    if state.webhooks.get(id).await.is_none() {
        return Err(ApiError::not_found(format!("Webhook not found: {id}")));
    }
    let stats = state.webhooks.delivery_stats(Some(id), query.hours).await;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, ApiError> {
    let delivery = state.webhooks.test_webhook(id).await?;
    Ok(Json(delivery))
}
