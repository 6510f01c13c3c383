//! Agent admission and lifecycle endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::domain::models::{Agent, AgentStatus, AgentType, EventEnvelope, EventType};
use crate::domain::ports::AgentFilters;
use crate::services::{AgentSpawnRequest, AgentSpawnResult};

#[derive(Debug, Deserialize)]
pub struct AgentListQuery {
    pub agent_type: Option<AgentType>,
    pub status: Option<AgentStatus>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateBody {
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub metrics: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct TerminateBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub content: Value,
    #[serde(default)]
    pub broadcast: bool,
}

pub async fn spawn(
    State(state): State<AppState>,
    Json(request): Json<AgentSpawnRequest>,
) -> Result<Json<AgentSpawnResult>, ApiError> {
    let result = state.agent_manager.spawn(request).await?;
    Ok(Json(result))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<AgentListQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 500);
    let filters = AgentFilters {
        agent_type: query.agent_type,
        status: query.status,
        limit: Some(page_size),
        offset: Some((page - 1) * page_size),
    };
    let agents = state.agent_manager.list(&filters).await?;
    Ok(Json(json!({
        "items": agents,
        "page": page,
        "page_size": page_size,
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .agent_manager
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Agent not found: {id}")))?;
    Ok(Json(agent))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusUpdateBody>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state.agent_manager.update_status(id, body.status).await?;
    Ok(Json(agent))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<Value>, ApiError> {
    state.agent_manager.record_heartbeat(id, body.metrics).await?;
    Ok(Json(json!({"acknowledged": true})))
}

pub async fn terminate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TerminateBody>,
) -> Result<Json<Value>, ApiError> {
    let reason = body.reason.unwrap_or_else(|| "normal".to_string());
    state.agent_manager.terminate(id, &reason).await?;
    Ok(Json(json!({"terminated": true, "reason": reason})))
}

/// Direct agent-to-agent communication: publishes `agent.message` keyed
/// by the recipient, or `agent.broadcast` keyed by the sender.
pub async fn message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MessageBody>,
) -> Result<Json<Value>, ApiError> {
    if state.agent_manager.get(id).await?.is_none() {
        return Err(ApiError::not_found(format!("Agent not found: {id}")));
    }

    let event_type = if body.broadcast {
        EventType::AgentBroadcast
    } else {
        EventType::AgentMessage
    };
    let envelope = EventEnvelope::new(
        event_type,
        id.to_string(),
        json!({"agent_id": id, "content": body.content, "broadcast": body.broadcast}),
    );
    let event_id = envelope.event_id;
    state
        .bus
        .publish_event(envelope)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({"event_id": event_id})))
}
