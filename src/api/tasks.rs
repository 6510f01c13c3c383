//! Task admission, query and mutation endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::domain::models::{Task, TaskStatus};
use crate::domain::ports::TaskFilters;
use crate::services::{QueueStats, TaskStatusView, TaskSubmitRequest, TaskSubmitResult};

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<TaskStatus>,
    pub agent_id: Option<Uuid>,
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

/// Body of `PATCH /tasks/{id}`: completion, failure, progress or a
/// priority change.
#[derive(Debug, Deserialize)]
pub struct TaskUpdateBody {
    pub status: Option<TaskStatus>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub priority: Option<i8>,
}

#[derive(Debug, Deserialize)]
pub struct DependencyBody {
    pub depends_on_task_id: Uuid,
}

pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<TaskSubmitRequest>,
) -> Result<Json<TaskSubmitResult>, ApiError> {
    let result = state.scheduler.submit_task(request).await?;
    Ok(Json(result))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 500);
    let filters = TaskFilters {
        status: query.status,
        agent_id: query.agent_id,
        limit: Some(page_size),
        offset: Some((page - 1) * page_size),
    };
    let tasks = state.scheduler.list(&filters).await?;
    Ok(Json(json!({
        "items": tasks,
        "page": page,
        "page_size": page_size,
    })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let task = state
        .scheduler
        .get_task(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Task not found: {id}")))?;
    Ok(Json(task))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatusView>, ApiError> {
    let view = state
        .scheduler
        .get_status(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Task not found: {id}")))?;
    Ok(Json(view))
}

/// Route a status/progress update to the matching scheduler operation.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TaskUpdateBody>,
) -> Result<Json<Value>, ApiError> {
    if state.scheduler.get_task(id).await?.is_none() {
        return Err(ApiError::not_found(format!("Task not found: {id}")));
    }

    let updated = match body.status {
        Some(TaskStatus::Completed) => state.scheduler.complete_task(id, body.result).await?,
        Some(TaskStatus::Failed) => {
            let error = body.error.unwrap_or_else(|| "failed by client".to_string());
            state.scheduler.fail_task(id, &error, false).await?
        }
        Some(TaskStatus::InProgress) => state.scheduler.start_task(id).await?,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unsupported status update: {other}"
            )))
        }
        None => match (body.progress, body.priority) {
            (Some(progress), _) => {
                state
                    .scheduler
                    .report_progress(id, progress, body.message)
                    .await?
            }
            (None, Some(priority)) => {
                state.scheduler.update_task_priority(id, priority).await?
            }
            (None, None) => return Err(ApiError::bad_request("nothing to update")),
        },
    };

    Ok(Json(json!({"updated": updated})))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let cancelled = state.scheduler.cancel_task(id).await?;
    Ok(Json(json!({"cancelled": cancelled})))
}

pub async fn add_dependency(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DependencyBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .scheduler
        .add_dependency(id, body.depends_on_task_id)
        .await?;
    Ok(Json(json!({
        "task_id": id,
        "depends_on_task_id": body.depends_on_task_id,
    })))
}

pub async fn queue_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.scheduler.queue_stats())
}
