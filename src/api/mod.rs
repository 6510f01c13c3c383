//! HTTP/WebSocket surface.

pub mod agents;
pub mod error;
pub mod state;
pub mod system;
pub mod tasks;
pub mod webhooks;
pub mod ws;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use error::ApiError;
pub use state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Propagate or mint `X-Request-ID` and count the request.
async fn request_telemetry(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let method = request.method().to_string();
    let mut response = next.run(request).await;

    state
        .metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Token-window rate limiting keyed by API key, then forwarded client
/// address, then anonymous.
async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let identifier = request
        .headers()
        .get("x-api-key")
        .or_else(|| request.headers().get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let (allowed, remaining) = state
        .state_store
        .check_rate_limit(
            &identifier,
            state.config.rate_limit.requests,
            Duration::from_secs(state.config.rate_limit.window_seconds),
        )
        .await;

    if !allowed {
        return ApiError::too_many_requests(remaining).into_response();
    }

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        response.headers_mut().insert("x-ratelimit-remaining", value);
    }
    response
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/agents/spawn", post(agents::spawn))
        .route("/agents", get(agents::list))
        .route("/agents/{id}", get(agents::get))
        .route("/agents/{id}/status", axum::routing::patch(agents::update_status))
        .route("/agents/{id}/heartbeat", post(agents::heartbeat))
        .route("/agents/{id}/terminate", post(agents::terminate))
        .route("/agents/{id}/message", post(agents::message))
        .route("/tasks/submit", post(tasks::submit))
        .route("/tasks", get(tasks::list))
        .route("/tasks/queue/stats", get(tasks::queue_stats))
        .route("/tasks/{id}", get(tasks::get).patch(tasks::update))
        .route("/tasks/{id}/status", get(tasks::status))
        .route("/tasks/{id}/cancel", post(tasks::cancel))
        .route("/tasks/{id}/dependencies", post(tasks::add_dependency))
        .route("/webhooks", post(webhooks::register).get(webhooks::list))
        .route(
            "/webhooks/{id}",
            get(webhooks::get)
                .patch(webhooks::update)
                .delete(webhooks::delete),
        )
        .route("/webhooks/{id}/deliveries", get(webhooks::deliveries))
        .route("/webhooks/{id}/stats", get(webhooks::stats))
        .route("/webhooks/{id}/test", post(webhooks::test))
        .route("/audit", get(system::audit))
        .route("/events/stream", get(ws::events_stream))
        .route("/health", get(system::health))
        .route("/health/ready", get(system::ready))
        .route("/health/live", get(system::live))
        .route("/metrics", get(system::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(system::health))
        .route("/health/ready", get(system::ready))
        .route("/health/live", get(system::live))
        .route("/metrics", get(system::metrics))
        .fallback(|| async {
            (StatusCode::NOT_FOUND, "not found")
        })
        .layer(middleware::from_fn_with_state(state.clone(), request_telemetry))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the shutdown signal flips.
pub async fn serve(state: AppState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "http surface listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("http server error")?;
    Ok(())
}
