//! HTTP surface tests via in-process router calls.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::test_config;
use corral::api::{build_router, AppState};
use corral::domain::ports::{EchoLanguageModel, NullKnowledgeStore};
use corral::Orchestrator;

async fn router() -> (Orchestrator, Router) {
    let orchestrator = Orchestrator::build_with(
        test_config(),
        std::sync::Arc::new(EchoLanguageModel),
        std::sync::Arc::new(NullKnowledgeStore),
    )
    .await
    .unwrap();
    let router = build_router(AppState::from_orchestrator(&orchestrator));
    (orchestrator, router)
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", "test-client");
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::empty()).unwrap()
        }
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_probes_respond() {
    let (_orchestrator, router) = router().await;

    let (status, body) = send_json(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send_json(&router, "GET", "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&router, "GET", "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn metrics_scrape_renders_prometheus_text() {
    let (_orchestrator, router) = router().await;
    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        response.into_body().collect().await.unwrap().to_bytes().to_vec(),
    )
    .unwrap();
    assert!(text.contains("corral_"));
}

#[tokio::test]
async fn spawn_get_and_terminate_agent_over_http() {
    let (_orchestrator, router) = router().await;

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/agents/spawn",
        Some(json!({"agent_type": "research", "name": "r1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "starting");
    let agent_id = body["agent_id"].as_str().unwrap().to_string();

    let (status, body) = send_json(&router, "GET", &format!("/api/v1/agents/{agent_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "r1");

    let (status, _) = send_json(
        &router,
        "PATCH",
        &format!("/api/v1/agents/{agent_id}/status"),
        Some(json!({"status": "idle"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &router,
        "POST",
        &format!("/api/v1/agents/{agent_id}/heartbeat"),
        Some(json!({"metrics": {"cpu": 0.2}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &router,
        "POST",
        &format!("/api/v1/agents/{agent_id}/terminate"),
        Some(json!({"reason": "test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["terminated"], json!(true));
}

#[tokio::test]
async fn unknown_agent_is_404_with_error_body_shape() {
    let (_orchestrator, router) = router().await;
    let missing = uuid::Uuid::new_v4();
    let (status, body) = send_json(&router, "GET", &format!("/api/v1/agents/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn task_submission_and_status_over_http() {
    let (_orchestrator, router) = router().await;

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/tasks/submit",
        Some(json!({"description": "Summarise X", "priority": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    let task_id = body["task_id"].as_str().unwrap().to_string();

    let (status, body) =
        send_json(&router, "GET", &format!("/api/v1/tasks/{task_id}/status"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], json!(0.0));

    let (status, body) = send_json(
        &router,
        "PATCH",
        &format!("/api/v1/tasks/{task_id}"),
        Some(json!({"priority": 8})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], json!(true));

    let (status, body) = send_json(&router, "GET", &format!("/api/v1/tasks/{task_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["priority"], json!(8));

    let (status, body) = send_json(
        &router,
        "POST",
        &format!("/api/v1/tasks/{task_id}/cancel"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], json!(true));
}

#[tokio::test]
async fn empty_description_is_rejected() {
    let (_orchestrator, router) = router().await;
    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/tasks/submit",
        Some(json!({"description": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION");
}

#[tokio::test]
async fn dependency_cycle_maps_to_400() {
    let (_orchestrator, router) = router().await;

    let mut ids = Vec::new();
    for name in ["t1", "t2"] {
        let (_, body) = send_json(
            &router,
            "POST",
            "/api/v1/tasks/submit",
            Some(json!({"description": name})),
        )
        .await;
        ids.push(body["task_id"].as_str().unwrap().to_string());
    }

    let (status, _) = send_json(
        &router,
        "POST",
        &format!("/api/v1/tasks/{}/dependencies", ids[1]),
        Some(json!({"depends_on_task_id": ids[0]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &router,
        "POST",
        &format!("/api/v1/tasks/{}/dependencies", ids[0]),
        Some(json!({"depends_on_task_id": ids[1]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CYCLIC_DEPENDENCY");
}

#[tokio::test]
async fn webhook_crud_over_http() {
    let (_orchestrator, router) = router().await;

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/webhooks",
        Some(json!({
            "name": "observer",
            "url": "http://example.com/hook",
            "events": ["task.completed", "task.failed"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let webhook_id = body["id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "active");
    assert!(body["secret"].as_str().unwrap().len() >= 32);

    let (status, body) = send_json(&router, "GET", "/api/v1/webhooks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (status, body) = send_json(
        &router,
        "PATCH",
        &format!("/api/v1/webhooks/{webhook_id}"),
        Some(json!({"status": "paused"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, _) = send_json(
        &router,
        "DELETE",
        &format!("/api/v1/webhooks/{webhook_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &router,
        "GET",
        &format!("/api/v1/webhooks/{webhook_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rate_limit_returns_429_after_budget() {
    let mut config = test_config();
    config.rate_limit.requests = 3;
    let orchestrator = Orchestrator::build_with(
        config,
        std::sync::Arc::new(EchoLanguageModel),
        std::sync::Arc::new(NullKnowledgeStore),
    )
    .await
    .unwrap();
    let router = build_router(AppState::from_orchestrator(&orchestrator));

    for _ in 0..3 {
        let (status, _) = send_json(&router, "GET", "/api/v1/tasks", None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send_json(&router, "GET", "/api/v1/tasks", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "CAPACITY_EXCEEDED");

    // A different client identity is unaffected.
    let request = Request::builder()
        .method("GET")
        .uri("/api/v1/tasks")
        .header("x-api-key", "another-client")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_id_is_propagated() {
    let (_orchestrator, router) = router().await;
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-42"
    );
}

#[tokio::test]
async fn audit_entries_are_queryable() {
    let (_orchestrator, router) = router().await;

    send_json(
        &router,
        "POST",
        "/api/v1/tasks/submit",
        Some(json!({"description": "audited"})),
    )
    .await;

    let (status, body) = send_json(
        &router,
        "GET",
        "/api/v1/audit?resource_type=task&action=task.submit",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "task.submit");
}
