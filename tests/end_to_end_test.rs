//! End-to-end scenarios over the full control plane: orchestrator loops,
//! event consumers, worker runtime and scheduler working together.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use common::{orchestrator, orchestrator_with_model, wait_until};
use corral::domain::error::ExecutionError;
use corral::domain::models::{AgentStatus, AgentType, TaskStatus};
use corral::domain::ports::LanguageModel;
use corral::services::{AgentSpawnRequest, TaskSubmitRequest};

fn submit_request(description: &str) -> TaskSubmitRequest {
    serde_json::from_value(json!({"description": description})).unwrap()
}

async fn spawn_idle_agent(
    orchestrator: &corral::Orchestrator,
    agent_type: AgentType,
    name: &str,
) -> uuid::Uuid {
    let spawned = orchestrator
        .agent_manager
        .spawn(AgentSpawnRequest {
            agent_type,
            name: Some(name.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    orchestrator
        .agent_manager
        .update_status(spawned.agent_id, AgentStatus::Idle)
        .await
        .unwrap();
    spawned.agent_id
}

#[tokio::test]
async fn happy_path_task_reaches_completed_and_agent_returns_idle() {
    let orchestrator = orchestrator().await;

    let agent_id = spawn_idle_agent(&orchestrator, AgentType::Research, "r1").await;

    let submitted = orchestrator
        .scheduler
        .submit_task(submit_request("Summarise X"))
        .await
        .unwrap();
    assert_eq!(submitted.status, TaskStatus::Pending);

    // Round-trip law: immediately after submission the status is pending.
    let view = orchestrator
        .scheduler
        .get_status(submitted.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, TaskStatus::Pending);

    let handles = orchestrator.start().await;

    wait_until(Duration::from_secs(10), || async {
        let task = orchestrator
            .scheduler
            .get_task(submitted.task_id)
            .await
            .unwrap()
            .unwrap();
        task.status == TaskStatus::Completed
    })
    .await;

    let task = orchestrator
        .scheduler
        .get_task(submitted.task_id)
        .await
        .unwrap()
        .unwrap();
    assert!(task.output_data.is_some());
    assert!(task.started_at.is_some());
    assert!(task.completed_at.is_some());
    assert!(task.started_at.unwrap() <= task.completed_at.unwrap());

    wait_until(Duration::from_secs(5), || async {
        let agent = orchestrator.agent_manager.get(agent_id).await.unwrap().unwrap();
        agent.status == AgentStatus::Idle
    })
    .await;

    orchestrator.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
}

/// Fails the first two invocations with a recoverable error, then works.
struct FlakyModel {
    failures_left: AtomicU32,
}

#[async_trait]
impl LanguageModel for FlakyModel {
    async fn invoke(&self, prompt: &str) -> Result<String, ExecutionError> {
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(ExecutionError::Upstream("transient outage".to_string()));
        }
        Ok(format!("done: {prompt}"))
    }
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let orchestrator = orchestrator_with_model(Arc::new(FlakyModel {
        failures_left: AtomicU32::new(2),
    }))
    .await;
    let handles = orchestrator.start().await;

    spawn_idle_agent(&orchestrator, AgentType::Worker, "w1").await;

    let submitted = orchestrator
        .scheduler
        .submit_task(submit_request("flaky work"))
        .await
        .unwrap();

    wait_until(Duration::from_secs(20), || async {
        let task = orchestrator
            .scheduler
            .get_task(submitted.task_id)
            .await
            .unwrap()
            .unwrap();
        task.status == TaskStatus::Completed
    })
    .await;

    let task = orchestrator
        .scheduler
        .get_task(submitted.task_id)
        .await
        .unwrap()
        .unwrap();
    // Two recoverable failures, then success on the third attempt.
    assert_eq!(task.metadata.retry_count, 2);

    orchestrator.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
}

#[tokio::test]
async fn overdue_deadline_preempts_higher_priority() {
    let orchestrator = orchestrator().await;

    // One agent, so assignment order is observable.
    spawn_idle_agent(&orchestrator, AgentType::Worker, "w1").await;

    let now = chrono::Utc::now();
    let task_a = orchestrator
        .scheduler
        .submit_task(
            serde_json::from_value(json!({
                "description": "task A",
                "priority": 0,
                "deadline": now + chrono::Duration::seconds(60),
            }))
            .unwrap(),
        )
        .await
        .unwrap();
    let task_b = orchestrator
        .scheduler
        .submit_task(
            serde_json::from_value(json!({
                "description": "task B",
                "priority": 5,
                "deadline": now - chrono::Duration::seconds(1),
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let handles = orchestrator.start().await;

    wait_until(Duration::from_secs(15), || async {
        let a = orchestrator.scheduler.get_task(task_a.task_id).await.unwrap().unwrap();
        let b = orchestrator.scheduler.get_task(task_b.task_id).await.unwrap().unwrap();
        a.status == TaskStatus::Completed && b.status == TaskStatus::Completed
    })
    .await;

    let a = orchestrator.scheduler.get_task(task_a.task_id).await.unwrap().unwrap();
    let b = orchestrator.scheduler.get_task(task_b.task_id).await.unwrap().unwrap();
    assert!(
        b.started_at.unwrap() < a.started_at.unwrap(),
        "overdue task should start before the higher-priority one"
    );

    orchestrator.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
}

/// Hangs long enough that the test can observe an in-progress task.
struct SlowModel;

#[async_trait]
impl LanguageModel for SlowModel {
    async fn invoke(&self, _prompt: &str) -> Result<String, ExecutionError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("slow".to_string())
    }
}

#[tokio::test]
async fn lost_heartbeat_requeues_task_to_another_agent() {
    let orchestrator = orchestrator_with_model(Arc::new(SlowModel)).await;

    // Start everything except the worker heartbeat emitter, which would
    // keep the "crashed" agent alive.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = orchestrator.consumer.clone().start(shutdown_rx.clone());
    handles.push(tokio::spawn(
        orchestrator.scheduler.clone().run_scheduler_loop(shutdown_rx.clone()),
    ));
    handles.push(tokio::spawn(
        orchestrator.agent_manager.clone().run_health_monitor(shutdown_rx.clone()),
    ));

    let first = spawn_idle_agent(&orchestrator, AgentType::Worker, "w1").await;
    let submitted = orchestrator
        .scheduler
        .submit_task(submit_request("long job"))
        .await
        .unwrap();

    // Wait until the task is running on the first agent.
    wait_until(Duration::from_secs(10), || async {
        let task = orchestrator
            .scheduler
            .get_task(submitted.task_id)
            .await
            .unwrap()
            .unwrap();
        task.status == TaskStatus::InProgress && task.agent_id == Some(first)
    })
    .await;

    // A second idle agent stands by for the re-queue.
    let second = spawn_idle_agent(&orchestrator, AgentType::Worker, "w2").await;

    // Simulate the crash: stop w1's heartbeats by backdating them.
    let stale = (chrono::Utc::now() - chrono::Duration::seconds(60)).to_rfc3339();
    sqlx::query("UPDATE agents SET last_heartbeat_at = ? WHERE id = ?")
        .bind(&stale)
        .bind(first.to_string())
        .execute(orchestrator.db.pool())
        .await
        .unwrap();

    // Health monitor marks w1 offline; the scheduler re-queues and
    // reassigns to w2.
    wait_until(Duration::from_secs(15), || async {
        let agent = orchestrator.agent_manager.get(first).await.unwrap().unwrap();
        let task = orchestrator
            .scheduler
            .get_task(submitted.task_id)
            .await
            .unwrap()
            .unwrap();
        agent.status == AgentStatus::Offline
            && task.agent_id == Some(second)
            && task.metadata.retry_count == 1
    })
    .await;

    shutdown_tx.send(true).unwrap();
    orchestrator.worker.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
}

#[tokio::test]
async fn cycle_rejection_leaves_graph_unchanged() {
    let orchestrator = orchestrator().await;

    let t1 = orchestrator.scheduler.submit_task(submit_request("t1")).await.unwrap();
    let t2 = orchestrator.scheduler.submit_task(submit_request("t2")).await.unwrap();
    let t3 = orchestrator.scheduler.submit_task(submit_request("t3")).await.unwrap();

    orchestrator.scheduler.add_dependency(t2.task_id, t1.task_id).await.unwrap();
    orchestrator.scheduler.add_dependency(t3.task_id, t2.task_id).await.unwrap();

    let err = orchestrator
        .scheduler
        .add_dependency(t1.task_id, t3.task_id)
        .await
        .unwrap_err();
    assert_eq!(
        err.code(),
        corral::domain::error::ErrorCode::CyclicDependency
    );

    // Graph unchanged: t1 still has no dependencies.
    let view = orchestrator.scheduler.get_status(t1.task_id).await.unwrap().unwrap();
    assert_eq!(view.status, TaskStatus::Pending);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn dependent_task_waits_for_upstream_completion() {
    let orchestrator = orchestrator().await;

    spawn_idle_agent(&orchestrator, AgentType::Worker, "w1").await;

    let upstream = orchestrator
        .scheduler
        .submit_task(submit_request("upstream"))
        .await
        .unwrap();
    let downstream = orchestrator
        .scheduler
        .submit_task(submit_request("downstream"))
        .await
        .unwrap();
    orchestrator
        .scheduler
        .add_dependency(downstream.task_id, upstream.task_id)
        .await
        .unwrap();

    let handles = orchestrator.start().await;

    wait_until(Duration::from_secs(15), || async {
        let task = orchestrator
            .scheduler
            .get_task(downstream.task_id)
            .await
            .unwrap()
            .unwrap();
        task.status == TaskStatus::Completed
    })
    .await;

    let upstream_task = orchestrator
        .scheduler
        .get_task(upstream.task_id)
        .await
        .unwrap()
        .unwrap();
    let downstream_task = orchestrator
        .scheduler
        .get_task(downstream.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upstream_task.status, TaskStatus::Completed);
    // The ready predicate held: the dependent started only after the
    // upstream completed.
    assert!(upstream_task.completed_at.unwrap() <= downstream_task.started_at.unwrap());

    orchestrator.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
}

#[tokio::test]
async fn webhook_receives_task_lifecycle_events() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let orchestrator = orchestrator().await;
    let handles = orchestrator.start().await;

    orchestrator
        .webhooks
        .register(
            serde_json::from_value(json!({
                "name": "observer",
                "url": format!("{}/hook", server.url()),
                "events": ["task.completed"],
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    spawn_idle_agent(&orchestrator, AgentType::Worker, "w1").await;
    let submitted = orchestrator
        .scheduler
        .submit_task(submit_request("notify me"))
        .await
        .unwrap();

    wait_until(Duration::from_secs(15), || async {
        let task = orchestrator
            .scheduler
            .get_task(submitted.task_id)
            .await
            .unwrap()
            .unwrap();
        task.status == TaskStatus::Completed
    })
    .await;

    wait_until(Duration::from_secs(10), || async {
        let hooks = orchestrator.webhooks.list(None).await;
        hooks.first().is_some_and(|h| h.success_count >= 1)
    })
    .await;

    mock.assert_async().await;

    orchestrator.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
}
