mod common;

use common::{eventually, serve, spawn_engine, test_config, three_stage_process};
use reqwest::StatusCode;
use serde_json::{json, Value};
use stageline::process::Job;
use stageline::worker::{worker_routes, EngineClient, FnHandler, HandlerRegistry, WorkerRuntime};
use stageline::TaskState;
use std::time::Duration;

#[tokio::test]
async fn healthz() {
    let dir = tempfile::tempdir().unwrap();
    let (app, base_url) = spawn_engine(&test_config(dir.path())).await;

    let body = reqwest::get(format!("{}/healthz", base_url))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
    app.shutdown().await;
}

#[tokio::test]
async fn process_config_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (app, base_url) = spawn_engine(&test_config(dir.path())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/process_configs", base_url))
        .json(&three_stage_process("orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["process_id"], "orders");

    let response = client
        .post(format!("{}/process_configs", base_url))
        .json(&three_stage_process("orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // s1 gated on a task that does not exist
    let response = client
        .post(format!("{}/process_configs", base_url))
        .json(&json!({
            "process_id": "broken",
            "stage_tasks": { "start": ["a"], "s1": ["b"] },
            "stage_gates": { "s1": ["ghost"] }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    let response = client
        .get(format!("{}/process_configs/orders", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stage_tasks"]["s1"], json!(["t1", "t2"]));

    let response = client
        .get(format!("{}/process_configs/broken", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    app.shutdown().await;
}

#[tokio::test]
async fn workflow_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (app, base_url) = spawn_engine(&test_config(dir.path())).await;
    let engine = EngineClient::new(&base_url);
    let client = reqwest::Client::new();

    let err = engine.create_workflow("orders").await.unwrap_err();
    assert!(err.to_string().contains("404"));

    engine.deploy_process(&three_stage_process("orders")).await.unwrap();
    let workflow_id = engine.create_workflow("orders").await.unwrap();

    let outcome = engine.complete_task(&workflow_id, "t0").await.unwrap();
    assert_eq!(outcome.published_stages, ["s1"]);
    assert_eq!(outcome.dispatched_tasks, ["t1", "t2"]);

    let response = client
        .post(format!("{}/workflows/complete_task", base_url))
        .json(&json!({ "workflow_id": workflow_id, "task": "t0" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["already_completed"], true);

    engine.fail_task(&workflow_id, "t1").await.unwrap();
    let response = client
        .post(format!("{}/workflows/complete_task", base_url))
        .json(&json!({ "workflow_id": workflow_id, "task": "t1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let workflow = engine.get_workflow(&workflow_id).await.unwrap();
    assert_eq!(workflow.state_of("t1"), Some(TaskState::Failed));
    assert_eq!(workflow.state_of("t2"), Some(TaskState::Active));

    let response = client
        .get(format!("{}/workflows/unknown", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    app.shutdown().await;
}

#[tokio::test]
async fn subscription_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (app, base_url) = spawn_engine(&test_config(dir.path())).await;
    let client = reqwest::Client::new();
    let worker = common::MockWorker::start().await;

    client
        .post(format!("{}/process_configs", base_url))
        .json(&three_stage_process("orders"))
        .send()
        .await
        .unwrap();

    let subscribe = json!({
        "process_id": "orders",
        "task": "t0",
        "health_check_url": worker.health_url(),
        "callback_url": worker.callback_url(),
    });

    worker.set_healthy(false);
    let response = client
        .post(format!("{}/subscriptions", base_url))
        .json(&subscribe)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    worker.set_healthy(true);
    let response = client
        .post(format!("{}/subscriptions", base_url))
        .json(&subscribe)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_key = response.json::<Value>().await.unwrap()["session_key"]
        .as_str()
        .unwrap()
        .to_string();

    let response = client
        .post(format!("{}/subscriptions", base_url))
        .json(&subscribe)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = client
        .delete(format!("{}/subscriptions/{}", base_url, session_key))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .delete(format!("{}/subscriptions/{}", base_url, session_key))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    app.shutdown().await;
}

#[tokio::test]
async fn worker_runtime_drives_a_workflow_to_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let (app, base_url) = spawn_engine(&test_config(dir.path())).await;
    let engine = EngineClient::new(&base_url);
    engine.deploy_process(&three_stage_process("orders")).await.unwrap();

    let mut handlers = HandlerRegistry::new();
    for task in ["t0", "t1", "t2"] {
        handlers.register("orders", task, FnHandler(|_job: Job| async { Ok::<(), anyhow::Error>(()) }));
    }
    handlers.register(
        "orders",
        "t3",
        FnHandler(|job: Job| async move {
            Err::<(), _>(anyhow::anyhow!("refusing {}", job.task_id))
        }),
    );

    let runtime = WorkerRuntime::new(handlers, engine.clone());
    let worker_addr = serve(worker_routes(runtime.clone())).await;
    let session_keys = runtime
        .subscribe_all(
            &format!("http://{}/health", worker_addr),
            &format!("http://{}/jobs", worker_addr),
            None,
        )
        .await
        .unwrap();
    assert_eq!(session_keys.len(), 4);

    let workflow_id = engine.create_workflow("orders").await.unwrap();

    let (client, id) = (&engine, &workflow_id);
    let finished = eventually(Duration::from_secs(10), || async move {
        let workflow = client.get_workflow(id).await.unwrap();
        workflow.state_of("t3") == Some(TaskState::Failed)
    })
    .await;
    assert!(finished);

    let workflow = engine.get_workflow(&workflow_id).await.unwrap();
    assert_eq!(workflow.tasks_in(TaskState::Completed), ["t0", "t1", "t2"]);
    assert!(workflow.published_stage.values().all(|published| *published));
    app.shutdown().await;
}

#[tokio::test]
async fn worker_rejects_malformed_and_unhandled_jobs() {
    let runtime = WorkerRuntime::new(HandlerRegistry::new(), EngineClient::new("http://127.0.0.1:9"));
    let addr = serve(worker_routes(runtime)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/jobs", addr))
        .json(&json!({ "process_id": "orders", "task_id": "t0" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("http://{}/jobs", addr))
        .json(&json!({ "process_id": "orders", "task_id": "t0", "workflow_id": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("http://{}/jobs", addr))
        .json(&json!({ "process_id": "orders", "task_id": "t0", "workflow_id": "wf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
