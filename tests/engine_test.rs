mod common;

use common::{test_config, three_stage_process};
use stageline::broker::QueueDepth;
use stageline::process::{topic_for, TaskState};
use stageline::{App, EngineError};
use std::collections::BTreeMap;
use std::sync::Arc;

async fn depth(app: &App, task: &str) -> QueueDepth {
    app.engine
        .queue()
        .depth(&topic_for("p", task))
        .await
        .unwrap()
}

async fn deployed_app(dir: &tempfile::TempDir) -> App {
    let app = App::build(&test_config(dir.path())).await.unwrap();
    app.engine
        .deploy_process(three_stage_process("p"))
        .await
        .unwrap();
    app
}

#[tokio::test]
async fn create_publishes_only_start() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;

    let workflow_id = app.engine.create_workflow("p").await.unwrap();
    let workflow = app.engine.get_workflow(&workflow_id).await.unwrap();

    assert_eq!(workflow.process_id, "p");
    assert!(workflow.is_published("start"));
    assert!(!workflow.is_published("s1"));
    assert!(!workflow.is_published("s2"));
    assert_eq!(workflow.tasks_in(TaskState::Active), ["t0"]);
    assert_eq!(workflow.tasks_in(TaskState::Waiting), ["t1", "t2", "t3"]);

    assert_eq!(depth(&app, "t0").await.queued, 1);
    assert_eq!(depth(&app, "t1").await.queued, 0);
    app.shutdown().await;
}

#[tokio::test]
async fn completing_the_gate_dispatches_the_next_stage() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;
    let workflow_id = app.engine.create_workflow("p").await.unwrap();

    let outcome = app.engine.complete_task(&workflow_id, "t0").await.unwrap();
    assert_eq!(outcome.published_stages, ["s1"]);
    assert_eq!(outcome.dispatched_tasks, ["t1", "t2"]);
    assert_eq!(depth(&app, "t1").await.queued, 1);
    assert_eq!(depth(&app, "t2").await.queued, 1);

    // Half of the s2 gate is not enough
    let outcome = app.engine.complete_task(&workflow_id, "t1").await.unwrap();
    assert!(outcome.published_stages.is_empty());
    assert_eq!(depth(&app, "t3").await.queued, 0);

    let outcome = app.engine.complete_task(&workflow_id, "t2").await.unwrap();
    assert_eq!(outcome.published_stages, ["s2"]);
    assert_eq!(depth(&app, "t3").await.queued, 1);

    let workflow = app.engine.get_workflow(&workflow_id).await.unwrap();
    assert!(workflow.published_stage.values().all(|published| *published));
    assert_eq!(workflow.tasks_in(TaskState::Active), ["t3"]);
    app.shutdown().await;
}

#[tokio::test]
async fn repeated_completion_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;
    let workflow_id = app.engine.create_workflow("p").await.unwrap();

    app.engine.complete_task(&workflow_id, "t0").await.unwrap();
    let before = app.engine.get_workflow(&workflow_id).await.unwrap();

    let again = app.engine.complete_task(&workflow_id, "t0").await.unwrap();
    assert!(again.already_completed);
    assert!(again.dispatched_tasks.is_empty());

    let after = app.engine.get_workflow(&workflow_id).await.unwrap();
    assert_eq!(before.task_status, after.task_status);
    assert_eq!(before.published_stage, after.published_stage);
    assert_eq!(depth(&app, "t1").await.queued, 1);
    app.shutdown().await;
}

#[tokio::test]
async fn concurrent_completions_dispatch_each_stage_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = Arc::new(deployed_app(&dir).await);
    let workflow_id = app.engine.create_workflow("p").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = Arc::clone(&app);
        let workflow_id = workflow_id.clone();
        handles.push(tokio::spawn(async move {
            app.engine.complete_task(&workflow_id, "t0").await.unwrap()
        }));
    }

    let mut publications = 0;
    for handle in handles {
        publications += handle.await.unwrap().published_stages.len();
    }
    assert_eq!(publications, 1);
    assert_eq!(depth(&app, "t1").await.queued, 1);
    assert_eq!(depth(&app, "t2").await.queued, 1);

    // Both halves of the s2 gate racing each other still publish s2 once
    let (a, b) = tokio::join!(
        app.engine.complete_task(&workflow_id, "t1"),
        app.engine.complete_task(&workflow_id, "t2"),
    );
    let published = a.unwrap().published_stages.len() + b.unwrap().published_stages.len();
    assert_eq!(published, 1);
    assert_eq!(depth(&app, "t3").await.queued, 1);
    app.shutdown().await;
}

#[tokio::test]
async fn workflows_progress_independently() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;
    let first = app.engine.create_workflow("p").await.unwrap();
    let second = app.engine.create_workflow("p").await.unwrap();

    app.engine.complete_task(&first, "t0").await.unwrap();

    let second = app.engine.get_workflow(&second).await.unwrap();
    assert!(!second.is_published("s1"));
    assert_eq!(second.state_of("t0"), Some(TaskState::Active));
    assert_eq!(depth(&app, "t0").await.queued, 2);
    app.shutdown().await;
}

#[tokio::test]
async fn failure_rules() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;
    let workflow_id = app.engine.create_workflow("p").await.unwrap();

    // Waiting tasks were never dispatched and cannot be completed
    let err = app.engine.complete_task(&workflow_id, "t1").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: TaskState::Waiting,
            to: TaskState::Completed,
            ..
        }
    ));

    app.engine.complete_task(&workflow_id, "t0").await.unwrap();
    let err = app.engine.fail_task(&workflow_id, "t0").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    app.engine.fail_task(&workflow_id, "t1").await.unwrap();
    app.engine.fail_task(&workflow_id, "t1").await.unwrap();
    let err = app.engine.complete_task(&workflow_id, "t1").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: TaskState::Failed,
            ..
        }
    ));

    // A failed gate task keeps s2 unpublished for good
    let outcome = app.engine.complete_task(&workflow_id, "t2").await.unwrap();
    assert!(outcome.published_stages.is_empty());
    let workflow = app.engine.get_workflow(&workflow_id).await.unwrap();
    assert!(!workflow.is_published("s2"));
    assert_eq!(workflow.state_of("t3"), Some(TaskState::Waiting));
    assert_eq!(depth(&app, "t3").await.queued, 0);
    app.shutdown().await;
}

#[tokio::test]
async fn unknown_references() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;

    let err = app.engine.create_workflow("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::ConfigNotFound(_)));

    let err = app.engine.complete_task("missing", "t0").await.unwrap_err();
    assert!(matches!(err, EngineError::WorkflowNotFound(_)));

    let workflow_id = app.engine.create_workflow("p").await.unwrap();
    let err = app.engine.complete_task(&workflow_id, "nope").await.unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound { .. }));
    let err = app.engine.fail_task(&workflow_id, "nope").await.unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound { .. }));

    let err = app.engine.get_workflow("missing").await.unwrap_err();
    assert!(err.is_not_found());
    app.shutdown().await;
}

#[tokio::test]
async fn deploy_rejects_bad_and_duplicate_configs() {
    let dir = tempfile::tempdir().unwrap();
    let app = deployed_app(&dir).await;

    let err = app
        .engine
        .deploy_process(three_stage_process("p"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConfigExists(_)));

    let mut no_start = three_stage_process("q");
    no_start.stage_tasks.remove("start");
    let err = app.engine.deploy_process(no_start).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));

    let mut ungated = three_stage_process("r");
    ungated.stage_gates = BTreeMap::new();
    let err = app.engine.deploy_process(ungated).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));

    // Nothing from the rejected deploys was stored
    assert!(app.engine.get_process("q").await.unwrap_err().is_not_found());
    app.shutdown().await;
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let workflow_id = {
        let app = deployed_app(&dir).await;
        let id = app.engine.create_workflow("p").await.unwrap();
        app.engine.complete_task(&id, "t0").await.unwrap();
        app.shutdown().await;
        id
    };

    let app = App::build(&config).await.unwrap();
    let workflow = app.engine.get_workflow(&workflow_id).await.unwrap();
    assert!(workflow.is_published("s1"));
    assert_eq!(workflow.tasks_in(TaskState::Active), ["t1", "t2"]);

    // Jobs enqueued before the restart are still there
    assert_eq!(depth(&app, "t1").await.queued, 1);

    let outcome = app.engine.complete_task(&workflow_id, "t1").await.unwrap();
    assert!(outcome.published_stages.is_empty());
    app.shutdown().await;
}
