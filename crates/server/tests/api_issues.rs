//! HTTP-level coverage for the pending-message protocol (E2/E3):
//! `PATCH`/`follow-up` driven through a real `axum::Router`, not just the
//! store layer.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use ie_domain::config::{Config, ConcurrencyConfig, ExecutorsConfig, ReconcilerConfig};
use ie_executors::ExecutorRegistry;
use ie_process::ProcessManager;
use ie_runtime::{CancelMap, Discovery, EventBus, LifecycleController, Orchestrator, PersistenceWriter, Reconciler};
use ie_server::state::AppState;
use ie_store::Store;

fn test_app() -> (Router, AppState) {
    let config = Arc::new(Config::default());
    let store = Store::open_in_memory().unwrap();
    let executors = Arc::new(ExecutorRegistry::from_config(&ExecutorsConfig::default()));
    let discovery = Arc::new(Discovery::new(executors.clone(), store.clone()));
    let processes = ProcessManager::new(&ConcurrencyConfig::default());
    let persistence = Arc::new(PersistenceWriter::new(store.clone()));
    let events = Arc::new(EventBus::new());
    let cancels = Arc::new(CancelMap::new());
    let lifecycle = LifecycleController::new(
        store.clone(),
        executors.clone(),
        processes.clone(),
        persistence.clone(),
        events.clone(),
        cancels,
        &ConcurrencyConfig::default(),
    );
    let orchestrator = Orchestrator::new(
        store.clone(),
        executors.clone(),
        processes.clone(),
        persistence.clone(),
        events.clone(),
        lifecycle,
        &ConcurrencyConfig::default(),
    );
    let reconciler = Reconciler::new(store.clone(), processes.clone(), events.clone(), &ReconcilerConfig::default());

    let state = AppState {
        config,
        store,
        executors,
        discovery,
        processes,
        persistence,
        events,
        orchestrator,
        reconciler,
    };
    (ie_server::api::router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_project_and_issue(app: &Router) -> (String, String) {
    let req = Request::builder()
        .method("POST")
        .uri("/v1/projects")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "alias": "acme", "name": "Acme" })).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let project = body_json(resp).await;
    let alias = project["alias"].as_str().unwrap().to_string();

    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/projects/{alias}/issues"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "title": "fix the thing" })).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let issue = body_json(resp).await;
    (alias, issue["id"].as_str().unwrap().to_string())
}

/// E2: a follow-up against a `todo` issue with no live execution is
/// persisted as a pending row, not dispatched.
#[tokio::test]
async fn follow_up_against_idle_issue_is_queued_not_dispatched() {
    let (app, _state) = test_app();
    let (_alias, issue_id) = create_project_and_issue(&app).await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/issues/{issue_id}/follow-up"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "prompt": "queued message" })).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["queued"], json!(true));
    assert!(body.get("executionId").is_none());

    let req = Request::builder()
        .method("GET")
        .uri(format!("/v1/issues/{issue_id}/logs"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let logs = body_json(resp).await;
    let logs = logs.as_array().unwrap();
    assert!(logs.iter().any(|l| l["content"] == "queued message"));
}

/// E3: `PATCH` into `working` drains any rows a prior `follow-up` queued
/// and folds them into the effective prompt before dispatching.
#[tokio::test]
async fn patch_into_working_drains_queued_follow_up_and_executes() {
    let (app, state) = test_app();
    let (_alias, issue_id) = create_project_and_issue(&app).await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("/v1/issues/{issue_id}/follow-up"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "prompt": "queued message" })).unwrap()))
        .unwrap();
    app.clone().oneshot(req).await.unwrap();

    let mut events = state.events.subscribe();

    let req = Request::builder()
        .method("PATCH")
        .uri(format!("/v1/issues/{issue_id}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "status": "working", "engine_type": "echo" })).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body["execution_id"].is_string());
    assert_eq!(body["issue"]["status_id"], json!("working"));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ie_runtime::Event::Settled { issue_id: id, .. }) = events.recv().await {
                if id.to_string() == issue_id {
                    break;
                }
            }
        }
    })
    .await
    .expect("execution did not settle in time");

    let req = Request::builder()
        .method("GET")
        .uri(format!("/v1/issues/{issue_id}/logs"))
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let logs = body_json(resp).await;
    let logs = logs.as_array().unwrap();
    assert!(logs.iter().any(|l| l["content"] == "queued message"));
}

/// A plain status drag (no execution trigger) should not require an
/// `engine_type` and must not start a process.
#[tokio::test]
async fn patch_status_without_working_transition_does_not_execute() {
    let (app, _state) = test_app();
    let (_alias, issue_id) = create_project_and_issue(&app).await;

    let req = Request::builder()
        .method("PATCH")
        .uri(format!("/v1/issues/{issue_id}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&json!({ "status": "done" })).unwrap()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert!(body["execution_id"].is_null());
    assert_eq!(body["issue"]["status_id"], json!("done"));
}
