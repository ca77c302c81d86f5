//! End-to-end acceptance scenarios driven through the public
//! [`Orchestrator`] API, against the built-in `echo` engine so no external
//! binary is required.

use std::sync::Arc;
use std::time::Duration;

use ie_domain::config::ConcurrencyConfig;
use ie_domain::config::ExecutorsConfig;
use ie_domain::{IssueStatus, SessionStatus};
use ie_executors::ExecutorRegistry;
use ie_process::ProcessManager;
use ie_runtime::{
    BusyAction, CancelMap, Event, EventBus, FollowUpRequest, IssueState, LifecycleController,
    Orchestrator, PersistenceWriter,
};
use ie_store::Store;

fn setup() -> (Arc<Orchestrator>, Arc<Store>, Arc<EventBus>) {
    let store = Store::open_in_memory().unwrap();
    let registry = Arc::new(ExecutorRegistry::from_config(&ExecutorsConfig::default()));
    let processes = ProcessManager::new(&ConcurrencyConfig::default());
    let persistence = Arc::new(PersistenceWriter::new(store.clone()));
    let events = Arc::new(EventBus::new());
    let cancels = Arc::new(CancelMap::new());
    let lifecycle = LifecycleController::new(
        store.clone(),
        registry.clone(),
        processes.clone(),
        persistence.clone(),
        events.clone(),
        cancels,
        &ConcurrencyConfig::default(),
    );
    let orchestrator = Orchestrator::new(
        store.clone(),
        registry,
        processes,
        persistence,
        events.clone(),
        lifecycle,
        &ConcurrencyConfig::default(),
    );
    (orchestrator, store, events)
}

/// Waits for the `Settled` event belonging to one issue, or panics after a
/// generous timeout — the echo engine exits in well under a second.
async fn await_settled(events: &mut tokio::sync::broadcast::Receiver<Event>, issue_id: uuid::Uuid) -> IssueState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await.unwrap() {
                Event::Settled { issue_id: id, final_status, .. } if id == issue_id => return final_status,
                _ => continue,
            }
        }
    })
    .await
    .expect("execution did not settle in time")
}

#[tokio::test]
async fn e1_fresh_echo_run_settles_issue_into_review() {
    let (orchestrator, store, events) = setup();
    let mut events = events.subscribe();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();
    store.set_issue_status(issue.id, IssueStatus::Working).unwrap();

    let result = orchestrator
        .execute_issue(issue.id, "echo", "hello from a test".into(), None, None)
        .await
        .unwrap();
    assert_ne!(result.execution_id, uuid::Uuid::nil());

    let final_status = await_settled(&mut events, issue.id).await;
    assert_eq!(final_status, IssueState::Completed);

    let refreshed = store.get_issue(issue.id).unwrap().unwrap();
    assert_eq!(refreshed.status_id, IssueStatus::Review);
    assert_eq!(refreshed.session.session_status, Some(SessionStatus::Completed));

    let logs = store.list_logs(issue.id).unwrap();
    assert!(logs.iter().any(|l| l.content == "hello from a test"));
    assert!(logs.iter().any(|l| l.content.contains("hello from a test") && l.entry_type == ie_domain::EntryType::AssistantMessage));
}

#[tokio::test]
async fn executing_an_issue_twice_concurrently_is_rejected() {
    let (orchestrator, store, events) = setup();
    let mut events = events.subscribe();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();

    orchestrator.execute_issue(issue.id, "echo", "first".into(), None, None).await.unwrap();
    let second = orchestrator.execute_issue(issue.id, "echo", "second".into(), None, None).await;
    assert!(second.is_err());

    // Drain the first execution so the background monitor task doesn't
    // outlive the test runtime.
    await_settled(&mut events, issue.id).await;
}

#[tokio::test]
async fn restart_is_rejected_unless_session_is_failed_or_cancelled() {
    let (orchestrator, store, _events) = setup();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();

    let err = orchestrator.restart_issue(issue.id).await.unwrap_err();
    assert!(matches!(err, ie_domain::Error::InvalidState(_)));
}

#[tokio::test]
async fn cancel_issue_with_no_active_process_still_marks_session_cancelled() {
    let (orchestrator, store, _events) = setup();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();

    let result = orchestrator.cancel_issue(issue.id).await.unwrap();
    assert_eq!(result, "cancelled");

    let refreshed = store.get_issue(issue.id).unwrap().unwrap();
    assert_eq!(refreshed.session.session_status, Some(SessionStatus::Cancelled));
}

#[tokio::test]
async fn follow_up_with_no_prior_session_is_rejected() {
    let (orchestrator, store, _events) = setup();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();

    let err = orchestrator
        .follow_up_issue(
            issue.id,
            FollowUpRequest { prompt: "are you there?".into(), model: None, permission_mode: None, busy_action: BusyAction::Queue },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ie_domain::Error::InvalidState(_)));
}
