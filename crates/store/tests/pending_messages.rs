//! E2/E3 from the acceptance scenarios: messages sent to an issue with no
//! live process to accept them persist as pending rows, stay pending until
//! dispatched, and disappear from the pending set (but not the log) once
//! marked dispatched.

use ie_domain::{EntryType, LogEntry, Metadata};
use ie_store::Store;
use serde_json::json;
use uuid::Uuid;

fn pending_row(issue_id: Uuid, turn_index: i64, content: &str) -> LogEntry {
    let mut metadata = Metadata::new();
    metadata.insert("type".into(), json!("pending"));
    LogEntry {
        id: Uuid::new_v4(),
        issue_id,
        turn_index,
        entry_index: 0,
        entry_type: EntryType::UserMessage,
        content: content.to_string(),
        metadata,
        reply_to_message_id: None,
        timestamp: chrono::Utc::now(),
        tool_call_ref_id: None,
        visible: true,
    }
}

#[test]
fn pending_rows_are_queued_until_dispatched() {
    let store = Store::open_in_memory().unwrap();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();

    let first = store.append_log_entry(pending_row(issue.id, 0, "first message"), None).unwrap();
    let second = store.append_log_entry(pending_row(issue.id, 1, "second message"), None).unwrap();

    let pending = store.list_pending_logs(issue.id).unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].content, "first message");
    assert_eq!(pending[1].content, "second message");

    store.mark_logs_dispatched(&[first.id, second.id]).unwrap();

    assert!(store.list_pending_logs(issue.id).unwrap().is_empty());
    // The rows themselves still exist for history, just no longer pending.
    let all = store.list_logs(issue.id).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|e| !e.visible));
}

#[test]
fn non_pending_user_messages_are_not_queued() {
    let store = Store::open_in_memory().unwrap();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();

    let mut plain = pending_row(issue.id, 0, "already dispatched prompt");
    plain.metadata.clear();
    store.append_log_entry(plain, None).unwrap();

    assert!(store.list_pending_logs(issue.id).unwrap().is_empty());
    assert_eq!(store.list_logs(issue.id).unwrap().len(), 1);
}

#[test]
fn marking_an_empty_batch_dispatched_is_a_no_op() {
    let store = Store::open_in_memory().unwrap();
    let project = store.create_project("p", "P").unwrap();
    let issue = store.create_issue(project.id, "Issue").unwrap();
    store.append_log_entry(pending_row(issue.id, 0, "still pending"), None).unwrap();

    store.mark_logs_dispatched(&[]).unwrap();

    assert_eq!(store.list_pending_logs(issue.id).unwrap().len(), 1);
}
