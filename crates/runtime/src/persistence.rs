//! Persistence Writer (§4.C6): turns a `NormalizedEntry` from the log
//! normalizer into durable `LogEntry`/`ToolCall` rows, assigning the
//! per-execution entry index. Persist-then-publish: callers must not
//! emit to the event bus until this returns, so subscribers never see
//! an event for a row that isn't in the store yet.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use ie_domain::{LogEntry, NormalizedEntry, Result};
use ie_store::Store;
use parking_lot::Mutex;
use uuid::Uuid;

pub struct PersistenceWriter {
    store: Arc<Store>,
    /// execution_id -> next entry_index. Monotonic within one execution,
    /// starting at 0; never shared across executions.
    entry_counters: Mutex<HashMap<Uuid, i64>>,
}

impl PersistenceWriter {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            entry_counters: Mutex::new(HashMap::new()),
        }
    }

    /// `getNextTurnIndex` — called once at spawn time, never mid-turn.
    pub fn next_turn_index(&self, issue_id: Uuid) -> Result<i64> {
        self.store.next_turn_index(issue_id)
    }

    pub fn begin_execution(&self, execution_id: Uuid) {
        self.entry_counters.lock().insert(execution_id, 0);
    }

    pub fn end_execution(&self, execution_id: Uuid) {
        self.entry_counters.lock().remove(&execution_id);
    }

    fn next_entry_index(&self, execution_id: Uuid) -> i64 {
        let mut counters = self.entry_counters.lock();
        let counter = counters.entry(execution_id).or_insert(0);
        let index = *counter;
        *counter += 1;
        index
    }

    /// Persist one normalized entry under `issue_id`/`execution_id` at
    /// `turn_index`. Tool-use entries get an empty content/metadata log
    /// row plus a companion `ToolCall` row (the store wires the
    /// cross-reference).
    pub fn persist(
        &self,
        issue_id: Uuid,
        execution_id: Uuid,
        turn_index: i64,
        normalized: NormalizedEntry,
    ) -> Result<LogEntry> {
        let entry_index = self.next_entry_index(execution_id);
        let log_id = Uuid::new_v4();

        let tool_call = normalized.tool_call.map(|tc| ie_domain::ToolCallRow {
            id: Uuid::new_v4(),
            log_id,
            issue_id,
            tool_name: tc.tool_name,
            tool_call_id: tc.tool_call_id,
            kind: tc.kind,
            is_result: tc.is_result,
            raw: tc.raw,
        });

        let entry = LogEntry {
            id: log_id,
            issue_id,
            turn_index,
            entry_index,
            entry_type: normalized.entry_type,
            content: normalized.content,
            metadata: normalized.metadata,
            reply_to_message_id: None,
            timestamp: Utc::now(),
            tool_call_ref_id: None,
            visible: true,
        };

        self.store.append_log_entry(entry, tool_call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_domain::{EntryType, Metadata, NormalizedToolCall, ToolKind};

    fn setup() -> (Arc<Store>, Uuid) {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("proj", "Project").unwrap();
        let issue = store.create_issue(project.id, "Issue").unwrap();
        (store, issue.id)
    }

    #[test]
    fn entry_index_is_monotonic_per_execution() {
        let (store, issue_id) = setup();
        let writer = PersistenceWriter::new(store);
        let execution_id = Uuid::new_v4();
        writer.begin_execution(execution_id);

        let e1 = writer
            .persist(
                issue_id,
                execution_id,
                1,
                NormalizedEntry {
                    entry_type: EntryType::AssistantMessage,
                    content: "a".into(),
                    metadata: Metadata::new(),
                    tool_call: None,
                },
            )
            .unwrap();
        let e2 = writer
            .persist(
                issue_id,
                execution_id,
                1,
                NormalizedEntry {
                    entry_type: EntryType::AssistantMessage,
                    content: "b".into(),
                    metadata: Metadata::new(),
                    tool_call: None,
                },
            )
            .unwrap();

        assert_eq!(e1.entry_index, 0);
        assert_eq!(e2.entry_index, 1);
    }

    #[test]
    fn separate_executions_get_independent_counters() {
        let (store, issue_id) = setup();
        let writer = PersistenceWriter::new(store);
        let exec_a = Uuid::new_v4();
        let exec_b = Uuid::new_v4();
        writer.begin_execution(exec_a);
        writer.begin_execution(exec_b);

        let entry = |c: &str| NormalizedEntry {
            entry_type: EntryType::AssistantMessage,
            content: c.to_string(),
            metadata: Metadata::new(),
            tool_call: None,
        };

        let a0 = writer.persist(issue_id, exec_a, 1, entry("a0")).unwrap();
        let b0 = writer.persist(issue_id, exec_b, 1, entry("b0")).unwrap();
        assert_eq!(a0.entry_index, 0);
        assert_eq!(b0.entry_index, 0);
    }

    #[test]
    fn tool_use_entry_gets_empty_content_and_tool_call_ref() {
        let (store, issue_id) = setup();
        let writer = PersistenceWriter::new(store);
        let execution_id = Uuid::new_v4();
        writer.begin_execution(execution_id);

        let normalized = NormalizedEntry {
            entry_type: EntryType::ToolUse,
            content: "ignored".into(),
            metadata: Metadata::new(),
            tool_call: Some(NormalizedToolCall {
                tool_name: "Bash".into(),
                tool_call_id: Some("t1".into()),
                kind: ToolKind::CommandRun,
                is_result: false,
                raw: serde_json::json!({}),
            }),
        };

        let persisted = writer.persist(issue_id, execution_id, 1, normalized).unwrap();
        assert!(persisted.content.is_empty());
        assert!(persisted.tool_call_ref_id.is_some());
    }
}
