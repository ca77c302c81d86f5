//! C1 — Store. A transactional embedded-SQL store for projects, issues,
//! logs, tool-call detail rows, attachments and app settings.
//!
//! Every method is synchronous: rusqlite has no async story, and these are
//! all local-file, small-row operations. Callers (the `runtime` crate) hold
//! the connection mutex only for the duration of one query, never across
//! an `.await`.

mod rows;
mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use ie_domain::{
    Attachment, Error, Issue, IssueStatus, LogEntry, Project, Result, SessionFields,
    SessionStatus, ToolCallRow,
};

use rows::*;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| Error::Store(e.to_string()))?;
        schema::open(&conn, busy_timeout_ms)?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    pub fn open_in_memory() -> Result<Arc<Self>> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Store(e.to_string()))?;
        schema::open(&conn, 15_000)?;
        Ok(Arc::new(Self {
            conn: Mutex::new(conn),
        }))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Projects
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn create_project(&self, alias: &str, name: &str) -> Result<Project> {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            alias: alias.to_string(),
            name: name.to_string(),
            description: None,
            directory: None,
            repository_url: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO projects (id, alias, name, description, directory, repository_url, created_at, updated_at, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                project.id.to_string(),
                project.alias,
                project.name,
                project.description,
                project.directory,
                project.repository_url,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(project)
    }

    pub fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            [id.to_string()],
            project_from_row,
        )
        .optional()
        .map_err(|e| Error::Store(e.to_string()))
    }

    pub fn get_project_by_alias(&self, alias: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE alias = ?1"),
            [alias],
            project_from_row,
        )
        .optional()
        .map_err(|e| Error::Store(e.to_string()))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects WHERE is_deleted = 0 ORDER BY created_at"
            ))
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], project_from_row)
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Issues
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Creates an issue with a sequentially-assigned `issue_number`
    /// (unique within `(project_id, issue_number)`, §3 invariant).
    pub fn create_issue(&self, project_id: Uuid, title: &str) -> Result<Issue> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Store(e.to_string()))?;
        let issue_number: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(issue_number), 0) + 1 FROM issues WHERE project_id = ?1",
                [project_id.to_string()],
                |r| r.get(0),
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        let now = Utc::now();
        let issue = Issue {
            id: Uuid::new_v4(),
            project_id,
            status_id: IssueStatus::Todo,
            issue_number,
            title: title.to_string(),
            priority: 0,
            sort_order: 0,
            parent_issue_id: None,
            use_worktree: false,
            session: SessionFields::default(),
            dev_mode: false,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        };
        tx.execute(
            "INSERT INTO issues (id, project_id, status_id, issue_number, title, priority, sort_order, \
             parent_issue_id, engine_type, session_status, prompt, external_session_id, model, \
             base_commit_hash, dev_mode, created_at, updated_at, is_deleted) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, NULL, NULL, NULL, NULL, NULL, NULL, NULL, 0, ?6, ?7, 0)",
            params![
                issue.id.to_string(),
                issue.project_id.to_string(),
                issue.status_id.as_str(),
                issue.issue_number,
                issue.title,
                issue.created_at.to_rfc3339(),
                issue.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        tx.commit().map_err(|e| Error::Store(e.to_string()))?;
        Ok(issue)
    }

    pub fn get_issue(&self, id: Uuid) -> Result<Option<Issue>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
            [id.to_string()],
            issue_from_row,
        )
        .optional()
        .map_err(|e| Error::Store(e.to_string()))
    }

    pub fn list_issues_by_project(&self, project_id: Uuid) -> Result<Vec<Issue>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ISSUE_COLUMNS} FROM issues WHERE project_id = ?1 AND is_deleted = 0 ORDER BY issue_number"
            ))
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([project_id.to_string()], issue_from_row)
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    /// Non-deleted issues in a given status, for the reconciler's
    /// stale-working sweep (§4.C11) and the startup sweep.
    pub fn list_issues_by_status(&self, status: IssueStatus) -> Result<Vec<Issue>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ISSUE_COLUMNS} FROM issues WHERE status_id = ?1 AND is_deleted = 0"
            ))
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([status.as_str()], issue_from_row)
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    /// Every non-deleted issue whose `session_status` is one of the given
    /// set — used by startup reconciliation (E5: running/pending -> failed).
    pub fn list_issues_by_session_status(
        &self,
        statuses: &[SessionStatus],
    ) -> Result<Vec<Issue>> {
        let conn = self.conn.lock();
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE is_deleted = 0 AND session_status IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Store(e.to_string()))?;
        let params: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), issue_from_row)
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    pub fn set_issue_status(&self, id: Uuid, status: IssueStatus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE issues SET status_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub fn set_session_status(&self, id: Uuid, status: Option<SessionStatus>) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE issues SET session_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                id.to_string(),
                status.map(|s| s.as_str()),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    /// Apply the subset of `SessionFields` the lifecycle controller mutates
    /// at spawn time and on session-id repair. `None` fields are left as-is
    /// except `external_session_id`, whose explicit clearing (session-id
    /// repair) is expressed by `clear_external_session_id = true`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_session_fields(
        &self,
        id: Uuid,
        engine_type: Option<&str>,
        session_status: Option<SessionStatus>,
        prompt: Option<&str>,
        external_session_id: Option<&str>,
        clear_external_session_id: bool,
        model: Option<&str>,
        base_commit_hash: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE issues SET \
                engine_type = COALESCE(?2, engine_type), \
                session_status = COALESCE(?3, session_status), \
                prompt = COALESCE(?4, prompt), \
                external_session_id = CASE WHEN ?6 = 1 THEN NULL ELSE COALESCE(?5, external_session_id) END, \
                model = COALESCE(?7, model), \
                base_commit_hash = COALESCE(?8, base_commit_hash), \
                updated_at = ?9 \
             WHERE id = ?1",
            params![
                id.to_string(),
                engine_type,
                session_status.map(|s| s.as_str()),
                prompt,
                external_session_id,
                clear_external_session_id as i64,
                model,
                base_commit_hash,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Logs + tool calls (C6 persistence writer)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `getNextTurnIndex(issueId) = 1 + max existing turnIndex`. Called
    /// only at spawn time, never mid-turn (§4.C6).
    pub fn next_turn_index(&self, issue_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(turn_index) FROM issues_logs WHERE issue_id = ?1",
                [issue_id.to_string()],
                |r| r.get(0),
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Persist a log entry, and — for `tool-use` entries — a companion
    /// `ToolCall` row, writing its id back as `tool_call_ref_id`. Returns
    /// the persisted `LogEntry` (with `tool_call_ref_id` filled in).
    pub fn append_log_entry(
        &self,
        mut entry: LogEntry,
        tool_call: Option<ToolCallRow>,
    ) -> Result<LogEntry> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Store(e.to_string()))?;

        if let Some(mut tc) = tool_call {
            tc.log_id = entry.id;
            entry.tool_call_ref_id = Some(tc.id);
            // Tool-use log rows carry empty content/metadata; detail lives
            // on the ToolCall row (§3).
            entry.content = String::new();
            entry.metadata.clear();
            tx.execute(
                "INSERT INTO issues_logs_tools_call (id, log_id, issue_id, tool_name, tool_call_id, kind, is_result, raw) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tc.id.to_string(),
                    tc.log_id.to_string(),
                    tc.issue_id.to_string(),
                    tc.tool_name,
                    tc.tool_call_id,
                    tc.kind.as_str(),
                    tc.is_result as i64,
                    serde_json::to_string(&tc.raw).unwrap_or_default(),
                ],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        }

        tx.execute(
            "INSERT INTO issues_logs (id, issue_id, turn_index, entry_index, entry_type, content, \
             metadata, reply_to_message_id, timestamp, tool_call_ref_id, visible) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.id.to_string(),
                entry.issue_id.to_string(),
                entry.turn_index,
                entry.entry_index,
                entry.entry_type.as_str(),
                entry.content,
                serde_json::to_string(&entry.metadata).unwrap_or_else(|_| "{}".into()),
                entry.reply_to_message_id.map(|u| u.to_string()),
                entry.timestamp.to_rfc3339(),
                entry.tool_call_ref_id.map(|u| u.to_string()),
                entry.visible as i64,
            ],
        )
        .map_err(|e| Error::Store(e.to_string()))?;

        tx.commit().map_err(|e| Error::Store(e.to_string()))?;
        Ok(entry)
    }

    pub fn list_logs(&self, issue_id: Uuid) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LOG_COLUMNS} FROM issues_logs WHERE issue_id = ?1 ORDER BY turn_index, entry_index"
            ))
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([issue_id.to_string()], log_entry_from_row)
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    /// Pending user messages ordered by `(turn_index, entry_index)`, for the
    /// auto-flush path in §4.C9/§4.C10.
    pub fn list_pending_logs(&self, issue_id: Uuid) -> Result<Vec<LogEntry>> {
        let all = self.list_logs(issue_id)?;
        Ok(all.into_iter().filter(|e| e.is_pending()).collect())
    }

    /// Atomically flip `visible = 0` for a batch of pending rows once the
    /// engine has accepted them — never before (invariant 3, §8).
    pub fn mark_logs_dispatched(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Store(e.to_string()))?;
        for id in ids {
            tx.execute(
                "UPDATE issues_logs SET visible = 0 WHERE id = ?1",
                [id.to_string()],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub fn get_tool_call(&self, log_id: Uuid) -> Result<Option<ToolCallRow>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {TOOL_CALL_COLUMNS} FROM issues_logs_tools_call WHERE log_id = ?1"),
            [log_id.to_string()],
            tool_call_from_row,
        )
        .optional()
        .map_err(|e| Error::Store(e.to_string()))
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Attachments
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn insert_attachment(&self, attachment: Attachment) -> Result<Attachment> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO attachments (id, issue_id, log_id, original_name, stored_name, mime_type, size, storage_path) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                attachment.id.to_string(),
                attachment.issue_id.to_string(),
                attachment.log_id.map(|u| u.to_string()),
                attachment.original_name,
                attachment.stored_name,
                attachment.mime_type,
                attachment.size,
                attachment.storage_path,
            ],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(attachment)
    }

    pub fn list_attachments(&self, issue_id: Uuid) -> Result<Vec<Attachment>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE issue_id = ?1"
            ))
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([issue_id.to_string()], attachment_from_row)
            .map_err(|e| Error::Store(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // App settings (KV)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM app_settings WHERE key = ?1",
            [key],
            |r| r.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| Error::Store(e.to_string()))?
        .map(|raw| serde_json::from_str(&raw).map_err(Error::from))
        .transpose()
    }

    pub fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let raw = serde_json::to_string(value)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO app_settings (key, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            params![key, raw, now],
        )
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_and_issue_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "Demo Project").unwrap();
        let fetched = store.get_project_by_alias("demo").unwrap().unwrap();
        assert_eq!(fetched.id, project.id);

        let issue = store.create_issue(project.id, "Auto Exec Test").unwrap();
        assert_eq!(issue.issue_number, 1);
        let issue2 = store.create_issue(project.id, "Second").unwrap();
        assert_eq!(issue2.issue_number, 2);
    }

    #[test]
    fn log_entries_are_ordered_and_dense() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "Demo").unwrap();
        let issue = store.create_issue(project.id, "t").unwrap();

        let turn = store.next_turn_index(issue.id).unwrap();
        assert_eq!(turn, 1);

        for i in 0..3 {
            let entry = LogEntry {
                id: Uuid::new_v4(),
                issue_id: issue.id,
                turn_index: turn,
                entry_index: i,
                entry_type: ie_domain::EntryType::AssistantMessage,
                content: format!("entry {i}"),
                metadata: Default::default(),
                reply_to_message_id: None,
                timestamp: Utc::now(),
                tool_call_ref_id: None,
                visible: true,
            };
            store.append_log_entry(entry, None).unwrap();
        }

        let logs = store.list_logs(issue.id).unwrap();
        assert_eq!(logs.len(), 3);
        for (i, log) in logs.iter().enumerate() {
            assert_eq!(log.entry_index, i as i64);
        }
    }

    #[test]
    fn pending_dispatch_is_one_way() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "Demo").unwrap();
        let issue = store.create_issue(project.id, "t").unwrap();

        let mut metadata = ie_domain::Metadata::new();
        metadata.insert("type".into(), serde_json::json!("pending"));
        let entry = LogEntry {
            id: Uuid::new_v4(),
            issue_id: issue.id,
            turn_index: 1,
            entry_index: 0,
            entry_type: ie_domain::EntryType::UserMessage,
            content: "queued follow-up message".into(),
            metadata,
            reply_to_message_id: None,
            timestamp: Utc::now(),
            tool_call_ref_id: None,
            visible: true,
        };
        let persisted = store.append_log_entry(entry, None).unwrap();
        assert!(persisted.is_pending());

        let pending = store.list_pending_logs(issue.id).unwrap();
        assert_eq!(pending.len(), 1);

        store.mark_logs_dispatched(&[persisted.id]).unwrap();
        let pending_after = store.list_pending_logs(issue.id).unwrap();
        assert!(pending_after.is_empty());
    }

    #[test]
    fn tool_use_entry_gets_companion_row() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "Demo").unwrap();
        let issue = store.create_issue(project.id, "t").unwrap();

        let log_id = Uuid::new_v4();
        let tool_call = ToolCallRow {
            id: Uuid::new_v4(),
            log_id,
            issue_id: issue.id,
            tool_name: "bash".into(),
            tool_call_id: Some("call-1".into()),
            kind: ie_domain::ToolKind::CommandRun,
            is_result: false,
            raw: serde_json::json!({"command": "ls"}),
        };
        let entry = LogEntry {
            id: log_id,
            issue_id: issue.id,
            turn_index: 1,
            entry_index: 0,
            entry_type: ie_domain::EntryType::ToolUse,
            content: "ignored".into(),
            metadata: Default::default(),
            reply_to_message_id: None,
            timestamp: Utc::now(),
            tool_call_ref_id: None,
            visible: true,
        };
        let persisted = store.append_log_entry(entry, Some(tool_call)).unwrap();
        assert!(persisted.tool_call_ref_id.is_some());
        assert!(persisted.content.is_empty());
    }
}
