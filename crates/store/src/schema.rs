use rusqlite::Connection;

use ie_domain::Result;

/// Bump when the table definitions below change. A mismatch against the
/// on-disk `PRAGMA user_version` triggers a rebuild — acceptable for this
/// embedded store since migrations-proper are out of scope (§1 non-goals).
pub const SCHEMA_VERSION: i32 = 1;

pub fn open(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| ie_domain::Error::Store(e.to_string()))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| ie_domain::Error::Store(e.to_string()))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| ie_domain::Error::Store(e.to_string()))?;
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))
        .map_err(|e| ie_domain::Error::Store(e.to_string()))?;
    init_schema(conn)?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| ie_domain::Error::Store(e.to_string()))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        tracing::warn!(
            on_disk = current_version,
            expected = SCHEMA_VERSION,
            "schema version mismatch, rebuilding (no migration path)"
        );
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            alias TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT,
            directory TEXT,
            repository_url TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS issues (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id),
            status_id TEXT NOT NULL CHECK (status_id IN ('todo','working','review','done')),
            issue_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0,
            parent_issue_id TEXT REFERENCES issues(id),
            use_worktree INTEGER NOT NULL DEFAULT 0,
            engine_type TEXT,
            session_status TEXT,
            prompt TEXT,
            external_session_id TEXT,
            model TEXT,
            base_commit_hash TEXT,
            dev_mode INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            UNIQUE(project_id, issue_number)
        );
        CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project_id);
        CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status_id);
        CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_issue_id);

        CREATE TABLE IF NOT EXISTS issues_logs (
            id TEXT PRIMARY KEY,
            issue_id TEXT NOT NULL REFERENCES issues(id),
            turn_index INTEGER NOT NULL,
            entry_index INTEGER NOT NULL,
            entry_type TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            reply_to_message_id TEXT,
            timestamp TEXT NOT NULL,
            tool_call_ref_id TEXT,
            visible INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_logs_order ON issues_logs(issue_id, turn_index, entry_index);

        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            issue_id TEXT NOT NULL REFERENCES issues(id),
            log_id TEXT REFERENCES issues_logs(id),
            original_name TEXT NOT NULL,
            stored_name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            storage_path TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS issues_logs_tools_call (
            id TEXT PRIMARY KEY,
            log_id TEXT NOT NULL REFERENCES issues_logs(id),
            issue_id TEXT NOT NULL REFERENCES issues(id),
            tool_name TEXT NOT NULL,
            tool_call_id TEXT,
            kind TEXT NOT NULL,
            is_result INTEGER NOT NULL,
            raw TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_tool_calls_log ON issues_logs_tools_call(log_id);

        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .map_err(|e| ie_domain::Error::Store(e.to_string()))?;

    conn.execute(&format!("PRAGMA user_version = {SCHEMA_VERSION}"), [])
        .map_err(|e| ie_domain::Error::Store(e.to_string()))?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS issues_logs_tools_call;
        DROP TABLE IF EXISTS attachments;
        DROP TABLE IF EXISTS issues_logs;
        DROP TABLE IF EXISTS issues;
        DROP TABLE IF EXISTS projects;
        DROP TABLE IF EXISTS app_settings;
        "#,
    )
    .map_err(|e| ie_domain::Error::Store(e.to_string()))?;
    Ok(())
}
