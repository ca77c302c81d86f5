//! Row <-> domain-model conversions. Kept separate from the query modules
//! so each query file reads as "what SQL runs", not "how do I parse a row".

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use ie_domain::{
    Attachment, EntryType, Issue, IssueStatus, LogEntry, Project, SessionFields, SessionStatus,
    ToolCallRow, ToolKind,
};

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_default()
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_metadata(s: &str) -> HashMap<String, serde_json::Value> {
    serde_json::from_str(s).unwrap_or_default()
}

pub fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: parse_uuid(&row.get::<_, String>(0)?),
        alias: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        directory: row.get(4)?,
        repository_url: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?),
        updated_at: parse_ts(&row.get::<_, String>(7)?),
        is_deleted: row.get::<_, i64>(8)? != 0,
    })
}

pub const PROJECT_COLUMNS: &str =
    "id, alias, name, description, directory, repository_url, created_at, updated_at, is_deleted";

pub fn issue_from_row(row: &Row) -> rusqlite::Result<Issue> {
    let status_id: String = row.get(2)?;
    let use_worktree: i64 = row.get(8)?;
    let engine_type: Option<String> = row.get(9)?;
    let session_status: Option<String> = row.get(10)?;
    let prompt: Option<String> = row.get(11)?;
    let external_session_id: Option<String> = row.get(12)?;
    let model: Option<String> = row.get(13)?;
    let base_commit_hash: Option<String> = row.get(14)?;
    Ok(Issue {
        id: parse_uuid(&row.get::<_, String>(0)?),
        project_id: parse_uuid(&row.get::<_, String>(1)?),
        status_id: IssueStatus::parse(&status_id).unwrap_or(IssueStatus::Todo),
        issue_number: row.get(3)?,
        title: row.get(4)?,
        priority: row.get(5)?,
        sort_order: row.get(6)?,
        parent_issue_id: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_uuid(&s)),
        use_worktree: use_worktree != 0,
        session: SessionFields {
            engine_type,
            session_status: session_status.and_then(|s| SessionStatus::parse(&s)),
            prompt,
            external_session_id,
            model,
            base_commit_hash,
        },
        dev_mode: row.get::<_, i64>(15)? != 0,
        created_at: parse_ts(&row.get::<_, String>(16)?),
        updated_at: parse_ts(&row.get::<_, String>(17)?),
        is_deleted: row.get::<_, i64>(18)? != 0,
    })
}

pub const ISSUE_COLUMNS: &str = "id, project_id, status_id, issue_number, title, priority, \
     sort_order, parent_issue_id, use_worktree, engine_type, session_status, prompt, \
     external_session_id, model, base_commit_hash, dev_mode, created_at, updated_at, is_deleted";

pub fn log_entry_from_row(row: &Row) -> rusqlite::Result<LogEntry> {
    let entry_type: String = row.get(4)?;
    Ok(LogEntry {
        id: parse_uuid(&row.get::<_, String>(0)?),
        issue_id: parse_uuid(&row.get::<_, String>(1)?),
        turn_index: row.get(2)?,
        entry_index: row.get(3)?,
        entry_type: EntryType::parse(&entry_type).unwrap_or(EntryType::SystemMessage),
        content: row.get(5)?,
        metadata: parse_metadata(&row.get::<_, String>(6)?),
        reply_to_message_id: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_uuid(&s)),
        timestamp: parse_ts(&row.get::<_, String>(8)?),
        tool_call_ref_id: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_uuid(&s)),
        visible: row.get::<_, i64>(10)? != 0,
    })
}

pub const LOG_COLUMNS: &str = "id, issue_id, turn_index, entry_index, entry_type, content, \
     metadata, reply_to_message_id, timestamp, tool_call_ref_id, visible";

pub fn tool_call_from_row(row: &Row) -> rusqlite::Result<ToolCallRow> {
    let kind: String = row.get(5)?;
    let raw: String = row.get(7)?;
    Ok(ToolCallRow {
        id: parse_uuid(&row.get::<_, String>(0)?),
        log_id: parse_uuid(&row.get::<_, String>(1)?),
        issue_id: parse_uuid(&row.get::<_, String>(2)?),
        tool_name: row.get(3)?,
        tool_call_id: row.get(4)?,
        kind: match kind.as_str() {
            "file-read" => ToolKind::FileRead,
            "file-edit" => ToolKind::FileEdit,
            "command-run" => ToolKind::CommandRun,
            "search" => ToolKind::Search,
            "web-fetch" => ToolKind::WebFetch,
            "task" => ToolKind::Task,
            "tool" => ToolKind::Tool,
            _ => ToolKind::Other,
        },
        is_result: row.get::<_, i64>(6)? != 0,
        raw: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
    })
}

pub const TOOL_CALL_COLUMNS: &str =
    "id, log_id, issue_id, tool_name, tool_call_id, kind, is_result, raw";

pub fn attachment_from_row(row: &Row) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: parse_uuid(&row.get::<_, String>(0)?),
        issue_id: parse_uuid(&row.get::<_, String>(1)?),
        log_id: row.get::<_, Option<String>>(2)?.map(|s| parse_uuid(&s)),
        original_name: row.get(3)?,
        stored_name: row.get(4)?,
        mime_type: row.get(5)?,
        size: row.get(6)?,
        storage_path: row.get(7)?,
    })
}

pub const ATTACHMENT_COLUMNS: &str =
    "id, issue_id, log_id, original_name, stored_name, mime_type, size, storage_path";
