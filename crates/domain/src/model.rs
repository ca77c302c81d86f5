//! The durable data model: projects, issues, log entries, tool calls,
//! attachments and app settings. These types are store-agnostic — the
//! `store` crate maps them onto rows, the `runtime` crate mutates them
//! through the lifecycle state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Project
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub alias: String,
    pub name: String,
    pub description: Option<String>,
    pub directory: Option<String>,
    pub repository_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Issue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Todo,
    Working,
    Review,
    Done,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Todo => "todo",
            IssueStatus::Working => "working",
            IssueStatus::Review => "review",
            IssueStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "working" => Some(Self::Working),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            _ => None,
        }
    }
}

/// DAG: `None -> Pending -> Running -> {Completed, Failed, Cancelled}`.
/// Terminal states are absorbing for the current session; a follow-up
/// starts a new run while keeping the same `external_session_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Fields that only make sense once an issue has an associated agent
/// session. Kept as a nested struct so the lifecycle controller can pass
/// it around as one unit of "what changed this turn".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFields {
    pub engine_type: Option<String>,
    pub session_status: Option<SessionStatus>,
    pub prompt: Option<String>,
    pub external_session_id: Option<String>,
    pub model: Option<String>,
    pub base_commit_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub project_id: Uuid,
    pub status_id: IssueStatus,
    pub issue_number: i64,
    pub title: String,
    pub priority: i32,
    pub sort_order: i64,
    pub parent_issue_id: Option<Uuid>,
    pub use_worktree: bool,
    pub session: SessionFields,
    pub dev_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_deleted: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LogEntry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    UserMessage,
    AssistantMessage,
    ToolUse,
    ErrorMessage,
    SystemMessage,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::UserMessage => "user-message",
            EntryType::AssistantMessage => "assistant-message",
            EntryType::ToolUse => "tool-use",
            EntryType::ErrorMessage => "error-message",
            EntryType::SystemMessage => "system-message",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user-message" => Some(Self::UserMessage),
            "assistant-message" => Some(Self::AssistantMessage),
            "tool-use" => Some(Self::ToolUse),
            "error-message" => Some(Self::ErrorMessage),
            "system-message" => Some(Self::SystemMessage),
            _ => None,
        }
    }
}

/// `metadata` is an opaque JSON map — normalizers and the lifecycle stash
/// engine-specific flags here (`type: "pending"`, `turnCompleted`, token
/// counts, ...). The store persists it as JSON text.
pub type Metadata = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub turn_index: i64,
    pub entry_index: i64,
    pub entry_type: EntryType,
    pub content: String,
    pub metadata: Metadata,
    pub reply_to_message_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub tool_call_ref_id: Option<Uuid>,
    pub visible: bool,
}

impl LogEntry {
    pub fn is_pending(&self) -> bool {
        self.entry_type == EntryType::UserMessage
            && self.visible
            && self
                .metadata
                .get("type")
                .and_then(|v| v.as_str())
                .map(|t| t == "pending")
                .unwrap_or(false)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    FileRead,
    FileEdit,
    CommandRun,
    Search,
    WebFetch,
    Task,
    Tool,
    Other,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::FileRead => "file-read",
            ToolKind::FileEdit => "file-edit",
            ToolKind::CommandRun => "command-run",
            ToolKind::Search => "search",
            ToolKind::WebFetch => "web-fetch",
            ToolKind::Task => "task",
            ToolKind::Tool => "tool",
            ToolKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRow {
    pub id: Uuid,
    pub log_id: Uuid,
    pub issue_id: Uuid,
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub kind: ToolKind,
    pub is_result: bool,
    pub raw: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attachment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub issue_id: Uuid,
    pub log_id: Option<Uuid>,
    pub original_name: String,
    pub stored_name: String,
    pub mime_type: String,
    pub size: i64,
    pub storage_path: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AppSetting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSetting {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalized entry — what an executor's parser hands back to C5
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One unit of output from a normalizer parse. A single stdout line can
/// legitimately expand into zero, one, or several of these (an assistant
/// message block carrying multiple tool calls, for instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEntry {
    pub entry_type: EntryType,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub tool_call: Option<NormalizedToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedToolCall {
    pub tool_name: String,
    pub tool_call_id: Option<String>,
    pub kind: ToolKind,
    pub is_result: bool,
    pub raw: serde_json::Value,
}

impl NormalizedEntry {
    /// Per the normalizer's logical-failure contract: `result`/`turn/completed`
    /// summaries carry `metadata.turnCompleted = true`.
    pub fn is_turn_completed(&self) -> bool {
        self.metadata
            .get("turnCompleted")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn is_logical_failure(&self) -> bool {
        self.metadata
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.metadata.get("failureReason").and_then(|v| v.as_str())
    }
}
