//! Issue CRUD plus the orchestration entry points: `PATCH` drives status
//! transitions (moving into `working` with no active process triggers
//! `executeIssue`), and the three follow-up/cancel/restart routes are
//! thin wrappers over the Orchestration API.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use ie_domain::{EntryType, Issue, IssueStatus, LogEntry, Metadata, NormalizedEntry};
use ie_runtime::{BusyAction, FollowUpRequest};

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateIssueRequest {
    pub title: String,
}

pub async fn create_issue(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(req): Json<CreateIssueRequest>,
) -> Result<Json<Issue>, ApiError> {
    let project = state
        .store
        .get_project_by_alias(&project)?
        .ok_or_else(|| ie_domain::Error::NotFound(format!("project {project}")))?;
    let issue = state.store.create_issue(project.id, &req.title)?;
    Ok(Json(issue))
}

#[derive(Debug, Deserialize)]
pub struct PatchIssueRequest {
    pub status: Option<String>,
    pub engine_type: Option<String>,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PatchIssueResponse {
    pub issue: Issue,
    pub execution_id: Option<Uuid>,
}

/// Persists a user message flagged as pending (E2/E3's "pending-message
/// protocol"): the engine hasn't accepted it yet, so it stays
/// `visible = 1` until the next execution actually dispatches it.
fn persist_pending_message(state: &AppState, issue_id: Uuid, content: String) -> ie_domain::Result<()> {
    let turn_index = state.persistence.next_turn_index(issue_id)?;
    let marker_execution = Uuid::new_v4();
    state.persistence.begin_execution(marker_execution);
    let mut metadata = Metadata::new();
    metadata.insert("type".into(), json!("pending"));
    state.persistence.persist(
        issue_id,
        marker_execution,
        turn_index,
        NormalizedEntry { entry_type: EntryType::UserMessage, content, metadata, tool_call: None },
    )?;
    state.persistence.end_execution(marker_execution);
    Ok(())
}

/// E3: when an execution is about to spawn, any rows still pending get
/// folded into the effective prompt and marked dispatched together.
fn drain_pending_prompt(state: &AppState, issue_id: Uuid, explicit_prompt: Option<String>) -> ie_domain::Result<String> {
    let pending = state.store.list_pending_logs(issue_id)?;
    if pending.is_empty() {
        return explicit_prompt.ok_or_else(|| ie_domain::Error::InvalidState("prompt is required to start an execution".into()));
    }
    let mut parts: Vec<String> = pending.iter().map(|e| e.content.clone()).collect();
    if let Some(p) = explicit_prompt {
        parts.push(p);
    }
    let ids: Vec<Uuid> = pending.iter().map(|e| e.id).collect();
    state.store.mark_logs_dispatched(&ids)?;
    Ok(parts.join("\n\n"))
}

pub async fn patch_issue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PatchIssueRequest>,
) -> Result<Json<PatchIssueResponse>, ApiError> {
    let mut execution_id = None;

    if let Some(status) = &req.status {
        let status = IssueStatus::parse(status)
            .ok_or_else(|| ie_domain::Error::InvalidState(format!("unknown status {status}")))?;

        let triggers_execution = status == IssueStatus::Working && !state.processes.has_active_in_group(id);
        if triggers_execution {
            let engine_type = req
                .engine_type
                .clone()
                .ok_or_else(|| ie_domain::Error::InvalidState("engine_type is required to start an execution".into()))?;
            let prompt = drain_pending_prompt(&state, id, req.prompt.clone())?;
            state.store.set_issue_status(id, status)?;
            let result = state
                .orchestrator
                .execute_issue(id, &engine_type, prompt, req.model.clone(), req.permission_mode.clone())
                .await?;
            execution_id = Some(result.execution_id);
        } else {
            state.orchestrator.change_status(id, status)?;
        }
    }

    let issue = state
        .store
        .get_issue(id)?
        .ok_or_else(|| ie_domain::Error::NotFound(format!("issue {id}")))?;
    Ok(Json(PatchIssueResponse { issue, execution_id }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let all = state.store.list_logs(id)?;
    let offset = q.offset.unwrap_or(0);
    let limit = q.limit.unwrap_or(all.len());
    let page = all.into_iter().skip(offset).take(limit).collect();
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct FollowUpRequestBody {
    pub prompt: String,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub busy_action: Option<String>,
}

pub async fn follow_up(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FollowUpRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let issue = state
        .store
        .get_issue(id)?
        .ok_or_else(|| ie_domain::Error::NotFound(format!("issue {id}")))?;

    // E2: a follow-up against an issue with no live execution to accept it
    // (todo/done, or no session yet) is just persisted as a pending row —
    // it is not a new execution until the issue starts one.
    let active = state.processes.get_first_active_in_group(id);
    if active.is_none() && matches!(issue.status_id, IssueStatus::Todo | IssueStatus::Done) {
        persist_pending_message(&state, id, req.prompt)?;
        return Ok(Json(json!({ "queued": true })));
    }

    let busy_action = match req.busy_action.as_deref() {
        Some("cancel") => BusyAction::Cancel,
        _ => BusyAction::Queue,
    };
    // Otherwise "queued" (mid-turn) vs dispatched is whatever the live
    // process's turn state says.
    let queued = active
        .map(|arc| {
            let p = arc.read();
            p.turn_in_flight || p.state != ie_process::ExecutionState::Running
        })
        .unwrap_or(false);

    let execution_id = state
        .orchestrator
        .follow_up_issue(
            id,
            FollowUpRequest {
                prompt: req.prompt,
                model: req.model,
                permission_mode: req.permission_mode,
                busy_action,
            },
        )
        .await?;

    Ok(Json(json!({ "queued": queued, "executionId": execution_id })))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.orchestrator.cancel_issue(id).await?;
    Ok(Json(json!({ "result": result })))
}

pub async fn restart(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<serde_json::Value>, ApiError> {
    let execution_id = state.orchestrator.restart_issue(id).await?;
    Ok(Json(json!({ "executionId": execution_id })))
}
