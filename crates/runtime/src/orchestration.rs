//! Orchestration API (§4.C10): the only entry points that mutate issue
//! execution state. Every operation runs under the issue's per-issue
//! lock (C8) before touching the process manager or the store.

use std::path::PathBuf;
use std::sync::Arc;

use ie_domain::config::ConcurrencyConfig;
use ie_domain::{Error, EntryType, Issue, IssueStatus, Metadata, NormalizedEntry, Result, SessionStatus};
use ie_executors::{ExecutorRegistry, SpawnOptions};
use ie_process::{worktree, ExecutionState, ProcessHandle, ProcessManager};
use ie_store::Store;
use uuid::Uuid;

use crate::event_bus::{Event, EventBus, IssueState};
use crate::issue_lock::IssueLockMap;
use crate::lifecycle::LifecycleController;
use crate::persistence::PersistenceWriter;

/// What a follow-up should do when the current turn is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyAction {
    #[default]
    Queue,
    Cancel,
}

#[derive(Debug, Clone, Default)]
pub struct FollowUpRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub permission_mode: Option<String>,
    pub busy_action: BusyAction,
}

pub struct ExecuteResult {
    pub execution_id: Uuid,
    pub message_id: Uuid,
}

pub struct Orchestrator {
    store: Arc<Store>,
    executors: Arc<ExecutorRegistry>,
    processes: Arc<ProcessManager>,
    persistence: Arc<PersistenceWriter>,
    events: Arc<EventBus>,
    lifecycle: Arc<LifecycleController>,
    locks: Arc<IssueLockMap>,
    max_concurrent_executions: usize,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        executors: Arc<ExecutorRegistry>,
        processes: Arc<ProcessManager>,
        persistence: Arc<PersistenceWriter>,
        events: Arc<EventBus>,
        lifecycle: Arc<LifecycleController>,
        concurrency: &ConcurrencyConfig,
    ) -> Arc<Self> {
        let locks = Arc::new(IssueLockMap::new(
            concurrency.lock_max_queue_depth,
            concurrency.lock_acquire_timeout_ms,
            concurrency.lock_execution_timeout_ms,
        ));
        Arc::new(Self {
            store,
            executors,
            processes,
            persistence,
            events,
            lifecycle,
            locks,
            max_concurrent_executions: concurrency.max_concurrent_executions,
        })
    }

    fn load_issue(&self, issue_id: Uuid) -> Result<Issue> {
        self.store
            .get_issue(issue_id)?
            .ok_or_else(|| Error::NotFound(format!("issue {issue_id}")))
    }

    /// **`executeIssue`**: validate no active process, resolve the engine,
    /// create a worktree and capture the base commit if the issue asks for
    /// one, spawn fresh, persist the user message, start the completion
    /// monitor.
    pub async fn execute_issue(
        self: &Arc<Self>,
        issue_id: Uuid,
        engine_type: &str,
        prompt: String,
        model: Option<String>,
        permission_mode: Option<String>,
    ) -> Result<ExecuteResult> {
        let orchestrator = self.clone();
        let engine_type = engine_type.to_string();
        self.locks
            .with_lock(issue_id, move || async move {
                let issue = orchestrator.load_issue(issue_id)?;
                if orchestrator.processes.has_active_in_group(issue_id) {
                    return Err(Error::InvalidState(format!("issue {issue_id} already has an active execution")));
                }
                if orchestrator.processes.get_active().len() >= orchestrator.max_concurrent_executions {
                    return Err(Error::InvalidState("max concurrent executions reached".into()));
                }
                let strategy = orchestrator
                    .executors
                    .get(&engine_type)
                    .ok_or_else(|| Error::NotFound(format!("engine {engine_type}")))?;

                let repo_root = orchestrator
                    .store
                    .get_project(issue.project_id)?
                    .and_then(|p| p.directory)
                    .map(PathBuf::from);

                let worktree_path = if issue.use_worktree {
                    let repo_root = repo_root
                        .clone()
                        .ok_or_else(|| Error::InvalidState("issue uses a worktree but its project has no directory configured".into()))?;
                    Some(worktree::create(&repo_root, issue_id).await?)
                } else {
                    None
                };
                let working_dir = worktree_path.clone().or_else(|| repo_root.clone());
                let base_commit_hash = match &working_dir {
                    Some(dir) => worktree::capture_base_commit_hash(dir).await,
                    None => None,
                };
                orchestrator
                    .store
                    .update_session_fields(issue_id, None, None, None, None, false, None, base_commit_hash.as_deref())?;

                let turn_index = orchestrator.persistence.next_turn_index(issue_id)?;
                let message_execution = Uuid::new_v4();
                orchestrator.persistence.begin_execution(message_execution);
                let message = orchestrator.persistence.persist(
                    issue_id,
                    message_execution,
                    turn_index,
                    NormalizedEntry {
                        entry_type: EntryType::UserMessage,
                        content: prompt.clone(),
                        metadata: Metadata::new(),
                        tool_call: None,
                    },
                )?;
                orchestrator.persistence.end_execution(message_execution);

                let opts = SpawnOptions {
                    prompt,
                    model,
                    working_dir,
                    permission_mode,
                };
                let execution_id = orchestrator.lifecycle.spawn_fresh(&issue, strategy, opts).await?;

                if let Some(path) = &worktree_path {
                    if let Some(arc) = orchestrator.processes.get(execution_id) {
                        arc.write().worktree_path = Some(path.display().to_string());
                    }
                }

                Ok(ExecuteResult {
                    execution_id,
                    message_id: message.id,
                })
            })
            .await
    }

    /// **`followUpIssue`**: requires an existing session. Three branches —
    /// no active process, busy (queue or soft-cancel-then-queue), or idle
    /// (send directly on the live channel, falling back to a fresh spawn).
    pub async fn follow_up_issue(self: &Arc<Self>, issue_id: Uuid, req: FollowUpRequest) -> Result<Uuid> {
        let orchestrator = self.clone();
        self.locks
            .with_lock(issue_id, move || async move {
                let issue = orchestrator.load_issue(issue_id)?;
                let engine_type = issue
                    .session
                    .engine_type
                    .clone()
                    .ok_or_else(|| Error::InvalidState("no engine associated with this issue yet".into()))?;
                if issue.session.external_session_id.is_none() {
                    return Err(Error::InvalidState("no prior session to follow up on".into()));
                }
                let strategy = orchestrator
                    .executors
                    .get(&engine_type)
                    .ok_or_else(|| Error::NotFound(format!("engine {engine_type}")))?;

                match orchestrator.processes.get_first_active_in_group(issue_id) {
                    None => {
                        orchestrator
                            .lifecycle
                            .spawn_follow_up_process(&issue, strategy, req.prompt, req.model)
                            .await
                    }
                    Some(arc) => {
                        let (execution_id, turn_in_flight, state) = {
                            let p = arc.read();
                            (p.execution_id, p.turn_in_flight, p.state)
                        };
                        let mid_turn = turn_in_flight || state != ExecutionState::Running;

                        if mid_turn {
                            arc.write().pending_inputs.push_back(req.prompt);
                            if req.busy_action == BusyAction::Cancel {
                                let already_cancelling = arc.read().queue_cancel_requested;
                                if !already_cancelling {
                                    arc.write().queue_cancel_requested = true;
                                    let mux = match &arc.read().handle {
                                        ProcessHandle::Rpc(mux) => Some(mux.clone()),
                                        ProcessHandle::Stream(_) => None,
                                    };
                                    let thread_id = mux.as_ref().and_then(|m| m.current_turn_id());
                                    let _ = strategy.cancel(mux.as_deref(), thread_id.as_deref()).await;
                                }
                            }
                            Ok(execution_id)
                        } else {
                            let prompt = req.prompt.clone();
                            match orchestrator.send_live(&arc, &prompt).await {
                                Ok(()) => {
                                    arc.write().turn_in_flight = true;
                                    Ok(execution_id)
                                }
                                Err(_) => {
                                    orchestrator
                                        .lifecycle
                                        .spawn_follow_up_process(&issue, strategy, req.prompt, req.model)
                                        .await
                                }
                            }
                        }
                    }
                }
            })
            .await
    }

    async fn send_live(&self, arc: &Arc<parking_lot::RwLock<ie_process::ManagedProcess>>, prompt: &str) -> Result<()> {
        let mux = {
            let p = arc.read();
            match &p.handle {
                ProcessHandle::Rpc(mux) => Some(mux.clone()),
                ProcessHandle::Stream(_) => None,
            }
        };
        match mux {
            Some(mux) => {
                let thread_id = mux.current_turn_id().ok_or_else(|| Error::Other("no active thread".into()))?;
                mux.send_user_message(&thread_id, prompt).await
            }
            None => Err(Error::Other("live follow-up requires an RPC-protocol executor".into())),
        }
    }

    /// **`cancelIssue`**: soft-cancel the active process for the issue via
    /// the engine's own interrupt mechanism, keeping it alive to accept the
    /// next turn. Only falls back to a hard kill when the executor has no
    /// RPC channel to interrupt on (stream-protocol engines), since those
    /// have no way to stop a turn short of ending the process. Persists
    /// `cancelled` immediately either way so reconciliation cannot
    /// reclassify the issue as `failed`.
    pub async fn cancel_issue(self: &Arc<Self>, issue_id: Uuid) -> Result<&'static str> {
        let orchestrator = self.clone();
        self.locks
            .with_lock(issue_id, move || async move {
                let mut any_active = false;
                if let Some(arc) = orchestrator.processes.get_first_active_in_group(issue_id) {
                    any_active = true;
                    arc.write().pending_inputs.clear();
                    arc.write().cancelled_by_user = true;
                    let execution_id = arc.read().execution_id;

                    let engine_type = orchestrator
                        .load_issue(issue_id)
                        .ok()
                        .and_then(|issue| issue.session.engine_type);
                    let strategy = engine_type.as_deref().and_then(|e| orchestrator.executors.get(e));
                    let mux = match &arc.read().handle {
                        ProcessHandle::Rpc(mux) => Some(mux.clone()),
                        ProcessHandle::Stream(_) => None,
                    };

                    match (strategy, &mux) {
                        (Some(strategy), Some(mux)) => {
                            let thread_id = mux.current_turn_id();
                            let _ = strategy.cancel(Some(mux.as_ref()), thread_id.as_deref()).await;
                        }
                        _ => {
                            let _ = orchestrator
                                .processes
                                .terminate(execution_id, || async { Ok(()) })
                                .await;
                        }
                    }
                }
                orchestrator.store.set_session_status(issue_id, Some(SessionStatus::Cancelled))?;
                orchestrator.events.publish(Event::State {
                    issue_id,
                    execution_id: Uuid::nil(),
                    state: IssueState::Cancelled,
                });
                Ok(if any_active { "interrupted" } else { "cancelled" })
            })
            .await
    }

    /// **`restartIssue`**: only allowed from `failed`/`cancelled`. Reuses
    /// the stored prompt/model.
    pub async fn restart_issue(self: &Arc<Self>, issue_id: Uuid) -> Result<Uuid> {
        let orchestrator = self.clone();
        self.locks
            .with_lock(issue_id, move || async move {
                let issue = orchestrator.load_issue(issue_id)?;
                let allowed = matches!(
                    issue.session.session_status,
                    Some(SessionStatus::Failed) | Some(SessionStatus::Cancelled)
                );
                if !allowed {
                    return Err(Error::InvalidState(format!(
                        "issue {issue_id} is not in a restartable session state"
                    )));
                }
                let engine_type = issue
                    .session
                    .engine_type
                    .clone()
                    .ok_or_else(|| Error::InvalidState("no engine associated with this issue".into()))?;
                let strategy = orchestrator
                    .executors
                    .get(&engine_type)
                    .ok_or_else(|| Error::NotFound(format!("engine {engine_type}")))?;
                orchestrator.lifecycle.spawn_retry(&issue, strategy).await
            })
            .await
    }

    /// **`cancelAll`**: hard-cancel every registered process. Used on
    /// shutdown; does not go through per-issue locks since it must not be
    /// blocked by a stuck lock.
    pub async fn cancel_all(&self) {
        for arc in self.processes.get_active() {
            let execution_id = arc.read().execution_id;
            let _ = self.processes.terminate(execution_id, || async { Ok(()) }).await;
        }
    }

    /// Move an issue's current owning status back to `todo` is out of
    /// scope here; `change_status` exists for the plain Kanban-drag path
    /// that does not touch execution state at all.
    pub fn change_status(&self, issue_id: Uuid, status: IssueStatus) -> Result<()> {
        self.store.set_issue_status(issue_id, status)?;
        self.events.publish(Event::IssueUpdated {
            issue_id,
            changes: serde_json::json!({ "statusId": status.as_str() }),
        });
        Ok(())
    }
}
