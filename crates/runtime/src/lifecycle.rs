//! Lifecycle Controller (§4.C9) — the core state machine driving one
//! execution from spawn through turn-completion to settlement. Grounded
//! on the teacher's turn-streaming state machine: an async handler per
//! observable event (`handle_turn_completed`, `monitor_completion`),
//! explicit finalize/settle functions, and suspension points awaited via
//! background tasks, generalized from one LLM conversational turn to one
//! agent subprocess's full lifetime.

use std::sync::Arc;

use ie_domain::config::ConcurrencyConfig;
use ie_domain::{Error, EntryType, Issue, Metadata, NormalizedEntry, Result, SessionStatus};
use ie_executors::{CommandSpec, ExecutorRegistry, ExecutorStrategy, FollowUpOptions, Protocol, SpawnOptions};
use ie_process::{ExecutionState, ManagedProcess, ProcessHandle, ProcessManager};
use ie_rpc::Multiplexer;
use ie_store::Store;
use regex::Regex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cancel::CancelMap;
use crate::event_bus::{Event, EventBus, IssueState};
use crate::persistence::PersistenceWriter;

fn session_missing_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)no conversation found|session").unwrap())
}

fn looks_like_missing_session(reason: &str) -> bool {
    session_missing_pattern().is_match(reason)
}

pub struct LifecycleController {
    store: Arc<Store>,
    executors: Arc<ExecutorRegistry>,
    processes: Arc<ProcessManager>,
    persistence: Arc<PersistenceWriter>,
    events: Arc<EventBus>,
    cancels: Arc<CancelMap>,
    max_auto_retries: u32,
    ring_buffer_capacity: usize,
}

enum Waitable {
    Stream(Arc<ie_process::StreamProcess>),
    Rpc(Arc<Multiplexer>),
}

impl LifecycleController {
    pub fn new(
        store: Arc<Store>,
        executors: Arc<ExecutorRegistry>,
        processes: Arc<ProcessManager>,
        persistence: Arc<PersistenceWriter>,
        events: Arc<EventBus>,
        cancels: Arc<CancelMap>,
        concurrency: &ConcurrencyConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            executors,
            processes,
            persistence,
            events,
            cancels,
            max_auto_retries: concurrency.max_auto_retries,
            ring_buffer_capacity: concurrency.ring_buffer_capacity,
        })
    }

    fn to_issue_state(state: ExecutionState) -> IssueState {
        match state {
            ExecutionState::Running => IssueState::Running,
            ExecutionState::Completed => IssueState::Completed,
            ExecutionState::Failed => IssueState::Failed,
            ExecutionState::Cancelled => IssueState::Cancelled,
        }
    }

    fn to_session_status(state: ExecutionState) -> Option<SessionStatus> {
        match state {
            ExecutionState::Running => Some(SessionStatus::Running),
            ExecutionState::Completed => Some(SessionStatus::Completed),
            ExecutionState::Failed => Some(SessionStatus::Failed),
            ExecutionState::Cancelled => Some(SessionStatus::Cancelled),
        }
    }

    /// `spawnFresh`: generate a random external session id, spawn, and
    /// persist whichever id the executor actually returns (it may differ,
    /// e.g. a Codex `threadId`).
    pub async fn spawn_fresh(
        self: &Arc<Self>,
        issue: &Issue,
        strategy: Arc<dyn ExecutorStrategy>,
        opts: SpawnOptions,
    ) -> Result<Uuid> {
        let command = strategy.build_command(&opts)?;
        let execution_id = Uuid::new_v4();
        let turn_index = self.persistence.next_turn_index(issue.id)?;

        let (handle, external_session_id, rx) = match strategy.protocol() {
            Protocol::Stream => {
                let generated = Uuid::new_v4().to_string();
                let (handle, rx) = self.spawn_stream(&command, strategy.clone())?;
                (handle, generated, rx)
            }
            Protocol::Rpc => {
                let (handle, session_id, rx) = self.spawn_rpc(&command, strategy.clone(), &opts).await?;
                (handle, session_id, rx)
            }
        };

        self.finish_spawn(issue, &strategy, execution_id, handle, external_session_id, opts, turn_index, rx)
    }

    /// `spawnWithSessionFallback`: try to resume the existing session; if
    /// the engine reports the session is gone, generate a fresh one and
    /// fall through to a plain spawn.
    pub async fn spawn_with_session_fallback(
        self: &Arc<Self>,
        issue: &Issue,
        strategy: Arc<dyn ExecutorStrategy>,
        opts: SpawnOptions,
        session_id: &str,
    ) -> Result<Uuid> {
        let follow_up = FollowUpOptions {
            prompt: opts.prompt.clone(),
            model: opts.model.clone(),
            working_dir: opts.working_dir.clone(),
            permission_mode: opts.permission_mode.clone(),
            external_session_id: session_id.to_string(),
        };

        match strategy.build_follow_up_command(&follow_up) {
            Ok(command) => {
                let execution_id = Uuid::new_v4();
                let turn_index = self.persistence.next_turn_index(issue.id)?;
                let (handle, rx) = match strategy.protocol() {
                    Protocol::Stream => self.spawn_stream(&command, strategy.clone())?,
                    Protocol::Rpc => {
                        let (handle, _session_id, rx) =
                            self.spawn_rpc(&command, strategy.clone(), &opts).await?;
                        (handle, rx)
                    }
                };
                self.finish_spawn(issue, &strategy, execution_id, handle, session_id.to_string(), opts, turn_index, rx)
            }
            Err(e) if looks_like_missing_session(&e.to_string()) => self.spawn_fresh(issue, strategy, opts).await,
            Err(e) => Err(e),
        }
    }

    /// `spawnRetry`: auto-retry path only, invoked while already inside
    /// the issue's lock domain. Picks follow-up vs fresh based on whether
    /// a session id survived.
    pub async fn spawn_retry(self: &Arc<Self>, issue: &Issue, strategy: Arc<dyn ExecutorStrategy>) -> Result<Uuid> {
        let opts = SpawnOptions {
            prompt: issue.session.prompt.clone().unwrap_or_default(),
            model: issue.session.model.clone(),
            working_dir: None,
            permission_mode: None,
        };
        match &issue.session.external_session_id {
            Some(session_id) => self.spawn_with_session_fallback(issue, strategy, opts, session_id).await,
            None => self.spawn_fresh(issue, strategy, opts).await,
        }
    }

    /// Before spawning a follow-up process: kill any leftover subprocess
    /// (safety net), flip session status to running, persist the user
    /// message, then spawn. Reverts session status on spawn failure.
    pub async fn spawn_follow_up_process(
        self: &Arc<Self>,
        issue: &Issue,
        strategy: Arc<dyn ExecutorStrategy>,
        prompt: String,
        model: Option<String>,
    ) -> Result<Uuid> {
        if let Some(existing) = self.processes.get_first_active_in_group(issue.id) {
            let id = existing.read().execution_id;
            let _ = self.processes.terminate(id, || async { Ok(()) }).await;
        }

        self.store.set_session_status(issue.id, Some(SessionStatus::Running))?;
        self.events.publish(Event::State {
            issue_id: issue.id,
            execution_id: Uuid::nil(),
            state: IssueState::Running,
        });

        let turn_index = self.persistence.next_turn_index(issue.id)?;
        let user_message_execution = Uuid::new_v4();
        self.persistence.begin_execution(user_message_execution);
        self.persistence.persist(
            issue.id,
            user_message_execution,
            turn_index,
            NormalizedEntry {
                entry_type: EntryType::UserMessage,
                content: prompt.clone(),
                metadata: Metadata::new(),
                tool_call: None,
            },
        )?;
        self.persistence.end_execution(user_message_execution);

        let opts = SpawnOptions {
            prompt,
            model,
            working_dir: None,
            permission_mode: None,
        };

        let result = match &issue.session.external_session_id {
            Some(session_id) => self.spawn_with_session_fallback(issue, strategy, opts, session_id).await,
            None => self.spawn_fresh(issue, strategy, opts).await,
        };

        if result.is_err() {
            let _ = self.store.set_session_status(issue.id, Some(SessionStatus::Failed));
            self.events.publish(Event::State {
                issue_id: issue.id,
                execution_id: Uuid::nil(),
                state: IssueState::Failed,
            });
        }
        result
    }

    /// Spawns the subprocess and wires its stdout/stderr pump, but does
    /// NOT start consuming entries yet — the caller must register the
    /// `ManagedProcess` first so the consumer never observes an
    /// execution id the process manager doesn't know about yet.
    fn spawn_stream(
        &self,
        command: &CommandSpec,
        strategy: Arc<dyn ExecutorStrategy>,
    ) -> Result<(ProcessHandle, mpsc::Receiver<NormalizedEntry>)> {
        let (tx, rx) = mpsc::channel(256);
        let process = ie_process::StreamProcess::spawn(command, strategy, tx)?;
        Ok((ProcessHandle::Stream(process), rx))
    }

    async fn spawn_rpc(
        &self,
        command: &CommandSpec,
        strategy: Arc<dyn ExecutorStrategy>,
        opts: &SpawnOptions,
    ) -> Result<(ProcessHandle, String, mpsc::Receiver<NormalizedEntry>)> {
        let mux = Multiplexer::spawn(&command.program, &command.args, &command.envs, command.cwd.as_deref())?;
        let session_id = strategy.rpc_handshake(&mux, opts).await?;

        let Some(mut notifications) = mux.take_notifications() else {
            return Err(Error::Other("multiplexer notifications already taken".into()));
        };
        let (tx, rx) = mpsc::channel(256);
        let strategy_for_map = strategy.clone();
        tokio::spawn(async move {
            while let Some(n) = notifications.recv().await {
                for entry in strategy_for_map.map_notification(&n.method, &n.params) {
                    if tx.send(entry).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok((ProcessHandle::Rpc(mux), session_id, rx))
    }

    /// The glue between C5 (normalizer output), C6 (persist), C7
    /// (publish) and C9 (turn-completion hook): persist-then-publish so
    /// subscribers never observe a row that isn't durable yet.
    fn spawn_entry_consumer(
        self: &Arc<Self>,
        execution_id: Uuid,
        issue_id: Uuid,
        turn_index: i64,
        mut rx: mpsc::Receiver<NormalizedEntry>,
    ) {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                let turn_completed = entry.is_turn_completed();
                let logical_failure = entry.is_logical_failure();
                let failure_reason = entry.failure_reason().map(|s| s.to_string());

                if let Some(arc) = controller.processes.get(execution_id) {
                    arc.write().ring_buffer.push(entry.clone());
                }

                if let Err(e) = controller.persistence.persist(issue_id, execution_id, turn_index, entry.clone()) {
                    tracing::warn!(issue_id = %issue_id, execution_id = %execution_id, error = %e, "failed to persist normalized entry");
                } else {
                    controller.events.publish(Event::Log {
                        issue_id,
                        execution_id,
                        entry: Box::new(entry),
                    });
                }

                if turn_completed {
                    controller
                        .handle_turn_completed(issue_id, execution_id, logical_failure, failure_reason)
                        .await;
                }
            }
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_spawn(
        self: &Arc<Self>,
        issue: &Issue,
        strategy: &Arc<dyn ExecutorStrategy>,
        execution_id: Uuid,
        handle: ProcessHandle,
        external_session_id: String,
        opts: SpawnOptions,
        turn_index: i64,
        rx: mpsc::Receiver<NormalizedEntry>,
    ) -> Result<Uuid> {
        let managed = ManagedProcess::new(execution_id, issue.id, strategy.engine_type(), handle, self.ring_buffer_capacity);
        self.processes.register(managed);
        self.persistence.begin_execution(execution_id);
        self.cancels.register(execution_id);
        self.spawn_entry_consumer(execution_id, issue.id, turn_index, rx);

        self.store.update_session_fields(
            issue.id,
            Some(strategy.engine_type()),
            Some(SessionStatus::Running),
            Some(&opts.prompt),
            Some(&external_session_id),
            false,
            opts.model.as_deref(),
            None,
        )?;

        self.events.publish(Event::State {
            issue_id: issue.id,
            execution_id,
            state: IssueState::Running,
        });

        self.spawn_monitor_completion(execution_id, issue.id);
        Ok(execution_id)
    }

    /// Fired by the entry consumer when it observes a turn-completion
    /// entry (`result`/`turn/completed`).
    async fn handle_turn_completed(
        self: &Arc<Self>,
        issue_id: Uuid,
        execution_id: Uuid,
        logical_failure: bool,
        failure_reason: Option<String>,
    ) {
        let Some(arc) = self.processes.get(execution_id) else {
            return;
        };
        {
            let mut p = arc.write();
            if p.state != ExecutionState::Running {
                return;
            }
            p.turn_in_flight = false;
            p.turn_settled = true;
            p.queue_cancel_requested = false;
            p.meta_turn = false;
            p.logical_failure = logical_failure;
            p.logical_failure_reason = failure_reason.clone();
        }

        let queued = { arc.read().pending_inputs.front().cloned() };
        if let Some(next_prompt) = queued {
            arc.write().pending_inputs.pop_front();
            if self.send_to_live_process(execution_id, &next_prompt).await.is_ok() {
                arc.write().turn_in_flight = true;
                return;
            }
        }

        let final_status = if logical_failure {
            ExecutionState::Failed
        } else {
            ExecutionState::Completed
        };
        self.events.publish(Event::State {
            issue_id,
            execution_id,
            state: Self::to_issue_state(final_status),
        });

        let repaired = final_status == ExecutionState::Failed
            && failure_reason.as_deref().map(looks_like_missing_session).unwrap_or(false);
        if repaired {
            // Clears the stale external session id so the next auto-retry
            // spawns fresh instead of trying to resume a dead session.
            // `settle_issue` below still writes the terminal `sessionStatus`.
            let _ = self
                .store
                .update_session_fields(issue_id, None, Some(SessionStatus::Failed), None, None, true, None, None);
        }

        // A concurrent `cancelIssue` call (outside this task, not under the
        // issue lock) may have already moved the session past this turn.
        // Don't let a late turn-completion clobber a cancellation.
        if let Ok(Some(current)) = self.store.get_issue(issue_id) {
            if current.session.session_status == Some(SessionStatus::Cancelled) {
                return;
            }
        }

        self.settle_issue(issue_id, execution_id, final_status).await;
    }

    async fn send_to_live_process(&self, execution_id: Uuid, prompt: &str) -> Result<()> {
        let Some(arc) = self.processes.get(execution_id) else {
            return Err(Error::NotFound(execution_id.to_string()));
        };
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
            None => Err(Error::Other("stream-protocol executors do not support live follow-up injection".into())),
        }
    }

    /// `settleIssue`: persist final session status, auto-move the issue to
    /// review, clear per-execution domain data, emit `settled`. Every path
    /// that ends an execution routes through here so `sessionStatus` always
    /// lands on a terminal value, regardless of which branch decided the
    /// execution was done.
    pub async fn settle_issue(self: &Arc<Self>, issue_id: Uuid, execution_id: Uuid, final_status: ExecutionState) {
        self.processes.transition_state(execution_id, final_status);

        if let Some(status) = Self::to_session_status(final_status) {
            let _ = self.store.set_session_status(issue_id, Some(status));
        }

        if let Ok(Some(issue)) = self.store.get_issue(issue_id) {
            if issue.status_id == ie_domain::IssueStatus::Working {
                let _ = self.store.set_issue_status(issue_id, ie_domain::IssueStatus::Review);
                self.events.publish(Event::IssueUpdated {
                    issue_id,
                    changes: serde_json::json!({ "statusId": "review" }),
                });
            }
        }

        self.persistence.end_execution(execution_id);
        self.cancels.remove(execution_id);

        self.events.publish(Event::Settled {
            issue_id,
            execution_id,
            final_status: Self::to_issue_state(final_status),
        });
    }

    /// Background task awaiting subprocess exit (`monitorCompletion`).
    fn spawn_monitor_completion(self: &Arc<Self>, execution_id: Uuid, issue_id: Uuid) {
        let controller = self.clone();
        tokio::spawn(async move {
            let Some(arc) = controller.processes.get(execution_id) else {
                return;
            };
            let handle = {
                let p = arc.read();
                match &p.handle {
                    ProcessHandle::Stream(sp) => Waitable::Stream(sp.clone()),
                    ProcessHandle::Rpc(mux) => Waitable::Rpc(mux.clone()),
                }
            };
            let exit = match handle {
                Waitable::Stream(sp) => sp.wait().await,
                Waitable::Rpc(mux) => mux.wait().await,
            };

            let (turn_settled, pending_input, cancelled_by_user, logical_failure, failure_reason, retry_count, engine_type) = {
                let p = arc.read();
                (
                    p.turn_settled,
                    p.pending_inputs.front().cloned(),
                    p.cancelled_by_user,
                    p.logical_failure,
                    p.logical_failure_reason.clone(),
                    p.retry_count,
                    p.engine_type.clone(),
                )
            };

            if turn_settled {
                // Already finalized by handle_turn_completed; only the
                // session-id-repair retry may still be owed.
                if logical_failure
                    && failure_reason.as_deref().map(looks_like_missing_session).unwrap_or(false)
                    && retry_count < controller.max_auto_retries
                {
                    arc.write().retry_count += 1;
                    if let (Ok(Some(issue)), Some(strategy)) =
                        (controller.store.get_issue(issue_id), controller.executors.get(&engine_type))
                    {
                        let _ = controller.spawn_retry(&issue, strategy).await;
                    }
                }
                return;
            }

            if let Some(next_prompt) = pending_input {
                arc.write().pending_inputs.pop_front();
                if let (Ok(Some(issue)), Some(strategy)) =
                    (controller.store.get_issue(issue_id), controller.executors.get(&engine_type))
                {
                    let model = issue.session.model.clone();
                    let _ = controller.spawn_follow_up_process(&issue, strategy, next_prompt, model).await;
                }
                return;
            }

            if cancelled_by_user {
                controller.settle_issue(issue_id, execution_id, ExecutionState::Cancelled).await;
                return;
            }

            let exit_ok = matches!(&exit, Ok(status) if status.success());
            if exit_ok && !logical_failure {
                controller.events.publish(Event::State {
                    issue_id,
                    execution_id,
                    state: IssueState::Completed,
                });
                controller.settle_issue(issue_id, execution_id, ExecutionState::Completed).await;
                return;
            }

            controller.events.publish(Event::State {
                issue_id,
                execution_id,
                state: IssueState::Failed,
            });
            if let Some(reason) = &failure_reason {
                if looks_like_missing_session(reason) {
                    let _ = controller.store.update_session_fields(
                        issue_id, None, Some(SessionStatus::Failed), None, None, true, None, None,
                    );
                }
            }
            if retry_count < controller.max_auto_retries {
                arc.write().retry_count += 1;
                if let (Ok(Some(issue)), Some(strategy)) =
                    (controller.store.get_issue(issue_id), controller.executors.get(&engine_type))
                {
                    let _ = controller.spawn_retry(&issue, strategy).await;
                    return;
                }
            }
            controller.settle_issue(issue_id, execution_id, ExecutionState::Failed).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_domain::config::ExecutorsConfig;

    fn setup() -> (Arc<LifecycleController>, Arc<Store>, Arc<ExecutorRegistry>) {
        let store = Store::open_in_memory().unwrap();
        let registry = Arc::new(ExecutorRegistry::from_config(&ExecutorsConfig::default()));
        let processes = ProcessManager::new(&ConcurrencyConfig::default());
        let persistence = Arc::new(PersistenceWriter::new(store.clone()));
        let events = Arc::new(EventBus::new());
        let cancels = Arc::new(CancelMap::new());
        let controller = LifecycleController::new(
            store.clone(),
            registry.clone(),
            processes,
            persistence,
            events,
            cancels,
            &ConcurrencyConfig::default(),
        );
        (controller, store, registry)
    }

    #[tokio::test]
    async fn spawn_fresh_with_echo_reaches_running_state() {
        let (controller, store, registry) = setup();
        let project = store.create_project("p", "P").unwrap();
        let issue = store.create_issue(project.id, "Issue").unwrap();
        let strategy = registry.get("echo").unwrap();

        let opts = SpawnOptions {
            prompt: "hello".into(),
            model: None,
            working_dir: None,
            permission_mode: None,
        };
        let execution_id = controller.spawn_fresh(&issue, strategy, opts).await.unwrap();

        let issue = store.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(issue.session.session_status, Some(SessionStatus::Running));
        assert!(issue.session.external_session_id.is_some());
        assert_ne!(execution_id, Uuid::nil());
    }

    #[tokio::test]
    async fn settle_issue_moves_working_issue_to_review() {
        let (controller, store, _registry) = setup();
        let project = store.create_project("p", "P").unwrap();
        let issue = store.create_issue(project.id, "Issue").unwrap();
        store.set_issue_status(issue.id, ie_domain::IssueStatus::Working).unwrap();

        let mut events = controller.events.subscribe();
        controller.settle_issue(issue.id, Uuid::new_v4(), ExecutionState::Completed).await;

        let refreshed = store.get_issue(issue.id).unwrap().unwrap();
        assert_eq!(refreshed.status_id, ie_domain::IssueStatus::Review);

        let ev1 = events.recv().await.unwrap();
        assert!(matches!(ev1, Event::IssueUpdated { .. }));
        let ev2 = events.recv().await.unwrap();
        assert!(matches!(ev2, Event::Settled { .. }));
    }

    #[test]
    fn session_missing_pattern_matches_common_phrasings() {
        assert!(looks_like_missing_session("no conversation found for thread"));
        assert!(looks_like_missing_session("Session expired"));
        assert!(!looks_like_missing_session("permission denied"));
    }
}
