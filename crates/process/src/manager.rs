//! Keyed registry of live agent subprocesses (§4.C4). Grounded on the
//! teacher's background-session registry: an `Arc<RwLock<...>>` per
//! entry behind a single `RwLock<HashMap<...>>` index, with termination
//! racing a soft-cancel against a kill timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ie_domain::config::ConcurrencyConfig;
use ie_domain::Result;
use ie_rpc::Multiplexer;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::ring_buffer::RingBuffer;
use crate::stream_process::StreamProcess;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionState::Running)
    }
}

pub enum ProcessHandle {
    Stream(Arc<StreamProcess>),
    Rpc(Arc<Multiplexer>),
}

/// Lifecycle-controller bookkeeping, owned exclusively by C9 and accessed
/// read-only elsewhere. Kept inline on `ManagedProcess` rather than a side
/// table since it only ever exists alongside a live execution.
pub struct ManagedProcess {
    pub execution_id: Uuid,
    pub issue_id: Uuid,
    pub engine_type: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub ring_buffer: RingBuffer,
    pub handle: ProcessHandle,

    pub retry_count: u32,
    pub turn_in_flight: bool,
    pub turn_settled: bool,
    pub queue_cancel_requested: bool,
    pub cancelled_by_user: bool,
    pub logical_failure: bool,
    pub logical_failure_reason: Option<String>,
    pub meta_turn: bool,
    pub worktree_path: Option<String>,
    /// Follow-up prompts that arrived while a turn was in flight, oldest
    /// first.
    pub pending_inputs: std::collections::VecDeque<String>,
}

impl ManagedProcess {
    pub fn new(
        execution_id: Uuid,
        issue_id: Uuid,
        engine_type: impl Into<String>,
        handle: ProcessHandle,
        ring_buffer_capacity: usize,
    ) -> Self {
        Self {
            execution_id,
            issue_id,
            engine_type: engine_type.into(),
            state: ExecutionState::Running,
            started_at: Utc::now(),
            finished_at: None,
            ring_buffer: RingBuffer::new(ring_buffer_capacity),
            handle,
            retry_count: 0,
            turn_in_flight: true,
            turn_settled: false,
            queue_cancel_requested: false,
            cancelled_by_user: false,
            logical_failure: false,
            logical_failure_reason: None,
            meta_turn: false,
            worktree_path: None,
            pending_inputs: std::collections::VecDeque::new(),
        }
    }
}

/// Registry of all executions the server currently knows about, keyed by
/// execution id and grouped by issue id.
pub struct ProcessManager {
    executions: RwLock<HashMap<Uuid, Arc<RwLock<ManagedProcess>>>>,
    kill_timeout_ms: u64,
    auto_cleanup_delay_ms: u64,
    gc_interval_ms: u64,
}

impl ProcessManager {
    pub fn new(config: &ConcurrencyConfig) -> Arc<Self> {
        Arc::new(Self {
            executions: RwLock::new(HashMap::new()),
            kill_timeout_ms: config.kill_timeout_ms,
            auto_cleanup_delay_ms: config.auto_cleanup_delay_ms,
            gc_interval_ms: config.gc_interval_ms,
        })
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn register(&self, process: ManagedProcess) -> Arc<RwLock<ManagedProcess>> {
        let id = process.execution_id;
        let arc = Arc::new(RwLock::new(process));
        self.executions.write().insert(id, arc.clone());
        arc
    }

    pub fn get(&self, execution_id: Uuid) -> Option<Arc<RwLock<ManagedProcess>>> {
        self.executions.read().get(&execution_id).cloned()
    }

    pub fn get_active(&self) -> Vec<Arc<RwLock<ManagedProcess>>> {
        self.executions
            .read()
            .values()
            .filter(|p| p.read().state == ExecutionState::Running)
            .cloned()
            .collect()
    }

    pub fn get_first_active_in_group(&self, issue_id: Uuid) -> Option<Arc<RwLock<ManagedProcess>>> {
        self.executions
            .read()
            .values()
            .find(|p| {
                let p = p.read();
                p.issue_id == issue_id && p.state == ExecutionState::Running
            })
            .cloned()
    }

    pub fn has_active_in_group(&self, issue_id: Uuid) -> bool {
        self.get_first_active_in_group(issue_id).is_some()
    }

    /// Idempotent: re-applying the same terminal state does not schedule a
    /// second cleanup timer.
    pub fn transition_state(self: &Arc<Self>, execution_id: Uuid, new_state: ExecutionState) {
        let Some(arc) = self.get(execution_id) else {
            return;
        };
        let already_terminal = {
            let mut p = arc.write();
            let was_terminal = p.state.is_terminal();
            if p.state == new_state {
                return;
            }
            p.state = new_state;
            if new_state.is_terminal() {
                p.finished_at = Some(Utc::now());
            }
            was_terminal
        };
        if already_terminal {
            return;
        }
        if new_state.is_terminal() {
            self.schedule_auto_cleanup(execution_id);
        }
    }

    pub fn mark_completed(self: &Arc<Self>, execution_id: Uuid) {
        self.transition_state(execution_id, ExecutionState::Completed);
    }

    pub fn mark_failed(self: &Arc<Self>, execution_id: Uuid) {
        self.transition_state(execution_id, ExecutionState::Failed);
    }

    fn schedule_auto_cleanup(self: &Arc<Self>, execution_id: Uuid) {
        let manager = self.clone();
        let delay = Duration::from_millis(self.auto_cleanup_delay_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(p) = manager.executions.read().get(&execution_id) {
                if !p.read().state.is_terminal() {
                    return;
                }
            }
            manager.executions.write().remove(&execution_id);
        });
    }

    /// Soft-cancel then race process exit against the kill timeout; on
    /// timeout, hard-kill. `soft_cancel` is the caller's best-effort
    /// interrupt (RPC `turn/interrupt`, or a no-op for stream agents with
    /// no soft-cancel support).
    pub async fn terminate<F, Fut>(self: &Arc<Self>, execution_id: Uuid, soft_cancel: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let Some(arc) = self.get(execution_id) else {
            return Ok(());
        };

        if let Err(e) = soft_cancel().await {
            tracing::debug!(execution_id = %execution_id, error = %e, "soft-cancel failed, falling back to kill timeout");
        }

        let handle_wait = {
            let p = arc.read();
            match &p.handle {
                ProcessHandle::Stream(sp) => Waitable::Stream(sp.clone()),
                ProcessHandle::Rpc(mux) => Waitable::Rpc(mux.clone()),
            }
        };

        let timeout = Duration::from_millis(self.kill_timeout_ms);
        let exited = match &handle_wait {
            Waitable::Stream(sp) => tokio::time::timeout(timeout, sp.wait()).await,
            Waitable::Rpc(mux) => tokio::time::timeout(timeout, mux.wait()).await,
        };

        if exited.is_err() {
            match handle_wait {
                Waitable::Stream(sp) => sp.kill().await?,
                Waitable::Rpc(mux) => mux.kill().await?,
            }
        }

        self.transition_state(execution_id, ExecutionState::Cancelled);
        Ok(())
    }

    /// Terminate every active execution in `issue_id`'s group, running
    /// `on_each` (e.g. a settle/cleanup callback) after each one.
    pub async fn terminate_group<F, Fut>(self: &Arc<Self>, issue_id: Uuid, on_each: F)
    where
        F: Fn(Uuid) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let ids: Vec<Uuid> = self
            .executions
            .read()
            .values()
            .filter(|p| {
                let p = p.read();
                p.issue_id == issue_id && p.state == ExecutionState::Running
            })
            .map(|p| p.read().execution_id)
            .collect();

        for id in ids {
            let _ = self.terminate(id, || async { Ok(()) }).await;
            on_each(id).await;
        }
    }

    /// Background GC backstop: remove anything that reached a terminal
    /// state long enough ago that its auto-cleanup timer should already
    /// have fired but didn't (process restart, lost timer, etc).
    pub fn gc_sweep(&self) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(self.auto_cleanup_delay_ms as i64 * 2);
        self.executions.write().retain(|_, p| {
            let p = p.read();
            match p.finished_at {
                Some(finished) => finished > cutoff,
                None => true,
            }
        });
    }
}

enum Waitable {
    Stream(Arc<StreamProcess>),
    Rpc(Arc<Multiplexer>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ConcurrencyConfig {
        let mut config = ConcurrencyConfig::default();
        config.kill_timeout_ms = 50;
        config.auto_cleanup_delay_ms = 50;
        config
    }

    async fn spawn_stream_handle(script: &str) -> ProcessHandle {
        let spec = ie_executors::CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            envs: Vec::new(),
            cwd: None,
        };
        let strategy: Arc<dyn ie_executors::ExecutorStrategy> = Arc::new(ie_executors::EchoExecutor);
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        ProcessHandle::Stream(StreamProcess::spawn(&spec, strategy, tx).unwrap())
    }

    #[tokio::test]
    async fn transition_to_terminal_is_idempotent() {
        let manager = ProcessManager::new(&test_config());
        let handle = spawn_stream_handle("true").await;
        let id = Uuid::new_v4();
        manager.register(ManagedProcess::new(id, Uuid::new_v4(), "echo", handle, 100));
        manager.transition_state(id, ExecutionState::Completed);
        manager.transition_state(id, ExecutionState::Completed);
        assert_eq!(manager.get(id).unwrap().read().state, ExecutionState::Completed);
    }

    #[tokio::test]
    async fn has_active_in_group_reflects_running_state() {
        let manager = ProcessManager::new(&test_config());
        let handle = spawn_stream_handle("sleep 1").await;
        let issue_id = Uuid::new_v4();
        let id = Uuid::new_v4();
        manager.register(ManagedProcess::new(id, issue_id, "echo", handle, 100));
        assert!(manager.has_active_in_group(issue_id));
        manager.transition_state(id, ExecutionState::Completed);
        assert!(!manager.has_active_in_group(issue_id));
    }

    #[tokio::test]
    async fn terminate_kills_after_timeout_when_soft_cancel_does_not_exit_process() {
        let manager = ProcessManager::new(&test_config());
        let handle = spawn_stream_handle("sleep 30").await;
        let id = Uuid::new_v4();
        manager.register(ManagedProcess::new(id, Uuid::new_v4(), "echo", handle, 100));
        manager.terminate(id, || async { Ok(()) }).await.unwrap();
        assert_eq!(manager.get(id).unwrap().read().state, ExecutionState::Cancelled);
    }

    #[tokio::test]
    async fn auto_cleanup_removes_execution_after_delay() {
        let manager = ProcessManager::new(&test_config());
        let handle = spawn_stream_handle("true").await;
        let id = Uuid::new_v4();
        manager.register(ManagedProcess::new(id, Uuid::new_v4(), "echo", handle, 100));
        manager.transition_state(id, ExecutionState::Completed);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(manager.get(id).is_none());
    }
}
