//! Reconciler (§4.C11): convergence guarantee that issues never get
//! stuck in `working` once their execution is actually gone. Three
//! drivers — startup, periodic, and settled-triggered — all funnel into
//! the same idempotent stale-working sweep.

use std::sync::Arc;
use std::time::Duration;

use ie_domain::config::ReconcilerConfig;
use ie_domain::{IssueStatus, Result, SessionStatus};
use ie_process::ProcessManager;
use ie_store::Store;

use crate::event_bus::{Event, EventBus};

pub struct Reconciler {
    store: Arc<Store>,
    processes: Arc<ProcessManager>,
    events: Arc<EventBus>,
    periodic_interval: Duration,
    settled_delay: Duration,
}

impl Reconciler {
    pub fn new(store: Arc<Store>, processes: Arc<ProcessManager>, events: Arc<EventBus>, config: &ReconcilerConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            processes,
            events,
            periodic_interval: Duration::from_millis(config.periodic_interval_ms),
            settled_delay: Duration::from_millis(config.settled_triggered_delay_ms),
        })
    }

    /// Startup driver: every non-deleted issue whose session is still
    /// `running`/`pending` from a previous process lifetime (this process
    /// holds no in-memory execution for it) gets marked `failed`, then the
    /// stale-working sweep runs.
    pub fn run_startup_sweep(&self) -> Result<()> {
        let stale = self
            .store
            .list_issues_by_session_status(&[SessionStatus::Running, SessionStatus::Pending])?;
        for issue in stale {
            self.store.set_session_status(issue.id, Some(SessionStatus::Failed))?;
        }
        self.run_stale_working_sweep()
    }

    /// Stale-working sweep: a `working` issue with no active in-memory
    /// process is moved to `review`; if its session status is not
    /// terminal, it is marked `failed` too. Idempotent by construction —
    /// an issue already moved to `review` is no longer selected.
    pub fn run_stale_working_sweep(&self) -> Result<()> {
        let working = self.store.list_issues_by_status(IssueStatus::Working)?;
        for issue in working {
            if self.processes.has_active_in_group(issue.id) {
                continue;
            }
            self.store.set_issue_status(issue.id, IssueStatus::Review)?;
            if !issue
                .session
                .session_status
                .map(|s| s.is_terminal())
                .unwrap_or(false)
            {
                self.store.set_session_status(issue.id, Some(SessionStatus::Failed))?;
            }
            self.events.publish(Event::IssueUpdated {
                issue_id: issue.id,
                changes: serde_json::json!({ "statusId": "review" }),
            });
        }
        Ok(())
    }

    /// Spawns the periodic sweep loop; never returns.
    pub fn spawn_periodic(self: &Arc<Self>) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reconciler.periodic_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(e) = reconciler.run_stale_working_sweep() {
                    tracing::warn!(error = %e, "periodic reconciliation sweep failed");
                }
            }
        });
    }

    /// Schedules a one-shot sweep `settled_delay` after a `settled` event.
    pub fn schedule_settled_triggered(self: &Arc<Self>) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(reconciler.settled_delay).await;
            if let Err(e) = reconciler.run_stale_working_sweep() {
                tracing::warn!(error = %e, "settled-triggered reconciliation sweep failed");
            }
        });
    }
}
