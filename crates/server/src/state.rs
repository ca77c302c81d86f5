//! Shared application state passed to every HTTP handler. Grounded on the
//! teacher's `AppState` — one `Clone`-able struct of `Arc<...>` services,
//! grouped by concern.

use std::sync::Arc;

use ie_domain::config::Config;
use ie_executors::ExecutorRegistry;
use ie_process::ProcessManager;
use ie_runtime::{Discovery, EventBus, Orchestrator, PersistenceWriter, Reconciler};
use ie_store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Durable state ────────────────────────────────────────────────
    pub store: Arc<Store>,

    // ── Engines ──────────────────────────────────────────────────────
    pub executors: Arc<ExecutorRegistry>,
    pub discovery: Arc<Discovery>,

    // ── Runtime ──────────────────────────────────────────────────────
    pub processes: Arc<ProcessManager>,
    pub persistence: Arc<PersistenceWriter>,
    pub events: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub reconciler: Arc<Reconciler>,
}
