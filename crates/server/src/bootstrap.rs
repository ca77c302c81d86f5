//! `AppState` construction and background-task spawning, extracted from
//! `main.rs` the way the teacher's `bootstrap.rs` separates "boot" from
//! "listen".

use std::sync::Arc;

use anyhow::Context;

use ie_domain::config::{Config, ConfigSeverity};
use ie_executors::ExecutorRegistry;
use ie_process::ProcessManager;
use ie_runtime::{CancelMap, Discovery, Event, EventBus, LifecycleController, Orchestrator, PersistenceWriter, Reconciler};
use ie_store::Store;

use crate::state::AppState;

/// Validate config and wire every subsystem into a fully-built [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Store ────────────────────────────────────────────────────────
    let store = Store::open(&config.store.db_path, config.store.busy_timeout_ms).context("opening store")?;
    tracing::info!(path = %config.store.db_path.display(), "store ready");

    // ── Executors ────────────────────────────────────────────────────
    let executors = Arc::new(ExecutorRegistry::from_config(&config.executors));
    for (engine, error) in executors.init_errors() {
        tracing::warn!(engine = %engine, error = %error, "executor failed to initialize");
    }
    tracing::info!(engines = executors.len(), "executor registry ready");

    let discovery = Arc::new(Discovery::new(executors.clone(), store.clone()));

    // ── Runtime plumbing ─────────────────────────────────────────────
    let processes = ProcessManager::new(&config.concurrency);
    let persistence = Arc::new(PersistenceWriter::new(store.clone()));
    let events = Arc::new(EventBus::new());
    let cancels = Arc::new(CancelMap::new());

    let lifecycle = LifecycleController::new(
        store.clone(),
        executors.clone(),
        processes.clone(),
        persistence.clone(),
        events.clone(),
        cancels,
        &config.concurrency,
    );
    let orchestrator = Orchestrator::new(
        store.clone(),
        executors.clone(),
        processes.clone(),
        persistence.clone(),
        events.clone(),
        lifecycle,
        &config.concurrency,
    );
    let reconciler = Reconciler::new(store.clone(), processes.clone(), events.clone(), &config.reconciler);
    tracing::info!("runtime wiring complete");

    Ok(AppState {
        config,
        store,
        executors,
        discovery,
        processes,
        persistence,
        events,
        orchestrator,
        reconciler,
    })
}

/// Spawn the long-running background tasks: startup reconciliation sweep,
/// then the periodic sweep driver. Call after [`build_app_state`], before
/// accepting traffic.
pub fn spawn_background_tasks(state: &AppState) {
    if let Err(e) = state.reconciler.run_startup_sweep() {
        tracing::warn!(error = %e, "startup reconciliation sweep failed");
    }
    state.reconciler.clone().spawn_periodic();
    spawn_settled_trigger(state);
    tracing::info!("background tasks spawned");
}

/// Every `settled` event fires one delayed stale-working sweep, so an
/// issue whose process just finished converges promptly instead of
/// waiting out the full periodic interval.
fn spawn_settled_trigger(state: &AppState) {
    let mut rx = state.events.subscribe();
    let reconciler = state.reconciler.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Event::Settled { .. }) => reconciler.schedule_settled_triggered(),
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
