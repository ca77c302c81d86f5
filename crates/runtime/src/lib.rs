//! Runtime: C6 through C12. Persistence writer, event bus, per-issue
//! lock, lifecycle controller, orchestration API, reconciler, and the
//! discovery/probe layer, wired together into the pieces the server
//! binary assembles at startup.

pub mod cancel;
pub mod discovery;
pub mod event_bus;
pub mod issue_lock;
pub mod lifecycle;
pub mod orchestration;
pub mod persistence;
pub mod reconciler;

pub use cancel::{CancelMap, CancelToken};
pub use discovery::{Discovery, EngineProbe, ProbeAvailability, ProbeModel};
pub use event_bus::{Event, EventBus, IssueState};
pub use issue_lock::{IssueLockGuard, IssueLockMap};
pub use lifecycle::LifecycleController;
pub use orchestration::{BusyAction, ExecuteResult, FollowUpRequest, Orchestrator};
pub use persistence::PersistenceWriter;
pub use reconciler::Reconciler;
