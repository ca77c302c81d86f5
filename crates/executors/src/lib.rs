//! Per-agent-type executor strategies: builds subprocess commands, maps
//! raw output into the common normalized entry model, and answers
//! discovery probes (§4.C2).

pub mod codex;
pub mod echo;
pub mod env;
pub mod jsonl;
pub mod registry;
pub mod traits;

pub use codex::CodexExecutor;
pub use echo::EchoExecutor;
pub use jsonl::JsonlExecutor;
pub use registry::ExecutorRegistry;
pub use traits::{
    AvailabilityRecord, CommandSpec, ExecutorStrategy, FollowUpOptions, ModelInfo, Protocol, SpawnOptions,
};
