//! Process Manager + Log Normalizer: supervises spawned agent
//! subprocesses, keyed by execution id and grouped by issue id, and
//! turns their raw output into normalized entries (§4.C4, §4.C5).

pub mod manager;
pub mod ring_buffer;
pub mod stream_process;
pub mod worktree;

pub use manager::{ExecutionState, ManagedProcess, ProcessHandle, ProcessManager};
pub use ring_buffer::RingBuffer;
pub use stream_process::StreamProcess;
