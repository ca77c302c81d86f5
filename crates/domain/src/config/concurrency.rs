use serde::{Deserialize, Serialize};

/// Tunables for C4 (Process Manager), C8 (Per-Issue Lock) and the RPC
/// request watchdog, gathered in one place because they are all
/// "how long do we wait before giving up" knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// `MAX_CONCURRENT_EXECUTIONS` — soft cap enforced by the orchestration
    /// API before spawning a fresh execution.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_executions: usize,
    #[serde(default = "d_lock_queue_depth")]
    pub lock_max_queue_depth: usize,
    #[serde(default = "d_lock_acquire_timeout_ms")]
    pub lock_acquire_timeout_ms: u64,
    #[serde(default = "d_lock_execution_timeout_ms")]
    pub lock_execution_timeout_ms: u64,
    #[serde(default = "d_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    #[serde(default = "d_auto_cleanup_delay_ms")]
    pub auto_cleanup_delay_ms: u64,
    #[serde(default = "d_gc_interval_ms")]
    pub gc_interval_ms: u64,
    #[serde(default = "d_rpc_request_timeout_ms")]
    pub rpc_request_timeout_ms: u64,
    #[serde(default = "d_ring_buffer_capacity")]
    pub ring_buffer_capacity: usize,
    #[serde(default = "d_max_auto_retries")]
    pub max_auto_retries: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: d_max_concurrent(),
            lock_max_queue_depth: d_lock_queue_depth(),
            lock_acquire_timeout_ms: d_lock_acquire_timeout_ms(),
            lock_execution_timeout_ms: d_lock_execution_timeout_ms(),
            kill_timeout_ms: d_kill_timeout_ms(),
            auto_cleanup_delay_ms: d_auto_cleanup_delay_ms(),
            gc_interval_ms: d_gc_interval_ms(),
            rpc_request_timeout_ms: d_rpc_request_timeout_ms(),
            ring_buffer_capacity: d_ring_buffer_capacity(),
            max_auto_retries: d_max_auto_retries(),
        }
    }
}

fn d_max_concurrent() -> usize {
    16
}
fn d_lock_queue_depth() -> usize {
    10
}
fn d_lock_acquire_timeout_ms() -> u64 {
    30_000
}
fn d_lock_execution_timeout_ms() -> u64 {
    120_000
}
fn d_kill_timeout_ms() -> u64 {
    5_000
}
fn d_auto_cleanup_delay_ms() -> u64 {
    5 * 60_000
}
fn d_gc_interval_ms() -> u64 {
    10 * 60_000
}
fn d_rpc_request_timeout_ms() -> u64 {
    30_000
}
fn d_ring_buffer_capacity() -> usize {
    10_000
}
fn d_max_auto_retries() -> u32 {
    1
}

/// Reconciler cadence (§4.C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "d_periodic_interval_ms")]
    pub periodic_interval_ms: u64,
    #[serde(default = "d_settled_delay_ms")]
    pub settled_triggered_delay_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            periodic_interval_ms: d_periodic_interval_ms(),
            settled_triggered_delay_ms: d_settled_delay_ms(),
        }
    }
}

fn d_periodic_interval_ms() -> u64 {
    60_000
}
fn d_settled_delay_ms() -> u64 {
    1_000
}
