//! The executor-strategy contract: one implementation per agent type,
//! covering both stdout-stream agents (JSONL, one `type`-tagged object per
//! line) and bidirectional JSON-RPC agents (Codex-style thread/turn).

use std::path::PathBuf;

use async_trait::async_trait;
use ie_domain::{NormalizedEntry, Result};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// stdout is a stream of newline-delimited, type-tagged JSON objects.
    /// The process crate reads lines directly and calls `parse_line`.
    Stream,
    /// stdout/stdin carry bidirectional JSON-RPC. The runtime attaches an
    /// `ie_rpc::Multiplexer` and drives normalization from its notifications.
    Rpc,
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub permission_mode: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FollowUpOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub permission_mode: Option<String>,
    pub external_session_id: String,
}

#[derive(Debug, Clone)]
pub struct AvailabilityRecord {
    pub engine_type: String,
    pub available: bool,
    pub detail: Option<String>,
}

/// Per-agent-type strategy: builds the subprocess command line for a fresh
/// spawn or a follow-up, maps raw output into the common entry model, and
/// answers discovery probes (§4.C2, §4.C12).
#[async_trait]
pub trait ExecutorStrategy: Send + Sync {
    fn engine_type(&self) -> &str;

    fn protocol(&self) -> Protocol;

    fn build_command(&self, opts: &SpawnOptions) -> Result<CommandSpec>;

    fn build_follow_up_command(&self, opts: &FollowUpOptions) -> Result<CommandSpec>;

    /// `Protocol::Stream` only: parse one raw stdout line into zero or more
    /// normalized entries (§4.C5).
    fn parse_line(&self, _line: &str) -> Vec<NormalizedEntry> {
        Vec::new()
    }

    /// `Protocol::Rpc` only: perform the `initialize`/`thread/start`/
    /// `turn/start` handshake over a freshly-spawned multiplexer and return
    /// the external session id to persist.
    async fn rpc_handshake(
        &self,
        _mux: &ie_rpc::Multiplexer,
        _opts: &SpawnOptions,
    ) -> Result<String> {
        Err(ie_domain::Error::Other(format!(
            "{} does not implement the RPC handshake",
            self.engine_type()
        )))
    }

    /// `Protocol::Rpc` only: map one JSON-RPC notification to normalized
    /// entries.
    fn map_notification(&self, _method: &str, _params: &Option<Value>) -> Vec<NormalizedEntry> {
        Vec::new()
    }

    /// Soft-cancel the in-flight turn. `Protocol::Rpc` agents usually send
    /// an `interrupt`; `Protocol::Stream` agents may have no soft-cancel
    /// support at all, in which case the caller falls back to a hard kill.
    async fn cancel(&self, _mux: Option<&ie_rpc::Multiplexer>, _thread_id: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn get_availability(&self) -> AvailabilityRecord {
        AvailabilityRecord {
            engine_type: self.engine_type().to_string(),
            available: true,
            detail: None,
        }
    }

    async fn get_models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }
}
