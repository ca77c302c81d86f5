//! Codex-style JSON-RPC executor: `initialize` -> `thread/start` or
//! `thread/resume` -> `turn/start`, normalizing `item/agentMessage/delta`
//! and `turn/completed` notifications (§6).

use async_trait::async_trait;
use ie_domain::{EntryType, Metadata, NormalizedEntry, Result};
use ie_rpc::Multiplexer;
use serde_json::Value;

use crate::env::filtered_env;
use crate::traits::{CommandSpec, ExecutorStrategy, FollowUpOptions, Protocol, SpawnOptions};

pub struct CodexExecutor {
    engine_type: String,
    program: String,
    base_args: Vec<String>,
    env_allowlist: Vec<String>,
}

impl CodexExecutor {
    pub fn new(
        engine_type: impl Into<String>,
        program: impl Into<String>,
        base_args: Vec<String>,
        env_allowlist: Vec<String>,
    ) -> Self {
        Self {
            engine_type: engine_type.into(),
            program: program.into(),
            base_args,
            env_allowlist,
        }
    }
}

#[async_trait]
impl ExecutorStrategy for CodexExecutor {
    fn engine_type(&self) -> &str {
        &self.engine_type
    }

    fn protocol(&self) -> Protocol {
        Protocol::Rpc
    }

    fn build_command(&self, opts: &SpawnOptions) -> Result<CommandSpec> {
        Ok(CommandSpec {
            program: self.program.clone(),
            args: self.base_args.clone(),
            envs: filtered_env(&self.env_allowlist),
            cwd: opts.working_dir.clone(),
        })
    }

    fn build_follow_up_command(&self, opts: &FollowUpOptions) -> Result<CommandSpec> {
        Ok(CommandSpec {
            program: self.program.clone(),
            args: self.base_args.clone(),
            envs: filtered_env(&self.env_allowlist),
            cwd: opts.working_dir.clone(),
        })
    }

    async fn rpc_handshake(&self, mux: &Multiplexer, opts: &SpawnOptions) -> Result<String> {
        mux.initialize().await?;
        let thread = mux
            .start_thread(serde_json::json!({ "cwd": opts.working_dir }))
            .await?;
        let thread_id = thread
            .get("threadId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ie_domain::Error::Other("thread/start response missing threadId".into()))?
            .to_string();
        mux.start_turn(&thread_id, &opts.prompt).await?;
        Ok(thread_id)
    }

    fn map_notification(&self, method: &str, params: &Option<Value>) -> Vec<NormalizedEntry> {
        match method {
            "item/agentMessage/delta" => {
                let text = params
                    .as_ref()
                    .and_then(|p| p.get("delta"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                vec![NormalizedEntry {
                    entry_type: EntryType::AssistantMessage,
                    content: text,
                    metadata: Metadata::new(),
                    tool_call: None,
                }]
            }
            "turn/completed" => {
                let mut metadata = Metadata::new();
                metadata.insert("turnCompleted".into(), Value::Bool(true));
                let is_error = params
                    .as_ref()
                    .and_then(|p| p.get("error"))
                    .is_some();
                metadata.insert("isError".into(), Value::Bool(is_error));
                vec![NormalizedEntry {
                    entry_type: EntryType::SystemMessage,
                    content: String::new(),
                    metadata,
                    tool_call: None,
                }]
            }
            "turn/failed" => {
                let reason = params
                    .as_ref()
                    .and_then(|p| p.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("turn failed")
                    .to_string();
                let mut metadata = Metadata::new();
                metadata.insert("turnCompleted".into(), Value::Bool(true));
                metadata.insert("isError".into(), Value::Bool(true));
                metadata.insert("failureReason".into(), Value::String(reason.clone()));
                vec![NormalizedEntry {
                    entry_type: EntryType::ErrorMessage,
                    content: reason,
                    metadata,
                    tool_call: None,
                }]
            }
            _ => Vec::new(),
        }
    }

    async fn cancel(&self, mux: Option<&Multiplexer>, thread_id: Option<&str>) -> Result<()> {
        let (mux, thread_id) = match (mux, thread_id) {
            (Some(m), Some(t)) => (m, t),
            _ => return Ok(()),
        };
        if let Some(turn_id) = mux.current_turn_id() {
            mux.interrupt(thread_id, &turn_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_notification_maps_to_assistant_message() {
        let executor = CodexExecutor::new("codex", "codex-cli", vec![], Vec::new());
        let params = Some(serde_json::json!({ "delta": "hi there" }));
        let entries = executor.map_notification("item/agentMessage/delta", &params);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::AssistantMessage);
        assert_eq!(entries[0].content, "hi there");
    }

    #[test]
    fn turn_completed_marks_metadata() {
        let executor = CodexExecutor::new("codex", "codex-cli", vec![], Vec::new());
        let entries = executor.map_notification("turn/completed", &None);
        assert!(entries[0].is_turn_completed());
        assert!(!entries[0].is_logical_failure());
    }

    #[test]
    fn turn_failed_carries_failure_reason() {
        let executor = CodexExecutor::new("codex", "codex-cli", vec![], Vec::new());
        let params = Some(serde_json::json!({ "message": "no session found" }));
        let entries = executor.map_notification("turn/failed", &params);
        assert!(entries[0].is_logical_failure());
        assert_eq!(entries[0].failure_reason(), Some("no session found"));
    }

    #[test]
    fn unknown_method_yields_no_entries() {
        let executor = CodexExecutor::new("codex", "codex-cli", vec![], Vec::new());
        assert!(executor.map_notification("item/unrelated", &None).is_empty());
    }
}
