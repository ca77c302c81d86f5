//! Generic stream-protocol executor for agents that emit one `type`-tagged
//! JSON object per stdout line (§6): `assistant`, `user` (tool-result
//! batch), `tool_use`, `tool_result`, `error`, `system` (with `subtype`),
//! `result` (session summary).

use async_trait::async_trait;
use ie_domain::{EntryType, Metadata, NormalizedEntry, NormalizedToolCall, Result, ToolKind};
use serde_json::Value;

use crate::env::filtered_env;
use crate::traits::{CommandSpec, ExecutorStrategy, FollowUpOptions, Protocol, SpawnOptions};

/// One concrete agent binary speaking the JSONL contract. `program` and the
/// fixed argument prefix come from configuration (§4.C2); `--resume`/session
/// flags are appended per-call.
pub struct JsonlExecutor {
    engine_type: String,
    program: String,
    base_args: Vec<String>,
    resume_flag: String,
    env_allowlist: Vec<String>,
}

impl JsonlExecutor {
    pub fn new(
        engine_type: impl Into<String>,
        program: impl Into<String>,
        base_args: Vec<String>,
        resume_flag: impl Into<String>,
        env_allowlist: Vec<String>,
    ) -> Self {
        Self {
            engine_type: engine_type.into(),
            program: program.into(),
            base_args,
            resume_flag: resume_flag.into(),
            env_allowlist,
        }
    }
}

fn tool_kind_for(tool_name: &str) -> ToolKind {
    match tool_name {
        "Read" | "read_file" => ToolKind::FileRead,
        "Edit" | "Write" | "edit_file" | "write_file" => ToolKind::FileEdit,
        "Bash" | "run_command" | "exec" => ToolKind::CommandRun,
        "Grep" | "Glob" | "search" => ToolKind::Search,
        "WebFetch" | "web_fetch" => ToolKind::WebFetch,
        "Task" | "task" => ToolKind::Task,
        _ => ToolKind::Other,
    }
}

fn text_field(value: &Value) -> String {
    value
        .get("text")
        .or_else(|| value.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Parse a single stdout line into zero or more normalized entries. A
/// `user` line can legitimately carry a batch of tool results, hence the
/// `Vec` return.
pub fn parse_jsonl_line(line: &str) -> Vec<NormalizedEntry> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let msg_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match msg_type {
        "assistant" => vec![NormalizedEntry {
            entry_type: EntryType::AssistantMessage,
            content: text_field(&value),
            metadata: Metadata::new(),
            tool_call: None,
        }],
        "tool_use" => {
            let tool_name = value.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let tool_call_id = value.get("id").and_then(|v| v.as_str()).map(str::to_string);
            vec![NormalizedEntry {
                entry_type: EntryType::ToolUse,
                content: String::new(),
                metadata: Metadata::new(),
                tool_call: Some(NormalizedToolCall {
                    kind: tool_kind_for(&tool_name),
                    tool_name,
                    tool_call_id,
                    is_result: false,
                    raw: value.clone(),
                }),
            }]
        }
        "tool_result" => {
            let tool_name = value.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let tool_call_id = value
                .get("tool_use_id")
                .or_else(|| value.get("id"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            vec![NormalizedEntry {
                entry_type: EntryType::ToolUse,
                content: text_field(&value),
                metadata: Metadata::new(),
                tool_call: Some(NormalizedToolCall {
                    kind: tool_kind_for(&tool_name),
                    tool_name,
                    tool_call_id,
                    is_result: true,
                    raw: value.clone(),
                }),
            }]
        }
        "user" => {
            // A tool-result batch: the agent echoes back a user turn
            // carrying one or more tool_result blocks in `content`.
            match value.get("content").and_then(|v| v.as_array()) {
                Some(blocks) => blocks
                    .iter()
                    .flat_map(|block| {
                        let mut wrapped = block.clone();
                        if let Some(obj) = wrapped.as_object_mut() {
                            obj.entry("type".to_string()).or_insert_with(|| Value::String("tool_result".to_string()));
                        }
                        parse_jsonl_line(&wrapped.to_string())
                    })
                    .collect(),
                None => vec![NormalizedEntry {
                    entry_type: EntryType::UserMessage,
                    content: text_field(&value),
                    metadata: Metadata::new(),
                    tool_call: None,
                }],
            }
        }
        "error" => {
            let mut metadata = Metadata::new();
            metadata.insert("isError".into(), Value::Bool(true));
            vec![NormalizedEntry {
                entry_type: EntryType::ErrorMessage,
                content: text_field(&value),
                metadata,
                tool_call: None,
            }]
        }
        "system" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let mut metadata = Metadata::new();
            metadata.insert("subtype".into(), Value::String(subtype));
            vec![NormalizedEntry {
                entry_type: EntryType::SystemMessage,
                content: text_field(&value),
                metadata,
                tool_call: None,
            }]
        }
        "result" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("");
            let is_error = value.get("is_error").and_then(|v| v.as_bool()).unwrap_or(subtype == "error");
            let mut metadata = Metadata::new();
            metadata.insert("turnCompleted".into(), Value::Bool(true));
            metadata.insert("isError".into(), Value::Bool(is_error));
            if is_error {
                metadata.insert(
                    "failureReason".into(),
                    Value::String(format!("result subtype={subtype}")),
                );
            }
            vec![NormalizedEntry {
                entry_type: EntryType::SystemMessage,
                content: String::new(),
                metadata,
                tool_call: None,
            }]
        }
        _ => Vec::new(),
    }
}

#[async_trait]
impl ExecutorStrategy for JsonlExecutor {
    fn engine_type(&self) -> &str {
        &self.engine_type
    }

    fn protocol(&self) -> Protocol {
        Protocol::Stream
    }

    fn build_command(&self, opts: &SpawnOptions) -> Result<CommandSpec> {
        let mut args = self.base_args.clone();
        args.push(opts.prompt.clone());
        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        Ok(CommandSpec {
            program: self.program.clone(),
            args,
            envs: filtered_env(&self.env_allowlist),
            cwd: opts.working_dir.clone(),
        })
    }

    fn build_follow_up_command(&self, opts: &FollowUpOptions) -> Result<CommandSpec> {
        let mut args = self.base_args.clone();
        args.push(self.resume_flag.clone());
        args.push(opts.external_session_id.clone());
        args.push(opts.prompt.clone());
        if let Some(model) = &opts.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        Ok(CommandSpec {
            program: self.program.clone(),
            args,
            envs: filtered_env(&self.env_allowlist),
            cwd: opts.working_dir.clone(),
        })
    }

    fn parse_line(&self, line: &str) -> Vec<NormalizedEntry> {
        parse_jsonl_line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_line_maps_to_assistant_message() {
        let entries = parse_jsonl_line(r#"{"type":"assistant","text":"hello"}"#);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::AssistantMessage);
        assert_eq!(entries[0].content, "hello");
    }

    #[test]
    fn tool_use_carries_normalized_tool_call() {
        let entries = parse_jsonl_line(r#"{"type":"tool_use","id":"t1","name":"Bash","input":{}}"#);
        assert_eq!(entries.len(), 1);
        let call = entries[0].tool_call.as_ref().unwrap();
        assert_eq!(call.tool_name, "Bash");
        assert_eq!(call.kind, ToolKind::CommandRun);
        assert!(!call.is_result);
    }

    #[test]
    fn user_line_expands_tool_result_batch() {
        let line = r#"{"type":"user","content":[{"tool_use_id":"t1","name":"Bash","text":"ok"}]}"#;
        let entries = parse_jsonl_line(line);
        assert_eq!(entries.len(), 1);
        let call = entries[0].tool_call.as_ref().unwrap();
        assert!(call.is_result);
        assert_eq!(call.tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn result_line_with_error_subtype_is_logical_failure() {
        let entries = parse_jsonl_line(r#"{"type":"result","subtype":"error","is_error":true}"#);
        assert!(entries[0].is_turn_completed());
        assert!(entries[0].is_logical_failure());
    }

    #[test]
    fn garbage_line_yields_no_entries() {
        assert!(parse_jsonl_line("not json").is_empty());
        assert!(parse_jsonl_line("").is_empty());
    }

    #[test]
    fn follow_up_command_includes_resume_flag_and_session_id() {
        let executor = JsonlExecutor::new("claude", "claude-code", vec!["-p".to_string()], "--resume", Vec::new());
        let opts = FollowUpOptions {
            prompt: "continue".to_string(),
            external_session_id: "sess-123".to_string(),
            ..Default::default()
        };
        let cmd = executor.build_follow_up_command(&opts).unwrap();
        assert!(cmd.args.contains(&"--resume".to_string()));
        assert!(cmd.args.contains(&"sess-123".to_string()));
    }
}
