//! Built-in test engine (E1 in the acceptance scenarios): a trivial
//! stream-protocol agent that echoes the prompt back as one assistant
//! message and one terminal result, then exits. No external binary
//! required — spawns `sh -c` with a canned script.

use async_trait::async_trait;
use ie_domain::{EntryType, Metadata, NormalizedEntry, Result};
use serde_json::Value;

use crate::traits::{AvailabilityRecord, CommandSpec, ExecutorStrategy, FollowUpOptions, ModelInfo, Protocol, SpawnOptions};

pub struct EchoExecutor;

fn script_for(prompt: &str) -> String {
    let assistant = serde_json::json!({ "type": "assistant", "text": prompt });
    let result = serde_json::json!({ "type": "result", "subtype": "success", "is_error": false });
    format!(
        "printf '%s\\n' '{}'; printf '%s\\n' '{}'",
        assistant, result
    )
}

#[async_trait]
impl ExecutorStrategy for EchoExecutor {
    fn engine_type(&self) -> &str {
        "echo"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Stream
    }

    fn build_command(&self, opts: &SpawnOptions) -> Result<CommandSpec> {
        Ok(CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script_for(&opts.prompt)],
            envs: Vec::new(),
            cwd: opts.working_dir.clone(),
        })
    }

    fn build_follow_up_command(&self, opts: &FollowUpOptions) -> Result<CommandSpec> {
        Ok(CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script_for(&opts.prompt)],
            envs: Vec::new(),
            cwd: opts.working_dir.clone(),
        })
    }

    fn parse_line(&self, line: &str) -> Vec<NormalizedEntry> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match kind {
            "assistant" => {
                let text = value.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
                vec![NormalizedEntry {
                    entry_type: EntryType::AssistantMessage,
                    content: text,
                    metadata: Metadata::new(),
                    tool_call: None,
                }]
            }
            "result" => {
                let is_error = value.get("is_error").and_then(|v| v.as_bool()).unwrap_or(false);
                let mut metadata = Metadata::new();
                metadata.insert("turnCompleted".into(), Value::Bool(true));
                metadata.insert("isError".into(), Value::Bool(is_error));
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

    async fn get_availability(&self) -> AvailabilityRecord {
        AvailabilityRecord {
            engine_type: "echo".to_string(),
            available: true,
            detail: None,
        }
    }

    async fn get_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "echo-1".to_string(),
            display_name: "Echo (test)".to_string(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_line_maps_to_assistant_message() {
        let executor = EchoExecutor;
        let line = r#"{"type":"assistant","text":"Auto Exec Test"}"#;
        let entries = executor.parse_line(line);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::AssistantMessage);
        assert_eq!(entries[0].content, "Auto Exec Test");
    }

    #[test]
    fn result_line_marks_turn_completed() {
        let executor = EchoExecutor;
        let line = r#"{"type":"result","subtype":"success","is_error":false}"#;
        let entries = executor.parse_line(line);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_turn_completed());
        assert!(!entries[0].is_logical_failure());
    }

    #[test]
    fn build_command_embeds_prompt() {
        let executor = EchoExecutor;
        let opts = SpawnOptions {
            prompt: "Auto Exec Test".to_string(),
            ..Default::default()
        };
        let cmd = executor.build_command(&opts).unwrap();
        assert_eq!(cmd.program, "sh");
        assert!(cmd.args[1].contains("Auto Exec Test"));
    }
}
