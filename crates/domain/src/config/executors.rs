use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for one executor strategy (one agent CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Binary to spawn. `None` means the built-in `echo` test executor.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Host environment variables forwarded to the subprocess, in addition
    /// to the agent's own auth variables. Strict opt-in allowlist — every
    /// other host variable is filtered out to prevent secret leakage.
    #[serde(default = "d_env_allowlist")]
    pub env_allowlist: Vec<String>,
    /// Which wire protocol this engine speaks: `"jsonl"` (type-tagged
    /// stdout stream) or `"codex"` (bidirectional JSON-RPC). Ignored for
    /// the built-in `echo` engine.
    #[serde(default = "d_family")]
    pub family: String,
    /// `jsonl` family only: the flag used to resume a prior session.
    #[serde(default = "d_resume_flag")]
    pub resume_flag: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            default_model: None,
            env_allowlist: d_env_allowlist(),
            family: d_family(),
            resume_flag: d_resume_flag(),
        }
    }
}

fn d_family() -> String {
    "jsonl".into()
}
fn d_resume_flag() -> String {
    "--resume".into()
}

fn d_env_allowlist() -> Vec<String> {
    vec![
        "ANTHROPIC_API_KEY".into(),
        "OPENAI_API_KEY".into(),
        "PATH".into(),
        "HOME".into(),
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorsConfig {
    #[serde(default)]
    pub engines: HashMap<String, ExecutorConfig>,
    /// Per-engine probe timeout (`getAvailability`/`getModels`).
    #[serde(default = "d_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn d_probe_timeout_ms() -> u64 {
    15_000
}
