//! Keyed registry of executor strategies, built from configuration at
//! startup (§4.C2). Grounded on the teacher's provider registry: a
//! `HashMap<String, Arc<dyn Trait>>` populated once from config, with
//! per-entry construction failures recorded rather than aborting startup.

use std::collections::HashMap;
use std::sync::Arc;

use ie_domain::config::ExecutorsConfig;

use crate::codex::CodexExecutor;
use crate::echo::EchoExecutor;
use crate::jsonl::JsonlExecutor;
use crate::traits::ExecutorStrategy;

pub struct ExecutorRegistry {
    engines: HashMap<String, Arc<dyn ExecutorStrategy>>,
    /// Non-fatal problems hit while building entries from config (e.g. an
    /// engine with an empty `command`), surfaced to discovery probes.
    init_errors: Vec<(String, String)>,
    probe_timeout_ms: u64,
}

impl ExecutorRegistry {
    /// Always registers the built-in `echo` executor, then one entry per
    /// configured engine. A malformed entry is skipped and recorded in
    /// `init_errors`, it does not prevent the other engines from loading.
    pub fn from_config(config: &ExecutorsConfig) -> Self {
        let mut engines: HashMap<String, Arc<dyn ExecutorStrategy>> = HashMap::new();
        let mut init_errors = Vec::new();

        engines.insert("echo".to_string(), Arc::new(EchoExecutor));

        for (id, engine) in &config.engines {
            if id == "echo" {
                continue;
            }
            let Some(command) = engine.command.clone() else {
                continue;
            };
            if command.is_empty() {
                init_errors.push((id.clone(), "command must not be empty".to_string()));
                continue;
            }
            let strategy: Arc<dyn ExecutorStrategy> = match engine.family.as_str() {
                "codex" => Arc::new(CodexExecutor::new(
                    id.clone(),
                    command,
                    engine.args.clone(),
                    engine.env_allowlist.clone(),
                )),
                "jsonl" => Arc::new(JsonlExecutor::new(
                    id.clone(),
                    command,
                    engine.args.clone(),
                    engine.resume_flag.clone(),
                    engine.env_allowlist.clone(),
                )),
                other => {
                    init_errors.push((id.clone(), format!("unknown executor family {other:?}")));
                    continue;
                }
            };
            engines.insert(id.clone(), strategy);
        }

        Self {
            engines,
            init_errors,
            probe_timeout_ms: config.probe_timeout_ms,
        }
    }

    pub fn get(&self, engine_type: &str) -> Option<Arc<dyn ExecutorStrategy>> {
        self.engines.get(engine_type).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    pub fn init_errors(&self) -> &[(String, String)] {
        &self.init_errors
    }

    pub fn probe_timeout_ms(&self) -> u64 {
        self.probe_timeout_ms
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_domain::config::ExecutorConfig;

    #[test]
    fn echo_is_always_registered() {
        let registry = ExecutorRegistry::from_config(&ExecutorsConfig::default());
        assert!(registry.get("echo").is_some());
    }

    #[test]
    fn configured_jsonl_engine_is_constructed() {
        let mut config = ExecutorsConfig::default();
        config.engines.insert(
            "claude".to_string(),
            ExecutorConfig {
                command: Some("claude-code".to_string()),
                ..Default::default()
            },
        );
        let registry = ExecutorRegistry::from_config(&config);
        let strategy = registry.get("claude").expect("engine registered");
        assert_eq!(strategy.engine_type(), "claude");
    }

    #[test]
    fn configured_codex_engine_uses_rpc_protocol() {
        let mut config = ExecutorsConfig::default();
        config.engines.insert(
            "codex".to_string(),
            ExecutorConfig {
                command: Some("codex-cli".to_string()),
                family: "codex".to_string(),
                ..Default::default()
            },
        );
        let registry = ExecutorRegistry::from_config(&config);
        let strategy = registry.get("codex").expect("engine registered");
        assert_eq!(strategy.protocol(), crate::traits::Protocol::Rpc);
    }

    #[test]
    fn empty_command_is_recorded_as_init_error_not_registered() {
        let mut config = ExecutorsConfig::default();
        config.engines.insert(
            "broken".to_string(),
            ExecutorConfig {
                command: Some(String::new()),
                ..Default::default()
            },
        );
        let registry = ExecutorRegistry::from_config(&config);
        assert!(registry.get("broken").is_none());
        assert_eq!(registry.init_errors().len(), 1);
    }

    #[test]
    fn entry_with_no_command_is_treated_as_unconfigured_and_skipped() {
        let mut config = ExecutorsConfig::default();
        config.engines.insert("placeholder".to_string(), ExecutorConfig::default());
        let registry = ExecutorRegistry::from_config(&config);
        assert!(registry.get("placeholder").is_none());
        assert!(registry.init_errors().is_empty());
    }
}
