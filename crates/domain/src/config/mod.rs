mod concurrency;
mod executors;
mod observability;
mod server;
mod store;

pub use concurrency::*;
pub use executors::*;
pub use observability::*;
pub use server::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executors: ExecutorsConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load layered config: defaults, then an optional YAML file, then
    /// environment variable overrides (§6 of the spec).
    pub fn load(path: Option<&std::path::Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| crate::Error::Config(format!("parsing {}: {e}", p.display())))?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DB_PATH") {
            self.store.db_path = v.into();
        }
        if let Ok(v) = std::env::var("API_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("API_PORT") {
            if let Ok(port) = v.parse() {
                self.server.port = port;
            }
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_EXECUTIONS") {
            if let Ok(n) = v.parse() {
                self.concurrency.max_concurrent_executions = n;
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.observability.log_level = v;
        }
        if let Ok(v) = std::env::var("LOG_EXECUTOR_IO") {
            self.observability.log_executor_io = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SERVICE_NAME") {
            self.observability.service_name = v;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.executors.engines.is_empty() {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "executors.engines".into(),
                message: "no configured engines — only the built-in echo executor will be available".into(),
            });
        }

        for (id, engine) in &self.executors.engines {
            if id.is_empty() {
                errors.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "executors.engines".into(),
                    message: "engine id must not be empty".into(),
                });
            }
            if let Some(cmd) = &engine.command {
                if cmd.is_empty() {
                    errors.push(ConfigIssue {
                        severity: ConfigSeverity::Error,
                        field: format!("executors.engines.{id}.command"),
                        message: "command must not be empty when set".into(),
                    });
                }
            }
        }

        if self.concurrency.lock_max_queue_depth == 0 {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "concurrency.lock_max_queue_depth".into(),
                message: "must be at least 1".into(),
            });
        }

        if self.concurrency.max_concurrent_executions == 0 {
            errors.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "concurrency.max_concurrent_executions".into(),
                message: "0 means no execution will ever be allowed to spawn".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_only_warnings() {
        let config = Config::default();
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = Config::default();
        config.server.port = 0;
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "server.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn env_overrides_db_path() {
        std::env::set_var("DB_PATH", "/tmp/override.db");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.store.db_path, std::path::PathBuf::from("/tmp/override.db"));
        std::env::remove_var("DB_PATH");
    }
}
