use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `LOG_LEVEL` — passed through to `EnvFilter` when `RUST_LOG` is unset.
    #[serde(default = "d_log_level")]
    pub log_level: String,
    /// `LOG_EXECUTOR_IO` — trace every suspension point at `debug`.
    #[serde(default)]
    pub log_executor_io: bool,
    /// `SERVICE_NAME` — resource attribute for tracing/OTel export.
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// OTLP gRPC endpoint (e.g. `http://localhost:4317`). When `None`, no
    /// OTel exporter is started and the server behaves exactly as if the
    /// dependency wasn't there — structured JSON logging only.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Trace sampling rate (`0.0` = never, `1.0` = always). Uses
    /// `TraceIdRatioBased` sampling so the decision is consistent across
    /// an entire trace.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: d_log_level(),
            log_executor_io: false,
            service_name: d_service_name(),
            otlp_endpoint: None,
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_log_level() -> String {
    "info".into()
}
fn d_service_name() -> String {
    "issue-execution-engine".into()
}
fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_otlp_endpoint() {
        assert!(ObservabilityConfig::default().otlp_endpoint.is_none());
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: ObservabilityConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.otlp_endpoint.is_none());
        assert!((cfg.sample_rate - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_with_endpoint() {
        let cfg: ObservabilityConfig =
            serde_json::from_str(r#"{"otlp_endpoint":"http://localhost:4317","sample_rate":0.5}"#).unwrap();
        assert_eq!(cfg.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
        assert!((cfg.sample_rate - 0.5).abs() < f64::EPSILON);
    }
}
