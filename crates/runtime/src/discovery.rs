//! Discovery / Probe (§4.C12): answers availability + model questions
//! for every registered engine, preferring a memory cache, then the
//! persisted KV setting, before paying for a live probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ie_executors::{AvailabilityRecord, ExecutorRegistry, ModelInfo};
use ie_store::Store;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const PROBE_CACHE_SETTING_KEY: &str = "discovery.probe_cache";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineProbe {
    pub availability: ProbeAvailability,
    pub models: Vec<ProbeModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeAvailability {
    pub available: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeModel {
    pub id: String,
    pub display_name: String,
}

impl From<AvailabilityRecord> for ProbeAvailability {
    fn from(r: AvailabilityRecord) -> Self {
        Self {
            available: r.available,
            detail: r.detail,
        }
    }
}

impl From<ModelInfo> for ProbeModel {
    fn from(m: ModelInfo) -> Self {
        Self {
            id: m.id,
            display_name: m.display_name,
        }
    }
}

pub struct Discovery {
    registry: Arc<ExecutorRegistry>,
    store: Arc<Store>,
    memory_cache: RwLock<HashMap<String, EngineProbe>>,
}

impl Discovery {
    pub fn new(registry: Arc<ExecutorRegistry>, store: Arc<Store>) -> Self {
        Self {
            registry,
            store,
            memory_cache: RwLock::new(HashMap::new()),
        }
    }

    /// memory cache -> persisted KV -> live probe, in that order.
    pub async fn probe(&self, engine_type: &str, force: bool) -> Option<EngineProbe> {
        if !force {
            if let Some(cached) = self.memory_cache.read().get(engine_type).cloned() {
                return Some(cached);
            }
            if let Some(persisted) = self.read_persisted(engine_type) {
                self.memory_cache.write().insert(engine_type.to_string(), persisted.clone());
                return Some(persisted);
            }
        }
        self.probe_live_one(engine_type).await
    }

    /// Probe every registered engine concurrently, each bounded by the
    /// registry's configured per-engine timeout. A timed-out or failing
    /// probe never propagates — it becomes a safe "unavailable" record.
    pub async fn probe_all(&self, force_engines: &[String]) -> HashMap<String, EngineProbe> {
        let mut results = HashMap::new();
        let mut live_futures = Vec::new();

        for engine_type in self.registry.list() {
            let engine_type = engine_type.to_string();
            let force = force_engines.iter().any(|e| e == &engine_type);
            if !force {
                if let Some(cached) = self.memory_cache.read().get(&engine_type).cloned() {
                    results.insert(engine_type, cached);
                    continue;
                }
                if let Some(persisted) = self.read_persisted(&engine_type) {
                    self.memory_cache.write().insert(engine_type.clone(), persisted.clone());
                    results.insert(engine_type, persisted);
                    continue;
                }
            }
            live_futures.push(engine_type);
        }

        let timeout = Duration::from_millis(self.registry.probe_timeout_ms());
        let probed = futures_util::future::join_all(
            live_futures
                .into_iter()
                .map(|engine_type| async move {
                    let probe = self.run_live_probe(&engine_type, timeout).await;
                    (engine_type, probe)
                }),
        )
        .await;

        for (engine_type, probe) in probed {
            self.memory_cache.write().insert(engine_type.clone(), probe.clone());
            self.write_persisted(&engine_type, &probe);
            results.insert(engine_type, probe);
        }

        results
    }

    async fn probe_live_one(&self, engine_type: &str) -> Option<EngineProbe> {
        let timeout = Duration::from_millis(self.registry.probe_timeout_ms());
        let probe = self.run_live_probe(engine_type, timeout).await;
        self.memory_cache.write().insert(engine_type.to_string(), probe.clone());
        self.write_persisted(engine_type, &probe);
        Some(probe)
    }

    async fn run_live_probe(&self, engine_type: &str, timeout: Duration) -> EngineProbe {
        let Some(strategy) = self.registry.get(engine_type) else {
            return EngineProbe {
                availability: ProbeAvailability {
                    available: false,
                    detail: Some("engine not registered".to_string()),
                },
                models: Vec::new(),
            };
        };

        let availability = match tokio::time::timeout(timeout, strategy.get_availability()).await {
            Ok(record) => record.into(),
            Err(_) => ProbeAvailability {
                available: false,
                detail: Some(format!("probe timed out after {}ms", timeout.as_millis())),
            },
        };

        let models = match tokio::time::timeout(timeout, strategy.get_models()).await {
            Ok(models) => models.into_iter().map(ProbeModel::from).collect(),
            Err(_) => Vec::new(),
        };

        EngineProbe { availability, models }
    }

    fn read_persisted(&self, engine_type: &str) -> Option<EngineProbe> {
        let value = self.store.get_setting(PROBE_CACHE_SETTING_KEY).ok().flatten()?;
        let mut cache: HashMap<String, EngineProbe> = serde_json::from_value(value).ok()?;
        cache.remove(engine_type)
    }

    fn write_persisted(&self, engine_type: &str, probe: &EngineProbe) {
        let mut cache: HashMap<String, EngineProbe> = self
            .store
            .get_setting(PROBE_CACHE_SETTING_KEY)
            .ok()
            .flatten()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        cache.insert(engine_type.to_string(), probe.clone());
        if let Ok(value) = serde_json::to_value(&cache) {
            let _ = self.store.set_setting(PROBE_CACHE_SETTING_KEY, &value);
        }
    }

    pub fn invalidate(&self, engine_type: &str) {
        self.memory_cache.write().remove(engine_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ie_domain::config::ExecutorsConfig;

    fn setup() -> Discovery {
        let registry = Arc::new(ExecutorRegistry::from_config(&ExecutorsConfig::default()));
        let store = Store::open_in_memory().unwrap();
        Discovery::new(registry, store)
    }

    #[tokio::test]
    async fn probe_echo_is_always_available() {
        let discovery = setup();
        let probe = discovery.probe("echo", false).await.unwrap();
        assert!(probe.availability.available);
        assert_eq!(probe.models.len(), 1);
    }

    #[tokio::test]
    async fn unregistered_engine_is_unavailable_not_an_error() {
        let discovery = setup();
        let probe = discovery.probe("nonexistent", true).await.unwrap();
        assert!(!probe.availability.available);
    }

    #[tokio::test]
    async fn second_probe_hits_memory_cache() {
        let discovery = setup();
        let first = discovery.probe("echo", false).await.unwrap();
        discovery.invalidate("echo");
        // After invalidation it falls through to persisted KV, still
        // returning the same record rather than erroring.
        let second = discovery.probe("echo", false).await.unwrap();
        assert_eq!(first.availability.available, second.availability.available);
    }

    #[tokio::test]
    async fn probe_all_covers_every_registered_engine() {
        let discovery = setup();
        let all = discovery.probe_all(&[]).await;
        assert!(all.contains_key("echo"));
    }
}
