//! `GET /v1/engines` — Discovery/Probe snapshot per registered executor.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use ie_runtime::EngineProbe;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EnginesQuery {
    #[serde(default)]
    pub force: bool,
}

pub async fn list_engines(State(state): State<AppState>, Query(q): Query<EnginesQuery>) -> Json<HashMap<String, EngineProbe>> {
    let force_engines: Vec<String> = if q.force {
        state.executors.list().iter().map(|s| s.to_string()).collect()
    } else {
        Vec::new()
    };
    Json(state.discovery.probe_all(&force_engines).await)
}
