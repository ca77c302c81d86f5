use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `DB_PATH` — path to the embedded SQL database file.
    #[serde(default = "d_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "d_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: d_db_path(),
            busy_timeout_ms: d_busy_timeout_ms(),
        }
    }
}

fn d_db_path() -> PathBuf {
    PathBuf::from("./data/engine.db")
}
fn d_busy_timeout_ms() -> u64 {
    15_000
}
