//! Soft-cancellation tokens, keyed by execution id (§4.C9). Grounded on
//! the teacher's per-session cancel-token map; the runtime checks a
//! token's flag at suspension points and the lifecycle controller also
//! races it against the process manager's hard kill timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancel tokens per execution id.
pub struct CancelMap {
    tokens: Mutex<HashMap<Uuid, CancelToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, execution_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(execution_id, token.clone());
        token
    }

    pub fn cancel(&self, execution_id: Uuid) -> bool {
        if let Some(token) = self.tokens.lock().get(&execution_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn remove(&self, execution_id: Uuid) {
        self.tokens.lock().remove(&execution_id);
    }

    pub fn is_running(&self, execution_id: Uuid) -> bool {
        self.tokens.lock().contains_key(&execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let id = Uuid::new_v4();
        let token = map.register(id);
        assert!(!token.is_cancelled());
        assert!(map.cancel(id));
        assert!(token.is_cancelled());
        map.remove(id);
        assert!(!map.is_running(id));
    }

    #[test]
    fn cancel_nonexistent_execution_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel(Uuid::new_v4()));
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::new();
        let id = Uuid::new_v4();
        map.register(id);
        map.remove(id);
        map.remove(id);
        assert!(!map.is_running(id));
    }
}
