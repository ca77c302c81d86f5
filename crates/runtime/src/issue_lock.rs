//! Per-issue FIFO lock (§4.C8). Grounded on the teacher's per-session
//! `Semaphore(1)` map: generalized with a bounded queue depth, an
//! acquire timeout, and a separate execution timeout for the guarded
//! work itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ie_domain::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

const SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_secs(10);

struct LockEntry {
    semaphore: Arc<Semaphore>,
    queue_depth: AtomicUsize,
}

pub struct IssueLockMap {
    locks: Mutex<HashMap<Uuid, Arc<LockEntry>>>,
    max_queue_depth: usize,
    acquire_timeout: Duration,
    execution_timeout: Duration,
}

/// Held for the duration of one guarded section. Releases the permit on
/// drop and reaps the map entry if no one else is waiting.
pub struct IssueLockGuard<'a> {
    map: &'a IssueLockMap,
    issue_id: Uuid,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for IssueLockGuard<'_> {
    fn drop(&mut self) {
        self.permit.take();
        let mut locks = self.map.locks.lock();
        if let Some(entry) = locks.get(&self.issue_id) {
            if entry.semaphore.available_permits() == 1 && entry.queue_depth.load(Ordering::SeqCst) == 0 {
                locks.remove(&self.issue_id);
            }
        }
    }
}

impl IssueLockMap {
    pub fn new(max_queue_depth: usize, acquire_timeout_ms: u64, execution_timeout_ms: u64) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            max_queue_depth,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            execution_timeout: Duration::from_millis(execution_timeout_ms),
        }
    }

    fn entry_for(&self, issue_id: Uuid) -> Arc<LockEntry> {
        self.locks
            .lock()
            .entry(issue_id)
            .or_insert_with(|| {
                Arc::new(LockEntry {
                    semaphore: Arc::new(Semaphore::new(1)),
                    queue_depth: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    /// Acquire the lock for `issue_id`, failing fast if the queue is
    /// already at capacity, and failing after `acquire_timeout` if the
    /// lock never frees up.
    pub async fn acquire(&self, issue_id: Uuid) -> Result<IssueLockGuard<'_>> {
        let entry = self.entry_for(issue_id);

        if entry.queue_depth.load(Ordering::SeqCst) >= self.max_queue_depth {
            return Err(Error::LockQueueFull(issue_id));
        }
        entry.queue_depth.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let result = tokio::time::timeout(self.acquire_timeout, entry.semaphore.clone().acquire_owned()).await;
        entry.queue_depth.fetch_sub(1, Ordering::SeqCst);

        let permit = match result {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::LockAcquireTimeout(issue_id)),
            Err(_) => return Err(Error::LockAcquireTimeout(issue_id)),
        };

        let waited = started.elapsed();
        if waited > SLOW_ACQUIRE_THRESHOLD {
            tracing::warn!(issue_id = %issue_id, waited_ms = waited.as_millis() as u64, "slow issue lock acquire");
        }

        Ok(IssueLockGuard {
            map: self,
            issue_id,
            permit: Some(permit),
        })
    }

    /// Acquire the lock, run `work` under it, and enforce the execution
    /// timeout. The lock is released on every exit path — success,
    /// error, or timeout — because the guard's drop runs regardless.
    pub async fn with_lock<F, Fut, T>(&self, issue_id: Uuid, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _guard = self.acquire(issue_id).await?;
        match tokio::time::timeout(self.execution_timeout, work()).await {
            Ok(result) => result,
            Err(_) => Err(Error::LockExecutionTimeout(issue_id)),
        }
    }

    pub fn tracked_issue_count(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn sequential_acquire_release() {
        let map = IssueLockMap::new(10, 1_000, 1_000);
        let id = Uuid::new_v4();
        let guard = map.acquire(id).await.unwrap();
        drop(guard);
        let guard2 = map.acquire(id).await.unwrap();
        drop(guard2);
    }

    #[tokio::test]
    async fn different_issues_run_concurrently() {
        let map = Arc::new(IssueLockMap::new(10, 1_000, 1_000));
        let g1 = map.acquire(Uuid::new_v4()).await.unwrap();
        let g2 = map.acquire(Uuid::new_v4()).await.unwrap();
        assert_eq!(map.tracked_issue_count(), 2);
        drop(g1);
        drop(g2);
    }

    #[tokio::test]
    async fn second_waiter_blocks_until_release() {
        let map = Arc::new(IssueLockMap::new(10, 5_000, 5_000));
        let id = Uuid::new_v4();
        let g1 = map.acquire(id).await.unwrap();

        let map2 = map.clone();
        let handle = tokio::spawn(async move {
            let _g2 = map2.acquire(id).await.unwrap();
            99
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(g1);
        assert_eq!(handle.await.unwrap(), 99);
    }

    #[tokio::test]
    async fn queue_full_fails_fast() {
        let map = Arc::new(IssueLockMap::new(1, 5_000, 5_000));
        let id = Uuid::new_v4();
        let _holder = map.acquire(id).await.unwrap();

        let map2 = map.clone();
        let waiter = tokio::spawn(async move { map2.acquire(id).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = map.acquire(id).await;
        assert!(matches!(rejected, Err(Error::LockQueueFull(_))));
        waiter.abort();
    }

    #[tokio::test]
    async fn acquire_times_out_when_never_released() {
        let map = IssueLockMap::new(10, 50, 1_000);
        let id = Uuid::new_v4();
        let _holder = map.acquire(id).await.unwrap();
        let second = map.acquire(id).await;
        assert!(matches!(second, Err(Error::LockAcquireTimeout(_))));
    }

    #[tokio::test]
    async fn with_lock_releases_on_work_error() {
        let map = IssueLockMap::new(10, 1_000, 1_000);
        let id = Uuid::new_v4();
        let result: Result<()> = map
            .with_lock(id, || async { Err(Error::Other("boom".into())) })
            .await;
        assert!(result.is_err());
        let guard = map.acquire(id).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn with_lock_enforces_execution_timeout() {
        let map = IssueLockMap::new(10, 1_000, 30);
        let id = Uuid::new_v4();
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<()> = map
            .with_lock(id, || async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::LockExecutionTimeout(_))));
    }

    #[tokio::test]
    async fn empty_state_is_reaped_after_release() {
        let map = IssueLockMap::new(10, 1_000, 1_000);
        let id = Uuid::new_v4();
        drop(map.acquire(id).await.unwrap());
        assert_eq!(map.tracked_issue_count(), 0);
    }
}
