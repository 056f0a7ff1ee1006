//! Lock coordinator: canonical keys and releasable guards over an arbiter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stoat_core::error::CoreResult;
use stoat_core::value::{Value, canonical};

use crate::arbiter::{LocalArbiter, LockArbiter, LockToken};

/// Front door for named locks. Keys are values serialized to canonical
/// form, so structurally equal values compete for the same lane no matter
/// which process asks.
pub struct LockCoordinator {
    arbiter: Arc<dyn LockArbiter>,
}

impl LockCoordinator {
    pub fn new(arbiter: Arc<dyn LockArbiter>) -> Self {
        Self { arbiter }
    }

    /// Coordinator backed by an in-process arbiter, for single-process runs.
    pub fn local() -> Self {
        Self::new(Arc::new(LocalArbiter::new()))
    }

    /// Suspend until the caller is sole holder of the lock named by `key`.
    pub async fn acquire(&self, key: &Value) -> CoreResult<LockGuard> {
        self.acquire_raw(&canonical(key)).await
    }

    /// Same as [`acquire`](Self::acquire) for an already-serialized key.
    pub async fn acquire_raw(&self, key: &str) -> CoreResult<LockGuard> {
        let token = self.arbiter.acquire(key).await?;
        Ok(LockGuard {
            inner: Arc::new(GuardInner {
                key: key.to_string(),
                token,
                arbiter: Arc::clone(&self.arbiter),
                released: AtomicBool::new(false),
            }),
        })
    }
}

struct GuardInner {
    key: String,
    token: LockToken,
    arbiter: Arc<dyn LockArbiter>,
    released: AtomicBool,
}

impl GuardInner {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            tracing::trace!(key = %self.key, "lock released");
            self.arbiter.release(self.token);
        }
    }
}

impl Drop for GuardInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Releasable hold on a named lock. Clones share the hold; `release` is
/// idempotent, and dropping the last clone releases as a backstop. The
/// runner force-releases any guard still held when its test settles.
#[derive(Clone)]
pub struct LockGuard {
    inner: Arc<GuardInner>,
}

impl LockGuard {
    /// The canonical key this guard holds.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Give the lock up. A second call is a no-op.
    pub fn release(&self) {
        self.inner.release();
    }

    /// Whether the lock has already been given up.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn structurally_equal_keys_share_a_lane() {
        let coordinator = Arc::new(LockCoordinator::local());
        let key_a = Value::map([("resource", Value::str("db")), ("shard", Value::Int(1))]);
        let key_b = Value::map([("shard", Value::Int(1)), ("resource", Value::str("db"))]);

        let guard = coordinator.acquire(&key_a).await.expect("first hold");

        let c2 = Arc::clone(&coordinator);
        let contender = tokio::spawn(async move { c2.acquire(&key_b).await });
        tokio::task::yield_now().await;
        assert!(!contender.is_finished(), "equal keys must contend");

        guard.release();
        let second = contender.await.expect("join").expect("second hold");
        assert_eq!(second.key(), guard.key());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let coordinator = LockCoordinator::local();
        let guard = coordinator.acquire(&Value::str("x")).await.expect("hold");
        guard.release();
        guard.release();
        assert!(guard.is_released());
        // The lane must be free again.
        let again = coordinator.acquire(&Value::str("x")).await.expect("rehold");
        again.release();
    }

    #[tokio::test]
    async fn dropping_the_last_clone_releases() {
        let coordinator = Arc::new(LockCoordinator::local());
        let guard = coordinator.acquire(&Value::str("x")).await.expect("hold");
        let clone = guard.clone();
        drop(guard);

        let c2 = Arc::clone(&coordinator);
        let contender = tokio::spawn(async move { c2.acquire(&Value::str("x")).await });
        tokio::task::yield_now().await;
        assert!(!contender.is_finished(), "clone still holds the lock");

        drop(clone);
        contender.await.expect("join").expect("grant").release();
    }

    #[tokio::test]
    async fn holders_alternate_never_overlap() {
        let coordinator = Arc::new(LockCoordinator::local());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let coordinator = Arc::clone(&coordinator);
            let inside = Arc::clone(&inside);
            tasks.push(tokio::spawn(async move {
                let guard = coordinator.acquire(&Value::str("one")).await.expect("hold");
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                guard.release();
            }));
        }
        for task in tasks {
            task.await.expect("holder");
        }
    }
}
