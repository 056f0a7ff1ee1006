//! Lock arbiter boundary and the in-process implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use stoat_core::error::{CoreResult, TestError};
use tokio::sync::oneshot;

/// Opaque grant token returned by an arbiter. Valid until released.
pub type LockToken = u64;

/// The shared coordination channel every process in a run can reach.
///
/// `acquire` suspends until the caller holds `key` exclusively; grants per
/// key are strictly first-requested-first-granted. `release` is
/// fire-and-forget and ignores unknown tokens, which makes double release
/// a no-op.
#[async_trait]
pub trait LockArbiter: Send + Sync {
    async fn acquire(&self, key: &str) -> CoreResult<LockToken>;
    fn release(&self, token: LockToken);
}

#[derive(Default)]
struct Lane {
    holder: Option<LockToken>,
    waiters: VecDeque<(LockToken, oneshot::Sender<()>)>,
}

/// In-process arbiter: one lane per key, created lazily on first request
/// and garbage-collected once no holder or waiter remains. Also serves as
/// the server-side state behind the channel protocol.
pub struct LocalArbiter {
    lanes: Mutex<HashMap<String, Lane>>,
    tokens: Mutex<HashMap<LockToken, String>>,
    next_token: AtomicU64,
}

impl Default for LocalArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalArbiter {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Number of live lanes, for tests and diagnostics.
    pub fn lane_count(&self) -> usize {
        self.lanes.lock().len()
    }

    /// Join the lane for `key` synchronously: either the caller becomes
    /// holder immediately (no receiver), or it gets a receiver that fires
    /// on grant. The queue position is fixed at this call, which is what
    /// makes grants strictly first-requested-first-granted even when the
    /// eventual waits are polled out of order.
    pub fn enqueue(&self, key: &str) -> (LockToken, Option<oneshot::Receiver<()>>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut lanes = self.lanes.lock();
        let lane = lanes.entry(key.to_string()).or_default();
        self.tokens.lock().insert(token, key.to_string());
        if lane.holder.is_none() && lane.waiters.is_empty() {
            lane.holder = Some(token);
            (token, None)
        } else {
            let (tx, rx) = oneshot::channel();
            lane.waiters.push_back((token, tx));
            (token, Some(rx))
        }
    }

    /// Await a receiver handed out by [`enqueue`](Self::enqueue).
    pub async fn granted(
        &self,
        key: &str,
        token: LockToken,
        waiter: Option<oneshot::Receiver<()>>,
    ) -> CoreResult<LockToken> {
        if let Some(rx) = waiter {
            tracing::trace!(key, token, "waiting for lock grant");
            rx.await.map_err(|_| {
                TestError::LockAcquisition(format!("arbiter dropped the wait queue for '{key}'"))
            })?;
        }
        tracing::trace!(key, token, "lock granted");
        Ok(token)
    }
}

#[async_trait]
impl LockArbiter for LocalArbiter {
    async fn acquire(&self, key: &str) -> CoreResult<LockToken> {
        let (token, waiter) = self.enqueue(key);
        self.granted(key, token, waiter).await
    }

    fn release(&self, token: LockToken) {
        let Some(key) = self.tokens.lock().remove(&token) else {
            return;
        };
        let mut lanes = self.lanes.lock();
        let Some(lane) = lanes.get_mut(&key) else {
            return;
        };
        if lane.holder == Some(token) {
            lane.holder = None;
            // Grant to the next waiter still listening; a waiter whose
            // receiver is gone abandoned the acquire.
            while let Some((next, tx)) = lane.waiters.pop_front() {
                if tx.send(()).is_ok() {
                    lane.holder = Some(next);
                    break;
                }
                self.tokens.lock().remove(&next);
            }
        } else {
            lane.waiters.retain(|(t, _)| *t != token);
        }
        if lane.holder.is_none() && lane.waiters.is_empty() {
            lanes.remove(&key);
        }
    }
}
