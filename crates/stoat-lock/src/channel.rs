//! Arbiter protocol over a message channel.
//!
//! The transport between client and server halves is an ordinary duplex
//! message channel; anything that can carry the serialized requests and
//! replies (socket, pipe, in-memory channel) works. One [`ArbiterServer`]
//! serves every process in the run; each process holds a
//! [`ChannelArbiter`] endpoint.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use stoat_core::error::{CoreResult, TestError};
use tokio::sync::{mpsc, oneshot};

use crate::arbiter::{LocalArbiter, LockArbiter, LockToken};

/// Client-to-server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ArbiterRequest {
    Acquire { request: u64, key: String },
    Release { token: LockToken },
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ArbiterReply {
    Granted { request: u64, token: LockToken },
    Denied { request: u64, reason: String },
}

/// Shared arbiter endpoint factory. Every [`connect`](Self::connect) call
/// produces an independent client endpoint backed by the same lanes, so
/// structurally equal keys contend across all of them.
pub struct ArbiterServer {
    arbiter: Arc<LocalArbiter>,
}

impl Default for ArbiterServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbiterServer {
    pub fn new() -> Self {
        Self {
            arbiter: Arc::new(LocalArbiter::new()),
        }
    }

    /// Open a client endpoint. Spawns a per-connection serving task, so a
    /// tokio runtime must be current.
    pub fn connect(&self) -> ChannelArbiter {
        let (req_tx, mut req_rx) = mpsc::unbounded_channel::<ArbiterRequest>();
        let (rep_tx, rep_rx) = mpsc::unbounded_channel::<ArbiterReply>();
        let arbiter = Arc::clone(&self.arbiter);
        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                match request {
                    ArbiterRequest::Acquire { request, key } => {
                        // Queue position is taken here, in arrival order;
                        // only the wait for the grant moves to its own
                        // task, so a blocked grant never stalls the
                        // connection and FIFO order holds.
                        let (token, waiter) = arbiter.enqueue(&key);
                        let arbiter = Arc::clone(&arbiter);
                        let rep_tx = rep_tx.clone();
                        tokio::spawn(async move {
                            let reply = match arbiter.granted(&key, token, waiter).await {
                                Ok(token) => ArbiterReply::Granted { request, token },
                                Err(e) => ArbiterReply::Denied {
                                    request,
                                    reason: e.to_string(),
                                },
                            };
                            let _ = rep_tx.send(reply);
                        });
                    }
                    ArbiterRequest::Release { token } => arbiter.release(token),
                }
            }
            tracing::debug!("arbiter connection closed");
        });
        ChannelArbiter::new(req_tx, rep_rx)
    }
}

/// Client side of the arbiter protocol. Pending acquires are routed back
/// to their callers by request id, so one endpoint can serve any number of
/// concurrent tests in its process.
pub struct ChannelArbiter {
    req_tx: mpsc::UnboundedSender<ArbiterRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<ArbiterReply>>>>,
    next_request: AtomicU64,
}

impl ChannelArbiter {
    fn new(
        req_tx: mpsc::UnboundedSender<ArbiterRequest>,
        mut rep_rx: mpsc::UnboundedReceiver<ArbiterReply>,
    ) -> Self {
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<ArbiterReply>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let router = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(reply) = rep_rx.recv().await {
                let request = match &reply {
                    ArbiterReply::Granted { request, .. } => *request,
                    ArbiterReply::Denied { request, .. } => *request,
                };
                if let Some(tx) = router.lock().remove(&request) {
                    let _ = tx.send(reply);
                }
            }
        });
        Self {
            req_tx,
            pending,
            next_request: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl LockArbiter for ChannelArbiter {
    async fn acquire(&self, key: &str) -> CoreResult<LockToken> {
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request, tx);
        self.req_tx
            .send(ArbiterRequest::Acquire {
                request,
                key: key.to_string(),
            })
            .map_err(|_| {
                self.pending.lock().remove(&request);
                TestError::LockAcquisition("lock arbiter channel is closed".to_string())
            })?;
        match rx.await {
            Ok(ArbiterReply::Granted { token, .. }) => Ok(token),
            Ok(ArbiterReply::Denied { reason, .. }) => Err(TestError::LockAcquisition(reason)),
            Err(_) => Err(TestError::LockAcquisition(
                "lock arbiter went away before replying".to_string(),
            )),
        }
    }

    fn release(&self, token: LockToken) {
        let _ = self.req_tx.send(ArbiterRequest::Release { token });
    }
}
