//! Correlation registry for outbound requests.
//!
//! Each connection owns one registry. [`CorrelationRegistry::register`]
//! allocates the next id from a per-connection counter and parks a oneshot
//! sender; the read loop calls [`CorrelationRegistry::resolve`] when the
//! matching response arrives. Every entry ends in exactly one of:
//!
//! - a response (`resolve`),
//! - a local timeout ([`PendingResponse::wait`]),
//! - connection teardown (`cancel_all`),
//! - the issuer dropping its [`PendingResponse`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::acp::envelope::{RequestId, Response};
use crate::{AppError, Result};

/// Bookkeeping for one in-flight outbound request.
#[derive(Debug)]
struct PendingRequest {
    method: String,
    issued_at: Instant,
    completion: oneshot::Sender<Result<serde_json::Value>>,
}

type PendingMap = HashMap<RequestId, PendingRequest>;

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: AtomicI64,
    pending: Mutex<PendingMap>,
}

impl RegistryInner {
    /// Lock the pending map, recovering from a poisoned lock.
    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Per-connection table of pending outbound requests.
#[derive(Debug, Clone, Default)]
pub struct CorrelationRegistry {
    inner: Arc<RegistryInner>,
}

impl CorrelationRegistry {
    /// Create an empty registry whose first id is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id for `method` and park a completion handle for it.
    #[must_use]
    pub fn register(&self, method: &str) -> (RequestId, PendingResponse) {
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(
            id.clone(),
            PendingRequest {
                method: method.to_owned(),
                issued_at: Instant::now(),
                completion: tx,
            },
        );
        let handle = PendingResponse {
            id: id.clone(),
            rx,
            registry: Arc::downgrade(&self.inner),
        };
        (id, handle)
    }

    /// Complete the pending request matching `response.id`.
    ///
    /// Returns `false` when no request is pending under that id; the response
    /// is stale (already timed out, duplicated, or never issued) and dropped.
    pub fn resolve(&self, response: Response) -> bool {
        let entry = self.inner.lock().remove(&response.id);
        match entry {
            Some(pending) => {
                debug!(
                    request_id = %response.id,
                    method = pending.method,
                    elapsed_ms = u64::try_from(pending.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "registry: response correlated"
                );
                // The issuer may have stopped waiting; nothing else to do then.
                let _ = pending.completion.send(response.into_result());
                true
            }
            None => {
                warn!(request_id = %response.id, "registry: dropping stale response");
                false
            }
        }
    }

    /// Fail every pending request with [`AppError::ConnectionClosed`].
    ///
    /// Returns the number of requests that were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = self.inner.lock().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            debug!(request_id = %id, method = pending.method, reason, "registry: cancelling");
            let _ = pending
                .completion
                .send(Err(AppError::ConnectionClosed(reason.to_owned())));
        }
        count
    }

    /// Number of requests currently pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no request is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Completion handle returned by [`CorrelationRegistry::register`].
///
/// Dropping the handle before completion removes its registry entry.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<Result<serde_json::Value>>,
    registry: Weak<RegistryInner>,
}

impl PendingResponse {
    /// Id the request was registered under.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the outcome, failing with [`AppError::Timeout`] after `timeout`.
    ///
    /// On expiry the entry is removed; a response that raced the expiry is
    /// still returned, so the request completes exactly once.
    ///
    /// # Errors
    ///
    /// Returns the peer's error, [`AppError::Timeout`], or
    /// [`AppError::ConnectionClosed`].
    pub async fn wait(mut self, timeout: Duration) -> Result<serde_json::Value> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(outcome) => flatten(outcome),
            Err(_elapsed) => {
                let removed = self
                    .registry
                    .upgrade()
                    .is_some_and(|inner| inner.lock().remove(&self.id).is_some());
                if removed {
                    Err(AppError::Timeout(format!(
                        "no response to request {} within {timeout:?}",
                        self.id
                    )))
                } else {
                    // Resolved or cancelled between the expiry and the removal.
                    flatten((&mut self.rx).await)
                }
            }
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().remove(&self.id);
        }
    }
}

fn flatten(
    outcome: std::result::Result<Result<serde_json::Value>, oneshot::error::RecvError>,
) -> Result<serde_json::Value> {
    outcome.unwrap_or_else(|_| Err(AppError::ConnectionClosed("request abandoned".into())))
}
