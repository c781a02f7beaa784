//! Pending requests tracker
//!
//! Tracks HTTP requests sent through tunnels and routes responses back to the waiting
//! ingress handlers by correlation id.

use dashmap::DashMap;
use publictunnel_proto::HttpResponsePayload;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

type Slots = DashMap<String, oneshot::Sender<HttpResponsePayload>>;

/// Why a wait ended without a response
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    #[error("Timed out waiting for response to request {0}")]
    TimedOut(String),

    #[error("Request {0} was cancelled")]
    Cancelled(String),
}

/// Tracks pending HTTP requests awaiting responses
#[derive(Clone, Default)]
pub struct PendingRequests {
    /// Maps correlation id -> oneshot sender for the response
    requests: Arc<Slots>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request
    ///
    /// The entry lives until the returned slot is dropped or a response is delivered.
    pub fn register(&self, id: impl Into<String>) -> PendingSlot {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        self.requests.insert(id.clone(), tx);
        debug!("Registered pending request {}", id);

        PendingSlot {
            id,
            rx: Some(rx),
            requests: self.requests.clone(),
        }
    }

    /// Route a response to the request it answers
    ///
    /// Returns false for unknown or already-resolved ids; the response is dropped.
    pub fn deliver(&self, response: HttpResponsePayload) -> bool {
        let Some((id, tx)) = self.requests.remove(&response.id) else {
            debug!("Dropping response for unknown request {}", response.id);
            return false;
        };

        if tx.send(response).is_err() {
            debug!("Waiter for request {} is gone", id);
            return false;
        }
        debug!("Delivered response for request {}", id);
        true
    }

    /// Cancel a pending request; its waiter sees [`PendingError::Cancelled`]
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.requests.remove(id).is_some();
        if removed {
            debug!("Cancelled pending request {}", id);
        }
        removed
    }

    /// Get count of pending requests
    pub fn count(&self) -> usize {
        self.requests.len()
    }
}

/// One outstanding request. Dropping it removes the table entry.
pub struct PendingSlot {
    id: String,
    rx: Option<oneshot::Receiver<HttpResponsePayload>>,
    requests: Arc<Slots>,
}

impl PendingSlot {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response, at most `timeout`
    pub async fn wait(mut self, timeout: Duration) -> Result<HttpResponsePayload, PendingError> {
        let Some(rx) = self.rx.take() else {
            return Err(PendingError::Cancelled(self.id.clone()));
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(PendingError::Cancelled(self.id.clone())),
            Err(_) => {
                debug!("Request {} timed out after {:?}", self.id, timeout);
                Err(PendingError::TimedOut(self.id.clone()))
            }
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        // Close our receiver first so only an entry we own matches below
        drop(self.rx.take());
        self.requests.remove_if(&self.id, |_, tx| tx.is_closed());
    }
}

impl std::fmt::Debug for PendingSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingSlot").field("id", &self.id).finish()
    }
}
