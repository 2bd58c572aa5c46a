//! Tracks the single in-flight asynchronous operation a service instance may
//! have at a time, and bridges it back to a synchronous caller when one is
//! waiting. `tokio::sync::oneshot` is the hand-off between "kick off async
//! work" and "the request handler that's still waiting for it" - the same
//! shape `last_operation` polling and a same-request synchronous provision
//! both need, just observed at different points in time.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::error::{ErrorKind, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    Provision,
    Update,
    Deprovision,
    Bind,
    Unbind,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Provision => "provision",
            OperationKind::Update => "update",
            OperationKind::Deprovision => "deprovision",
            OperationKind::Bind => "bind",
            OperationKind::Unbind => "unbind",
        }
    }
}

/// The handle returned to a caller that kicked off async work: an opaque id
/// to hand back as `operation` in the OSB response, plus its kind.
#[derive(Clone, Debug)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
}

/// Held by the spawned task for the duration of its run; releases the
/// instance-level lock on drop so the next request against this instance can
/// proceed once this operation lands (successfully or not).
pub struct OperationLease {
    inflight: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for OperationLease {
    fn drop(&mut self) {
        let inflight = self.inflight.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            inflight.lock().await.remove(&key);
        });
    }
}

/// Enforces at most one in-flight operation per instance (keyed by instance
/// or binding composite id) and runs operations as background tasks.
#[derive(Clone)]
pub struct OperationManager {
    inflight: Arc<Mutex<HashSet<String>>>,
}

impl OperationManager {
    pub fn new() -> Self {
        OperationManager { inflight: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Reserve `key` for the duration of one operation. `ResourceConflict`
    /// (mapped to HTTP 422 `ConcurrencyError`) if another is already running.
    pub async fn acquire(&self, key: &str) -> Result<OperationLease> {
        let mut guard = self.inflight.lock().await;
        if !guard.insert(key.to_string()) {
            return Err(ErrorKind::ResourceConflict(format!("an operation is already in progress for {}", key)).into());
        }
        Ok(OperationLease { inflight: self.inflight.clone(), key: key.to_string() })
    }

    /// Start `task` as a background operation. Returns its `Operation` handle
    /// immediately and a `oneshot::Receiver` the caller may await if it needs
    /// the result before responding (the synchronous, `accepts_incomplete =
    /// false` path); callers that don't care can just drop the receiver and
    /// let polling pick up the terminal status the task itself persists.
    pub fn dispatch<F, Fut>(&self, lease: OperationLease, kind: OperationKind, task: F) -> (Operation, oneshot::Receiver<Result<()>>)
    where
        F: FnOnce(OperationLease) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let operation = Operation { id: Uuid::new_v4().to_string(), kind };
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = task(lease).await;
            let _ = tx.send(result);
        });
        (operation, rx)
    }
}

impl Default for OperationManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_for_same_key_conflicts() {
        let mgr = OperationManager::new();
        let lease = mgr.acquire("instance-1").await.unwrap();
        assert!(mgr.acquire("instance-1").await.is_err());
        drop(lease);
    }

    #[tokio::test]
    async fn lease_release_unblocks_the_next_acquire() {
        let mgr = OperationManager::new();
        let lease = mgr.acquire("instance-1").await.unwrap();
        drop(lease);
        tokio::task::yield_now().await;
        // give the spawned release task a moment to run
        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        assert!(mgr.acquire("instance-1").await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_delivers_result_on_the_oneshot_channel() {
        let mgr = OperationManager::new();
        let lease = mgr.acquire("instance-1").await.unwrap();
        let (op, rx) = mgr.dispatch(lease, OperationKind::Provision, |_lease| async move { Ok(()) });
        assert_eq!(op.kind, OperationKind::Provision);
        assert!(rx.await.unwrap().is_ok());
    }
}
