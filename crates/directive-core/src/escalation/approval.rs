//! Operator approval for orders that break an approval-tier law.
//!
//! `ApprovalBridge` parks each request with the sender half of a oneshot channel. An operator
//! (terminal, HTTP handler, test) answers through `respond`. The waiting decision has no
//! timeout; a dropped sender counts as a decline. A caller that drops the waiting future
//! cancels the request, and it leaves the pending set.

use crate::fingerprint::Fingerprint;
use crate::shared::Violation;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Mutex as TokioMutex};
use tracing::{info, warn};

/// What the operator is asked to approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub fingerprint: Fingerprint,
    pub order: String,
    pub violation: Violation,
    /// Epoch millis when the request was created.
    pub created_ms: i64,
}

impl ApprovalRequest {
    pub fn new(fingerprint: Fingerprint, order: impl Into<String>, violation: Violation) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            order: order.into(),
            violation,
            created_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "order '{}' violates {} (tier {}): {}",
            self.order, self.violation.rule_id, self.violation.tier, self.violation.reason
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResolution {
    Approved,
    Declined,
    /// Caller owns the workflow; report `PendingApproval` now.
    Deferred,
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request(&self, request: ApprovalRequest) -> ApprovalResolution;
}

/// Never waits. Every request resolves to `Deferred`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredApproval;

#[async_trait]
impl ApprovalGate for DeferredApproval {
    async fn request(&self, request: ApprovalRequest) -> ApprovalResolution {
        info!(approval_id = %request.id, fingerprint = %request.fingerprint, "Approval deferred to caller");
        ApprovalResolution::Deferred
    }
}

/// A parked request and its responder.
#[derive(Debug)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    /// Send `true` to approve, `false` to decline.
    responder: Option<oneshot::Sender<bool>>,
}

const ANNOUNCE_CAPACITY: usize = 64;

type PendingMap = Arc<TokioMutex<HashMap<String, PendingApproval>>>;

/// Removes a parked request when its waiter returns or is dropped.
struct ParkedGuard {
    id: String,
    pending: PendingMap,
}

impl Drop for ParkedGuard {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pending.try_lock() {
            guard.remove(&self.id);
            return;
        }
        // Lock is busy; finish the removal on the runtime. `pending()` skips the entry meanwhile.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let pending = Arc::clone(&self.pending);
            let id = std::mem::take(&mut self.id);
            handle.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

/// Shared handle; clones see the same pending set.
#[derive(Debug, Clone)]
pub struct ApprovalBridge {
    pending: PendingMap,
    announce: broadcast::Sender<ApprovalRequest>,
}

impl Default for ApprovalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalBridge {
    pub fn new() -> Self {
        let (announce, _) = broadcast::channel(ANNOUNCE_CAPACITY);
        Self {
            pending: Arc::new(TokioMutex::new(HashMap::new())),
            announce,
        }
    }

    /// Receives every request as it is parked.
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.announce.subscribe()
    }

    /// Requests still waiting for an answer, oldest first.
    pub async fn pending(&self) -> Vec<ApprovalRequest> {
        let mut guard = self.pending.lock().await;
        guard.retain(|_, p| p.responder.as_ref().is_some_and(|tx| !tx.is_closed()));
        let mut requests: Vec<ApprovalRequest> = guard.values().map(|p| p.request.clone()).collect();
        requests.sort_by_key(|r| r.created_ms);
        requests
    }

    /// Resolves `id`. Returns false if no such request is waiting.
    pub async fn respond(&self, id: &str, approved: bool) -> bool {
        let entry = self.pending.lock().await.remove(id);
        let Some(mut entry) = entry else {
            warn!(approval_id = id, "No pending approval with this id");
            return false;
        };
        info!(approval_id = id, approved, rule_id = %entry.request.violation.rule_id, "Approval answered");
        match entry.responder.take() {
            Some(tx) => tx.send(approved).is_ok(),
            None => false,
        }
    }

    /// Drops every waiting responder; the waiters resolve as declined.
    pub async fn decline_all(&self) -> usize {
        let mut guard = self.pending.lock().await;
        let count = guard.len();
        guard.clear();
        count
    }
}

#[async_trait]
impl ApprovalGate for ApprovalBridge {
    async fn request(&self, request: ApprovalRequest) -> ApprovalResolution {
        let (tx, rx) = oneshot::channel::<bool>();
        let id = request.id.clone();
        {
            let mut guard = self.pending.lock().await;
            guard.insert(
                id.clone(),
                PendingApproval {
                    request: request.clone(),
                    responder: Some(tx),
                },
            );
        }
        let _parked = ParkedGuard {
            id: id.clone(),
            pending: Arc::clone(&self.pending),
        };
        info!(approval_id = %id, "Awaiting operator approval: {}", request.describe());
        // No subscribers is fine; `pending()` still lists the request.
        let _ = self.announce.send(request);

        let approved = rx.await.unwrap_or(false);

        if approved {
            ApprovalResolution::Approved
        } else {
            ApprovalResolution::Declined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> ApprovalRequest {
        ApprovalRequest::new(
            Fingerprint::from_hex("ab12"),
            "disable self",
            Violation {
                rule_id: "self_preservation".into(),
                tier: 3,
                reason: "order matches harm pattern".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_bridge_approve() {
        let bridge = ApprovalBridge::new();
        let mut announcements = bridge.subscribe();
        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request()).await })
        };

        let parked = announcements.recv().await.unwrap();
        assert_eq!(bridge.pending().await.len(), 1);
        assert!(bridge.respond(&parked.id, true).await);

        assert_eq!(waiter.await.unwrap(), ApprovalResolution::Approved);
        assert!(bridge.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_bridge_decline_and_drop() {
        let bridge = ApprovalBridge::new();
        let mut announcements = bridge.subscribe();

        let declined = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request()).await })
        };
        let parked = announcements.recv().await.unwrap();
        bridge.respond(&parked.id, false).await;
        assert_eq!(declined.await.unwrap(), ApprovalResolution::Declined);

        let dropped = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request(request()).await })
        };
        announcements.recv().await.unwrap();
        assert_eq!(bridge.decline_all().await, 1);
        assert_eq!(dropped.await.unwrap(), ApprovalResolution::Declined);
    }

    #[tokio::test]
    async fn test_respond_to_unknown_id() {
        let bridge = ApprovalBridge::new();
        assert!(!bridge.respond("nope", true).await);
    }

    #[tokio::test]
    async fn test_deferred_never_waits() {
        assert_eq!(DeferredApproval.request(request()).await, ApprovalResolution::Deferred);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_pending_set() {
        let bridge = ApprovalBridge::new();
        let waited = tokio::time::timeout(Duration::from_millis(50), bridge.request(request())).await;
        assert!(waited.is_err());
        assert!(bridge.pending().await.is_empty());
        assert!(bridge.pending.lock().await.is_empty());
    }
}
