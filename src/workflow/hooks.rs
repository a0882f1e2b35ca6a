//! Side-effect hooks
//!
//! Hooks run after a transition has been committed. Their failures never roll
//! the transition back; the engine reports them as degraded success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::request::{ActorSnapshot, Request};
use super::state::{Action, RequestStatus};
use crate::error::Result;
use crate::ids::{RequestId, UserId};

/// Reference to the work item published from an approved request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedItemRef {
    pub kind: String,
    pub id: String,
}

/// Events emitted as requests move through review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A request was submitted and routed
    Submitted {
        request_id: RequestId,
        requester: UserId,
        eligible: Vec<UserId>,
    },
    /// An actor action changed the request
    Transitioned {
        request_id: RequestId,
        action: Action,
        actor: ActorSnapshot,
        from: RequestStatus,
        to: RequestStatus,
    },
    /// A reviewer took (or took over) the claim
    Claimed {
        request_id: RequestId,
        actor: UserId,
        expires_at: DateTime<Utc>,
    },
    /// An unanswered reschedule proposal lapsed
    Expired { request_id: RequestId },
    /// An approved request's schedule window ended
    Completed { request_id: RequestId },
}

impl WorkflowEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            WorkflowEvent::Submitted { request_id, .. }
            | WorkflowEvent::Transitioned { request_id, .. }
            | WorkflowEvent::Claimed { request_id, .. }
            | WorkflowEvent::Expired { request_id }
            | WorkflowEvent::Completed { request_id } => *request_id,
        }
    }
}

/// Turns an approved request into a derived work item
#[async_trait]
pub trait PublishHook: Send + Sync {
    async fn on_approved(&self, request: &Request) -> Result<DerivedItemRef>;
}

/// Fire-and-forget transition notifications
#[async_trait]
pub trait NotifyHook: Send + Sync {
    async fn on_transition(&self, event: &WorkflowEvent) -> Result<()>;
}

/// A side effect that failed after its transition committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideEffectFailure {
    /// "publish" or "notify"
    pub hook: String,
    pub error: String,
}

impl SideEffectFailure {
    pub fn new(hook: impl Into<String>, error: impl ToString) -> Self {
        Self {
            hook: hook.into(),
            error: error.to_string(),
        }
    }
}

/// Publisher that derives nothing
pub struct NoopPublisher;

#[async_trait]
impl PublishHook for NoopPublisher {
    async fn on_approved(&self, request: &Request) -> Result<DerivedItemRef> {
        Ok(DerivedItemRef {
            kind: request.request_type().to_string(),
            id: request.id().to_string(),
        })
    }
}

/// Notifier fanning events out over a broadcast channel
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<WorkflowEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Subscribe to workflow events
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotifyHook for BroadcastNotifier {
    async fn on_transition(&self, event: &WorkflowEvent) -> Result<()> {
        // No subscribers is not a failure
        let _ = self.event_tx.send(event.clone());
        Ok(())
    }
}
