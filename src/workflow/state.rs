//! Request state machine
//!
//! Statuses, actions, and the edge table between them. The table is pure:
//! it answers "where does this edge lead from here" and nothing else. Who is
//! allowed to walk the edge is the validator's business.

use serde::{Deserialize, Serialize};

use super::authority::Authority;

/// Status of a review request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestStatus {
    /// Submitted, waiting on the reviewer side
    PendingReview,
    /// Reviewer accepted, waiting on the requester to confirm
    ReviewAccepted,
    /// Reviewer rejected, waiting on the requester to acknowledge or counter
    ReviewRejected,
    /// A new schedule was proposed, waiting on the other party
    ReviewRescheduled,
    Approved,
    Rejected,
    Cancelled,
    Completed,
    /// A reschedule proposal went unanswered past the expiry window
    ExpiredReview,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::PendingReview => "pending-review",
            RequestStatus::ReviewAccepted => "review-accepted",
            RequestStatus::ReviewRejected => "review-rejected",
            RequestStatus::ReviewRescheduled => "review-rescheduled",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Completed => "completed",
            RequestStatus::ExpiredReview => "expired-review",
        }
    }

    /// No negotiation is possible from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Approved
                | RequestStatus::Rejected
                | RequestStatus::Cancelled
                | RequestStatus::Completed
                | RequestStatus::ExpiredReview
        )
    }

    /// Statuses where the requester and reviewer take turns
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            RequestStatus::ReviewAccepted
                | RequestStatus::ReviewRejected
                | RequestStatus::ReviewRescheduled
        )
    }

    /// Statuses in which the request body may still be edited
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            RequestStatus::PendingReview
                | RequestStatus::ReviewAccepted
                | RequestStatus::ReviewRescheduled
        )
    }

    /// Statuses that count as "touched a refusal" for the confirm refinement
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected | RequestStatus::ReviewRejected | RequestStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending-review" => Ok(RequestStatus::PendingReview),
            "review-accepted" => Ok(RequestStatus::ReviewAccepted),
            "review-rejected" => Ok(RequestStatus::ReviewRejected),
            "review-rescheduled" => Ok(RequestStatus::ReviewRescheduled),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "completed" => Ok(RequestStatus::Completed),
            "expired-review" => Ok(RequestStatus::ExpiredReview),
            _ => Err(format!("Invalid request status: {}", s)),
        }
    }
}

/// Actions an actor may attempt on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Accept,
    Reject,
    Confirm,
    Decline,
    Reschedule,
    Cancel,
    Edit,
    Delete,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::View,
        Action::Accept,
        Action::Reject,
        Action::Confirm,
        Action::Decline,
        Action::Reschedule,
        Action::Cancel,
        Action::Edit,
        Action::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Confirm => "confirm",
            Action::Decline => "decline",
            Action::Reschedule => "reschedule",
            Action::Cancel => "cancel",
            Action::Edit => "edit",
            Action::Delete => "delete",
        }
    }

    /// Actions that take a negotiation turn
    pub fn is_turn_action(&self) -> bool {
        matches!(
            self,
            Action::Accept | Action::Reject | Action::Confirm | Action::Decline | Action::Reschedule
        )
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Action::View)
    }

    /// State-machine edge this action walks, if it changes status
    pub fn edge(&self) -> Option<Edge> {
        match self {
            Action::Accept | Action::Confirm => Some(Edge::Approve),
            Action::Reject | Action::Decline => Some(Edge::Refuse),
            Action::Reschedule => Some(Edge::Reschedule),
            Action::Cancel => Some(Edge::Cancel),
            Action::View | Action::Edit | Action::Delete => None,
        }
    }

    /// The word for the same edge in the other vocabulary (accept <-> confirm, reject <-> decline)
    pub fn alias(&self) -> Option<Action> {
        match self {
            Action::Accept => Some(Action::Confirm),
            Action::Confirm => Some(Action::Accept),
            Action::Reject => Some(Action::Decline),
            Action::Decline => Some(Action::Reject),
            _ => None,
        }
    }

    /// Whether this action's vocabulary fits an actor with `authority`.
    ///
    /// Reviewer-tier actors say accept/reject, everyone else confirm/decline.
    /// Actions without an alias fit everyone.
    pub fn fits_vocabulary(&self, authority: Authority, reviewer_tier: Authority) -> bool {
        match self {
            Action::Accept | Action::Reject => authority >= reviewer_tier,
            Action::Confirm | Action::Decline => authority < reviewer_tier,
            _ => true,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(Action::View),
            "accept" => Ok(Action::Accept),
            "reject" => Ok(Action::Reject),
            "confirm" => Ok(Action::Confirm),
            "decline" => Ok(Action::Decline),
            "reschedule" => Ok(Action::Reschedule),
            "cancel" => Ok(Action::Cancel),
            "edit" => Ok(Action::Edit),
            "delete" => Ok(Action::Delete),
            _ => Err(format!("Invalid action: {}", s)),
        }
    }
}

/// A status-changing edge, independent of vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Approve,
    Refuse,
    Reschedule,
    Cancel,
}

/// The two sides of a negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Requester,
    Reviewer,
}

impl Party {
    pub fn other(&self) -> Party {
        match self {
            Party::Requester => Party::Reviewer,
            Party::Reviewer => Party::Requester,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Party::Requester => "requester",
            Party::Reviewer => "reviewer",
        }
    }
}

/// Where `edge` leads from `status`, or `None` if the edge is not legal there
pub fn next_status(
    status: RequestStatus,
    edge: Edge,
    require_confirmation: bool,
) -> Option<RequestStatus> {
    use RequestStatus::*;

    if status.is_terminal() {
        return None;
    }

    match (status, edge) {
        (_, Edge::Cancel) => Some(Cancelled),

        (PendingReview, Edge::Approve) if require_confirmation => Some(ReviewAccepted),
        (PendingReview, Edge::Approve) => Some(Approved),
        (PendingReview, Edge::Refuse) if require_confirmation => Some(ReviewRejected),
        (PendingReview, Edge::Refuse) => Some(Rejected),

        (ReviewAccepted, Edge::Approve) => Some(Approved),
        (ReviewAccepted, Edge::Refuse) => Some(Rejected),

        // Acknowledging a rejection finalizes it; there is nothing to approve
        (ReviewRejected, Edge::Approve) => None,
        (ReviewRejected, Edge::Refuse) => Some(Rejected),

        (ReviewRescheduled, Edge::Approve) => Some(Approved),
        (ReviewRescheduled, Edge::Refuse) => Some(Rejected),

        (_, Edge::Reschedule) => Some(ReviewRescheduled),

        _ => None,
    }
}

/// Which party must move next.
///
/// `proposer` is the party that made the standing reschedule proposal, if any.
pub fn active_responder(status: RequestStatus, proposer: Option<Party>) -> Option<Party> {
    match status {
        RequestStatus::PendingReview => Some(Party::Reviewer),
        RequestStatus::ReviewAccepted | RequestStatus::ReviewRejected => Some(Party::Requester),
        RequestStatus::ReviewRescheduled => proposer.map(|p| p.other()),
        _ => None,
    }
}
