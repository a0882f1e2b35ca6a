//! Review requests and their audit records
//!
//! Fields are crate-private: the transition executor is the only writer, and
//! the histories only ever grow.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::authority::Authority;
use super::state::{self, Action, Party, RequestStatus};
use crate::ids::{LocationId, OrgTag, RequestId, UserId};

/// Who did something, frozen at the moment they did it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    pub user: UserId,
    pub role: String,
    pub authority: Authority,
}

impl ActorSnapshot {
    pub fn new(user: UserId, role: impl Into<String>, authority: Authority) -> Self {
        Self {
            user,
            role: role.into(),
            authority,
        }
    }

    /// Actor recorded for sweeps and other engine-driven transitions
    pub fn system() -> Self {
        Self {
            user: UserId::from(Uuid::nil()),
            role: "system".to_string(),
            authority: Authority::SYSTEM_ADMIN,
        }
    }
}

/// Proposed or agreed date/time window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl ScheduleWindow {
    pub fn new(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.end.unwrap_or(self.start)
    }

    pub fn is_well_formed(&self) -> bool {
        self.end.map_or(true, |end| end >= self.start)
    }
}

/// Where a request takes place and which organization it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationContext {
    pub location: LocationId,
    pub org: OrgTag,
}

/// One entry in the status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: RequestStatus,
    pub actor: ActorSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// Kind of a recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Submit,
    Accept,
    Reject,
    Confirm,
    Decline,
    Reschedule,
    Cancel,
    Edit,
    Delete,
    Expire,
    Complete,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Submit => "submit",
            DecisionKind::Accept => "accept",
            DecisionKind::Reject => "reject",
            DecisionKind::Confirm => "confirm",
            DecisionKind::Decline => "decline",
            DecisionKind::Reschedule => "reschedule",
            DecisionKind::Cancel => "cancel",
            DecisionKind::Edit => "edit",
            DecisionKind::Delete => "delete",
            DecisionKind::Expire => "expire",
            DecisionKind::Complete => "complete",
        }
    }

    /// Decision recorded for an actor action; `None` for read-only actions
    pub fn for_action(action: Action) -> Option<Self> {
        match action {
            Action::View => None,
            Action::Accept => Some(DecisionKind::Accept),
            Action::Reject => Some(DecisionKind::Reject),
            Action::Confirm => Some(DecisionKind::Confirm),
            Action::Decline => Some(DecisionKind::Decline),
            Action::Reschedule => Some(DecisionKind::Reschedule),
            Action::Cancel => Some(DecisionKind::Cancel),
            Action::Edit => Some(DecisionKind::Edit),
            Action::Delete => Some(DecisionKind::Delete),
        }
    }
}

/// One entry in the decision history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub kind: DecisionKind,
    pub actor: ActorSnapshot,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// A standing reschedule proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleProposal {
    pub window: ScheduleWindow,
    pub proposed_by: ActorSnapshot,
    pub party: Party,
    pub note: String,
    pub proposed_at: DateTime<Utc>,
}

/// Most recent negotiation move
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastAction {
    pub actor: UserId,
    pub action: Action,
    pub at: DateTime<Utc>,
}

/// Exclusive write claim held by one reviewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub actor: UserId,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn new(actor: UserId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            actor,
            claimed_at: now,
            expires_at: now
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Candidate reviewer computed at submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibleReviewer {
    pub user: UserId,
    pub authority: Authority,
    pub discovered_at: DateTime<Utc>,
}

/// How the reviewer assignment was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentRule {
    /// Reviewer-tier users covering the location with a matching affiliation
    CoverageMatch,
    /// Routed above a reviewer-tier requester
    EscalatedToHigherTier,
    /// Explicitly handed to a reviewer below the requester's authority
    DelegatedToLowerTier,
    /// Explicitly named reviewer at or above the requester's authority
    Manual,
}

impl AssignmentRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentRule::CoverageMatch => "coverage-match",
            AssignmentRule::EscalatedToHigherTier => "escalated-to-higher-tier",
            AssignmentRule::DelegatedToLowerTier => "delegated-to-lower-tier",
            AssignmentRule::Manual => "manual",
        }
    }

    /// Rules that let the named reviewer bypass the default hierarchy check
    pub fn is_override(&self) -> bool {
        matches!(
            self,
            AssignmentRule::EscalatedToHigherTier | AssignmentRule::DelegatedToLowerTier
        )
    }
}

/// Primary reviewer assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerAssignment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<UserId>,
    pub rule: AssignmentRule,
    pub auto_assigned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overridden_by: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overridden_at: Option<DateTime<Utc>>,
}

impl ReviewerAssignment {
    /// Whether an explicit override rule names `user`
    pub fn overrides_hierarchy_for(&self, user: UserId) -> bool {
        self.rule.is_override() && self.reviewer == Some(user)
    }
}

/// Soft-deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deletion {
    pub by: ActorSnapshot,
    pub at: DateTime<Utc>,
}

/// A request moving through review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub(crate) id: RequestId,
    pub(crate) request_type: String,
    pub(crate) title: String,
    pub(crate) details: serde_json::Value,
    pub(crate) schedule: ScheduleWindow,
    pub(crate) context: LocationContext,
    pub(crate) requester: ActorSnapshot,
    pub(crate) reviewer: ReviewerAssignment,
    pub(crate) status: RequestStatus,
    pub(crate) status_history: Vec<StatusEntry>,
    pub(crate) decision_history: Vec<DecisionEntry>,
    pub(crate) reschedule_proposal: Option<RescheduleProposal>,
    pub(crate) last_action: Option<LastAction>,
    pub(crate) claimed_by: Option<Claim>,
    pub(crate) eligible_reviewers: Vec<EligibleReviewer>,
    pub(crate) deleted: Option<Deletion>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Everything a freshly submitted request needs
pub(crate) struct NewRequest {
    pub request_type: String,
    pub title: String,
    pub details: serde_json::Value,
    pub schedule: ScheduleWindow,
    pub context: LocationContext,
    pub requester: ActorSnapshot,
    pub reviewer: ReviewerAssignment,
    pub eligible_reviewers: Vec<EligibleReviewer>,
}

impl Request {
    pub(crate) fn new(new: NewRequest, now: DateTime<Utc>) -> Self {
        let submitted = StatusEntry {
            status: RequestStatus::PendingReview,
            actor: new.requester.clone(),
            note: Some("submitted".to_string()),
            at: now,
        };
        let decision = DecisionEntry {
            kind: DecisionKind::Submit,
            actor: new.requester.clone(),
            payload: serde_json::json!({
                "request_type": new.request_type,
                "schedule": new.schedule,
            }),
            at: now,
        };

        Self {
            id: RequestId::new(),
            request_type: new.request_type,
            title: new.title,
            details: new.details,
            schedule: new.schedule,
            context: new.context,
            requester: new.requester,
            reviewer: new.reviewer,
            status: RequestStatus::PendingReview,
            status_history: vec![submitted],
            decision_history: vec![decision],
            reschedule_proposal: None,
            last_action: None,
            claimed_by: None,
            eligible_reviewers: new.eligible_reviewers,
            deleted: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn details(&self) -> &serde_json::Value {
        &self.details
    }

    pub fn schedule(&self) -> &ScheduleWindow {
        &self.schedule
    }

    pub fn context(&self) -> &LocationContext {
        &self.context
    }

    /// Requester snapshot frozen at submission
    pub fn requester(&self) -> &ActorSnapshot {
        &self.requester
    }

    pub fn reviewer(&self) -> &ReviewerAssignment {
        &self.reviewer
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn status_history(&self) -> &[StatusEntry] {
        &self.status_history
    }

    pub fn decision_history(&self) -> &[DecisionEntry] {
        &self.decision_history
    }

    pub fn reschedule_proposal(&self) -> Option<&RescheduleProposal> {
        self.reschedule_proposal.as_ref()
    }

    pub fn last_action(&self) -> Option<&LastAction> {
        self.last_action.as_ref()
    }

    pub fn claimed_by(&self) -> Option<&Claim> {
        self.claimed_by.as_ref()
    }

    pub fn eligible_reviewers(&self) -> &[EligibleReviewer] {
        &self.eligible_reviewers
    }

    pub fn deleted(&self) -> Option<&Deletion> {
        self.deleted.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_requester(&self, user: UserId) -> bool {
        self.requester.user == user
    }

    /// Which side of the negotiation `user` is on
    pub fn party_of(&self, user: UserId) -> Party {
        if self.is_requester(user) {
            Party::Requester
        } else {
            Party::Reviewer
        }
    }

    /// The party entitled to the next negotiation move, if any
    pub fn active_responder(&self) -> Option<Party> {
        state::active_responder(
            self.status,
            self.reschedule_proposal.as_ref().map(|p| p.party),
        )
    }

    pub fn is_eligible(&self, user: UserId) -> bool {
        self.eligible_reviewers.iter().any(|r| r.user == user)
    }

    /// Claim still in force at `now`
    pub fn active_claim(&self, now: DateTime<Utc>) -> Option<&Claim> {
        self.claimed_by.as_ref().filter(|c| c.is_active(now))
    }

    /// Authority an actor must exceed to act over someone else's claim
    pub fn claim_override_floor(&self, reviewer_tier: Authority) -> Authority {
        self.eligible_reviewers
            .iter()
            .map(|r| r.authority)
            .max()
            .unwrap_or(reviewer_tier)
    }

    /// Whether the request ever sat in a rejected or cancelled status
    pub fn touched_refusal(&self) -> bool {
        self.status_history.iter().any(|e| e.status.is_refusal())
    }
}
