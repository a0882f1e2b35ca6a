//! Transition executor
//!
//! The only writer of request state. It works on a copy: the caller commits
//! the returned request with a conditional write, so a lost race leaves the
//! stored request untouched.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::request::{
    ActorSnapshot, Claim, DecisionEntry, DecisionKind, Deletion, LastAction, Request,
    RescheduleProposal, ScheduleWindow, StatusEntry,
};
use super::state::{self, Action, Edge, Party, RequestStatus};
use crate::config::EngineConfig;
use crate::error::{AppError, Result};

/// Fields an edit may change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleWindow>,
}

impl RequestChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.details.is_none() && self.schedule.is_none()
    }
}

/// Payload accompanying an action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// New window for a reschedule
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed: Option<ScheduleWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<RequestChanges>,
}

impl ActionInput {
    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Default::default()
        }
    }

    pub fn reschedule(window: ScheduleWindow, note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            proposed: Some(window),
            changes: None,
        }
    }

    pub fn edit(changes: RequestChanges) -> Self {
        Self {
            changes: Some(changes),
            ..Default::default()
        }
    }

    /// Required-field checks that run before authorization
    pub fn check(&self, action: Action, now: DateTime<Utc>) -> Result<()> {
        match action {
            Action::Reschedule => {
                let window = self.proposed.as_ref().ok_or_else(|| {
                    AppError::Input("reschedule requires a proposed date".to_string())
                })?;
                if window.start <= now {
                    return Err(AppError::Input(
                        "proposed date must be in the future".to_string(),
                    ));
                }
                if !window.is_well_formed() {
                    return Err(AppError::Input(
                        "proposed window ends before it starts".to_string(),
                    ));
                }
                if self.note().is_none() {
                    return Err(AppError::Input("reschedule requires a note".to_string()));
                }
            }
            Action::Edit => {
                let changes = self
                    .changes
                    .as_ref()
                    .filter(|c| !c.is_empty())
                    .ok_or_else(|| AppError::Input("edit requires changes".to_string()))?;
                if let Some(title) = &changes.title {
                    if title.trim().is_empty() {
                        return Err(AppError::Input("title cannot be empty".to_string()));
                    }
                }
                if let Some(schedule) = &changes.schedule {
                    if !schedule.is_well_formed() {
                        return Err(AppError::Input(
                            "schedule ends before it starts".to_string(),
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Trimmed, non-empty note
    fn note(&self) -> Option<&str> {
        self.note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

pub struct TransitionExecutor {
    require_confirmation: bool,
    claim_ttl: Duration,
}

impl TransitionExecutor {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            require_confirmation: config.require_confirmation,
            claim_ttl: config.claim_ttl()?,
        })
    }

    /// Apply a validated action to a copy of `request`
    pub fn apply(
        &self,
        request: &Request,
        actor: &ActorSnapshot,
        action: Action,
        input: &ActionInput,
        now: DateTime<Utc>,
    ) -> Result<Request> {
        let mut next = request.clone();
        let note = input.note().map(str::to_string);

        match action {
            Action::View => {
                return Err(AppError::Internal("view does not change a request".to_string()));
            }
            Action::Edit => self.apply_edit(&mut next, input)?,
            Action::Delete => {
                next.deleted = Some(Deletion {
                    by: actor.clone(),
                    at: now,
                });
            }
            _ => self.apply_edge(&mut next, actor, action, input, now)?,
        }

        let from = request.status;
        if let Some(kind) = DecisionKind::for_action(action) {
            next.decision_history.push(DecisionEntry {
                kind,
                actor: actor.clone(),
                payload: json!({
                    "action": action,
                    "from": from,
                    "to": next.status,
                    "note": note,
                    "proposed": input.proposed,
                    "changes": input.changes,
                }),
                at: now,
            });
        }

        if action.is_turn_action() || action == Action::Cancel {
            next.last_action = Some(LastAction {
                actor: actor.user,
                action,
                at: now,
            });
        }

        if action.is_turn_action() && next.party_of(actor.user) == Party::Reviewer {
            self.take_claim(&mut next, actor, now);
        }

        next.updated_at = now;
        Ok(next)
    }

    /// Sweep transition: an unanswered reschedule proposal lapsed
    pub fn expire(&self, request: &Request, now: DateTime<Utc>) -> Result<Request> {
        if request.status != RequestStatus::ReviewRescheduled {
            return Err(AppError::Internal(format!(
                "cannot expire a request that is {}",
                request.status
            )));
        }
        let mut next = request.clone();
        let proposal = next.reschedule_proposal.take();
        self.system_transition(
            &mut next,
            RequestStatus::ExpiredReview,
            DecisionKind::Expire,
            json!({ "proposal": proposal }),
            "reschedule proposal expired",
            now,
        );
        Ok(next)
    }

    /// Sweep transition: an approved request's window ended
    pub fn complete(&self, request: &Request, now: DateTime<Utc>) -> Result<Request> {
        if request.status != RequestStatus::Approved {
            return Err(AppError::Internal(format!(
                "cannot complete a request that is {}",
                request.status
            )));
        }
        let mut next = request.clone();
        let ended = next.schedule.ends_at();
        self.system_transition(
            &mut next,
            RequestStatus::Completed,
            DecisionKind::Complete,
            json!({ "ended_at": ended }),
            "schedule window ended",
            now,
        );
        Ok(next)
    }

    fn apply_edge(
        &self,
        next: &mut Request,
        actor: &ActorSnapshot,
        action: Action,
        input: &ActionInput,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let edge = action
            .edge()
            .ok_or_else(|| AppError::Internal(format!("{} has no state edge", action)))?;
        let to = state::next_status(next.status, edge, self.require_confirmation).ok_or_else(
            || AppError::Internal(format!("{} is not legal from {}", action, next.status)),
        )?;

        match edge {
            Edge::Reschedule => {
                let window = input.proposed.clone().ok_or_else(|| {
                    AppError::Input("reschedule requires a proposed date".to_string())
                })?;
                next.reschedule_proposal = Some(RescheduleProposal {
                    window,
                    proposed_by: actor.clone(),
                    party: next.party_of(actor.user),
                    note: input.note().unwrap_or_default().to_string(),
                    proposed_at: now,
                });
            }
            Edge::Approve => {
                // Accepting a proposal adopts its window
                if let Some(proposal) = next.reschedule_proposal.take() {
                    next.schedule = proposal.window;
                }
            }
            Edge::Refuse | Edge::Cancel => {
                next.reschedule_proposal = None;
            }
        }

        next.status = to;
        next.status_history.push(StatusEntry {
            status: to,
            actor: actor.clone(),
            note: input.note().map(str::to_string),
            at: now,
        });
        Ok(())
    }

    fn apply_edit(&self, next: &mut Request, input: &ActionInput) -> Result<()> {
        let changes = input
            .changes
            .as_ref()
            .ok_or_else(|| AppError::Input("edit requires changes".to_string()))?;
        if let Some(title) = &changes.title {
            next.title = title.trim().to_string();
        }
        if let Some(details) = &changes.details {
            next.details = details.clone();
        }
        if let Some(schedule) = &changes.schedule {
            next.schedule = schedule.clone();
        }
        Ok(())
    }

    /// Claim for `actor`, recording an override when someone else held it
    fn take_claim(&self, next: &mut Request, actor: &ActorSnapshot, now: DateTime<Utc>) {
        let previous = next.active_claim(now).map(|c| c.actor);
        if let Some(holder) = previous.filter(|holder| *holder != actor.user) {
            tracing::info!(
                request_id = %next.id,
                previous = %holder,
                actor = %actor.user,
                "Claim taken over by higher authority"
            );
            next.reviewer.overridden_by = Some(actor.user);
            next.reviewer.overridden_at = Some(now);
        }
        if next.reviewer.auto_assigned {
            next.reviewer.reviewer = Some(actor.user);
        }
        next.claimed_by = Some(Claim::new(actor.user, now, self.claim_ttl));
    }

    fn system_transition(
        &self,
        next: &mut Request,
        to: RequestStatus,
        kind: DecisionKind,
        payload: serde_json::Value,
        note: &str,
        now: DateTime<Utc>,
    ) {
        let system = ActorSnapshot::system();
        next.status = to;
        next.status_history.push(StatusEntry {
            status: to,
            actor: system.clone(),
            note: Some(note.to_string()),
            at: now,
        });
        next.decision_history.push(DecisionEntry {
            kind,
            actor: system,
            payload,
            at: now,
        });
        next.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::authority::Authority;
    use crate::workflow::request::fixtures::{request_with, snapshot};

    fn executor(require_confirmation: bool) -> TransitionExecutor {
        let config = EngineConfig::default().with_confirmation(require_confirmation);
        TransitionExecutor::new(&config).unwrap()
    }

    fn later(days: i64) -> ScheduleWindow {
        ScheduleWindow::new(Utc::now() + Duration::days(days), None)
    }

    #[test]
    fn test_accept_approves_and_claims() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let coordinator = snapshot(Authority::COORDINATOR);
        let request = request_with(requester, &[coordinator.clone()]);
        let now = Utc::now();

        let next = executor(false)
            .apply(&request, &coordinator, Action::Accept, &ActionInput::default(), now)
            .unwrap();

        assert_eq!(next.status(), RequestStatus::Approved);
        assert_eq!(next.claimed_by().unwrap().actor, coordinator.user);
        assert_eq!(next.claimed_by().unwrap().expires_at, now + Duration::hours(24));
        assert_eq!(next.last_action().unwrap().action, Action::Accept);
        assert_eq!(next.status_history().len(), 2);
        assert_eq!(next.decision_history().len(), 2);

        // Input untouched
        assert_eq!(request.status(), RequestStatus::PendingReview);
        assert!(request.claimed_by().is_none());
    }

    #[test]
    fn test_accept_with_confirmation_goes_to_review_accepted() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let coordinator = snapshot(Authority::COORDINATOR);
        let request = request_with(requester, &[coordinator.clone()]);

        let next = executor(true)
            .apply(&request, &coordinator, Action::Accept, &ActionInput::default(), Utc::now())
            .unwrap();
        assert_eq!(next.status(), RequestStatus::ReviewAccepted);
    }

    #[test]
    fn test_reschedule_then_accept_adopts_window() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let coordinator = snapshot(Authority::COORDINATOR);
        let request = request_with(requester.clone(), &[coordinator.clone()]);
        let exec = executor(false);
        let window = later(14);

        let proposed = exec
            .apply(
                &request,
                &coordinator,
                Action::Reschedule,
                &ActionInput::reschedule(window.clone(), "venue busy"),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(proposed.status(), RequestStatus::ReviewRescheduled);
        let proposal = proposed.reschedule_proposal().unwrap();
        assert_eq!(proposal.party, Party::Reviewer);
        assert_eq!(proposal.note, "venue busy");
        assert_eq!(proposed.active_responder(), Some(Party::Requester));

        let confirmed = exec
            .apply(&proposed, &requester, Action::Confirm, &ActionInput::default(), Utc::now())
            .unwrap();
        assert_eq!(confirmed.status(), RequestStatus::Approved);
        assert_eq!(confirmed.schedule(), &window);
        assert!(confirmed.reschedule_proposal().is_none());
        // Requester actions never move the claim
        assert_eq!(confirmed.claimed_by().unwrap().actor, coordinator.user);
    }

    #[test]
    fn test_override_records_actor() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let c1 = snapshot(Authority::COORDINATOR);
        let admin = snapshot(Authority::OPERATIONAL_ADMIN);
        let mut request = request_with(requester, &[c1.clone()]);
        let now = Utc::now();
        request.claimed_by = Some(Claim::new(c1.user, now, Duration::hours(24)));

        let next = executor(false)
            .apply(&request, &admin, Action::Reject, &ActionInput::with_note("no"), now)
            .unwrap();

        assert_eq!(next.status(), RequestStatus::Rejected);
        assert_eq!(next.claimed_by().unwrap().actor, admin.user);
        assert_eq!(next.reviewer().overridden_by, Some(admin.user));
        assert_eq!(next.reviewer().reviewer, Some(admin.user));
    }

    #[test]
    fn test_cancel_clears_proposal() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let coordinator = snapshot(Authority::COORDINATOR);
        let exec = executor(false);
        let request = request_with(requester.clone(), &[coordinator.clone()]);
        let proposed = exec
            .apply(
                &request,
                &coordinator,
                Action::Reschedule,
                &ActionInput::reschedule(later(3), "moved"),
                Utc::now(),
            )
            .unwrap();

        let cancelled = exec
            .apply(&proposed, &requester, Action::Cancel, &ActionInput::default(), Utc::now())
            .unwrap();
        assert_eq!(cancelled.status(), RequestStatus::Cancelled);
        assert!(cancelled.reschedule_proposal().is_none());
        assert_eq!(cancelled.last_action().unwrap().actor, requester.user);
    }

    #[test]
    fn test_edit_keeps_status_and_records_changes() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let request = request_with(requester.clone(), &[]);
        let input = ActionInput::edit(RequestChanges {
            title: Some("  Blood drive  ".to_string()),
            ..Default::default()
        });

        let next = executor(false)
            .apply(&request, &requester, Action::Edit, &input, Utc::now())
            .unwrap();
        assert_eq!(next.status(), RequestStatus::PendingReview);
        assert_eq!(next.title(), "Blood drive");
        assert_eq!(next.status_history().len(), 1);
        assert_eq!(next.decision_history().last().unwrap().kind, DecisionKind::Edit);
        assert!(next.last_action().is_none());
    }

    #[test]
    fn test_delete_is_soft() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let admin = snapshot(Authority::SYSTEM_ADMIN);
        let exec = executor(false);
        let request = request_with(requester.clone(), &[]);
        let cancelled = exec
            .apply(&request, &requester, Action::Cancel, &ActionInput::default(), Utc::now())
            .unwrap();

        let deleted = exec
            .apply(&cancelled, &admin, Action::Delete, &ActionInput::default(), Utc::now())
            .unwrap();
        assert!(deleted.is_deleted());
        assert_eq!(deleted.status(), RequestStatus::Cancelled);
        assert_eq!(deleted.status_history().len(), cancelled.status_history().len());
    }

    #[test]
    fn test_histories_only_grow() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let coordinator = snapshot(Authority::COORDINATOR);
        let exec = executor(false);
        let mut request = request_with(requester.clone(), &[coordinator.clone()]);

        let steps = [
            (&coordinator, Action::Reschedule),
            (&requester, Action::Reschedule),
            (&coordinator, Action::Reschedule),
            (&requester, Action::Confirm),
        ];
        for (who, action) in steps {
            let input = ActionInput::reschedule(later(5), "how about this");
            let next = exec.apply(&request, who, action, &input, Utc::now()).unwrap();
            assert!(next.status_history().starts_with(request.status_history()));
            assert!(next.decision_history().starts_with(request.decision_history()));
            request = next;
        }
        assert_eq!(request.status(), RequestStatus::Approved);
    }

    #[test]
    fn test_expire_and_complete() {
        let requester = snapshot(Authority::STAKEHOLDER);
        let coordinator = snapshot(Authority::COORDINATOR);
        let exec = executor(false);
        let request = request_with(requester, &[coordinator.clone()]);

        assert!(exec.expire(&request, Utc::now()).is_err());

        let proposed = exec
            .apply(
                &request,
                &coordinator,
                Action::Reschedule,
                &ActionInput::reschedule(later(3), "moved"),
                Utc::now(),
            )
            .unwrap();
        let expired = exec.expire(&proposed, Utc::now()).unwrap();
        assert_eq!(expired.status(), RequestStatus::ExpiredReview);
        assert_eq!(expired.status_history().last().unwrap().actor, ActorSnapshot::system());

        let approved = exec
            .apply(&request, &coordinator, Action::Accept, &ActionInput::default(), Utc::now())
            .unwrap();
        let completed = exec.complete(&approved, Utc::now()).unwrap();
        assert_eq!(completed.status(), RequestStatus::Completed);
        assert_eq!(
            completed.decision_history().last().unwrap().kind,
            DecisionKind::Complete
        );
    }

    #[test]
    fn test_input_preconditions() {
        let now = Utc::now();

        let err = ActionInput::default().check(Action::Reschedule, now).unwrap_err();
        assert!(matches!(err, AppError::Input(_)));

        let past = ScheduleWindow::new(now - Duration::hours(1), None);
        assert!(ActionInput::reschedule(past, "late").check(Action::Reschedule, now).is_err());

        let blank = ActionInput::reschedule(later(2), "   ");
        assert!(blank.check(Action::Reschedule, now).is_err());

        assert!(ActionInput::reschedule(later(2), "ok").check(Action::Reschedule, now).is_ok());

        assert!(ActionInput::default().check(Action::Edit, now).is_err());
        assert!(ActionInput::edit(RequestChanges::default()).check(Action::Edit, now).is_err());

        // Other actions carry no required fields
        assert!(ActionInput::default().check(Action::Accept, now).is_ok());
    }
}
