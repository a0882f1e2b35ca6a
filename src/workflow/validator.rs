//! Action validator
//!
//! Decides, for one (actor, action, request), whether the action is permitted.
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. State legality and vocabulary
//! 2. Self-review guard and requester-only cancel
//! 3. Active responder, claim and jurisdiction
//! 4. Capability
//! 5. Authority hierarchy
//! 6. Action-specific refinements
//!
//! Expected denials come back as a `Verdict`; only collaborator failures are
//! errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::authority::Authority;
use super::request::{ActorSnapshot, Request};
use super::resolver::CoordinatorResolver;
use super::state::{self, Action, Party, RequestStatus};
use crate::config::EngineConfig;
use crate::directory::{PermissionSource, Resource, Verb};
use crate::error::Result;

/// Outcome of validation, with a reason for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Early return on a denied verdict
macro_rules! check {
    ($verdict:expr) => {
        if let Some(denied) = $verdict {
            return Ok(denied);
        }
    };
}

pub struct ActionValidator {
    reviewer_tier: Authority,
    require_confirmation: bool,
    permissions: Arc<dyn PermissionSource>,
    resolver: Arc<CoordinatorResolver>,
}

impl ActionValidator {
    pub fn new(
        config: &EngineConfig,
        permissions: Arc<dyn PermissionSource>,
        resolver: Arc<CoordinatorResolver>,
    ) -> Self {
        Self {
            reviewer_tier: config.reviewer_tier,
            require_confirmation: config.require_confirmation,
            permissions,
            resolver,
        }
    }

    /// Decide whether `actor` may perform `action` on `request` at `now`
    pub async fn validate(
        &self,
        actor: &ActorSnapshot,
        action: Action,
        request: &Request,
        now: DateTime<Utc>,
    ) -> Result<Verdict> {
        if request.is_deleted() {
            return Ok(Verdict::deny("request has been deleted"));
        }
        if action == Action::View {
            return self.validate_view(actor, request).await;
        }

        check!(self.state_legality(actor, action, request, now));
        check!(self.self_review(actor, action, request));
        check!(self.turn_and_claim(actor, action, request, now));
        check!(self.capability(actor, action, request).await?);
        check!(self.hierarchy(actor, action, request));
        check!(self.refinements(actor, action, request).await?);

        Ok(Verdict::allow(format!(
            "{} permitted from {}",
            action, request.status
        )))
    }

    async fn validate_view(&self, actor: &ActorSnapshot, request: &Request) -> Result<Verdict> {
        if self.resolver.has_standing(actor, request) {
            return Ok(Verdict::allow("participant in request"));
        }
        if self
            .has_scoped_capability(actor, Resource::Request, Verb::Read, request)
            .await?
        {
            return Ok(Verdict::allow("holds request.read"));
        }
        Ok(Verdict::deny("no read access to this request"))
    }

    /// Step 1
    fn state_legality(
        &self,
        actor: &ActorSnapshot,
        action: Action,
        request: &Request,
        now: DateTime<Utc>,
    ) -> Option<Verdict> {
        let status = request.status;

        if action == Action::Delete {
            return (!status.is_terminal()).then(|| {
                Verdict::deny(format!(
                    "delete is only allowed once the request is closed; request is {}",
                    status
                ))
            });
        }

        if status.is_terminal() {
            return Some(match request.active_claim(now) {
                Some(claim) if claim.actor != actor.user => Verdict::deny(format!(
                    "already claimed by {}; request is {}",
                    claim.actor, status
                )),
                _ => Verdict::deny(format!(
                    "request is {}; no further actions permitted",
                    status
                )),
            });
        }

        if action == Action::Edit {
            return (!status.is_editable())
                .then(|| Verdict::deny(format!("request cannot be edited while {}", status)));
        }

        if let Some(edge) = action.edge() {
            if state::next_status(status, edge, self.require_confirmation).is_none() {
                return Some(Verdict::deny(format!("{} is not legal from {}", action, status)));
            }
        }

        if !action.fits_vocabulary(actor.authority, self.reviewer_tier) {
            let alias = action.alias().map_or("another action", |a| a.as_str());
            return Some(Verdict::deny(format!(
                "{} is not in this actor's vocabulary; use {}",
                action, alias
            )));
        }

        None
    }

    /// Step 2
    fn self_review(&self, actor: &ActorSnapshot, action: Action, request: &Request) -> Option<Verdict> {
        let is_requester = request.is_requester(actor.user);

        if action == Action::Cancel && !is_requester {
            return Some(Verdict::deny("only the requester may cancel"));
        }

        if is_requester
            && action.is_turn_action()
            && request.active_responder() != Some(Party::Requester)
        {
            return Some(Verdict::deny("requester cannot review their own request"));
        }

        None
    }

    /// Step 3
    fn turn_and_claim(
        &self,
        actor: &ActorSnapshot,
        action: Action,
        request: &Request,
        now: DateTime<Utc>,
    ) -> Option<Verdict> {
        let party = request.party_of(actor.user);
        let responder = request.active_responder();

        // The proposing party may only view, so nobody answers their own proposal
        if request.status == RequestStatus::ReviewRescheduled && responder != Some(party) {
            return Some(Verdict::deny(format!(
                "waiting on the {} to answer the reschedule proposal",
                party.other().as_str()
            )));
        }

        if action.is_turn_action() {
            match responder {
                Some(p) if p == party => {}
                Some(p) => {
                    return Some(Verdict::deny(format!("waiting on the {}", p.as_str())));
                }
                None => return Some(Verdict::deny("no party may respond now")),
            }
        }

        if party == Party::Reviewer && (action.is_turn_action() || action == Action::Edit) {
            let verdict = self.resolver.write_eligibility(actor, request, now);
            if !verdict.allowed {
                return Some(verdict);
            }
        }

        None
    }

    /// Step 4
    async fn capability(
        &self,
        actor: &ActorSnapshot,
        action: Action,
        request: &Request,
    ) -> Result<Option<Verdict>> {
        let verbs: &[Verb] = match action {
            Action::Accept => &[Verb::Review],
            // Actors holding only the weaker verb may still reject
            Action::Reject => &[Verb::Review, Verb::Decline],
            Action::Confirm => &[Verb::Confirm],
            Action::Decline => &[Verb::Decline],
            Action::Reschedule => &[Verb::Reschedule],
            Action::Cancel => &[Verb::Cancel],
            Action::Edit => &[Verb::Update],
            Action::Delete => &[Verb::Delete],
            Action::View => &[Verb::Read],
        };

        for verb in verbs {
            if self
                .has_scoped_capability(actor, Resource::Request, *verb, request)
                .await?
            {
                return Ok(None);
            }
        }

        Ok(Some(Verdict::deny(format!(
            "missing capability request.{}",
            verbs[0].as_str()
        ))))
    }

    /// Step 5
    fn hierarchy(&self, actor: &ActorSnapshot, action: Action, request: &Request) -> Option<Verdict> {
        if request.is_requester(actor.user) || actor.authority.is_ceiling() {
            return None;
        }
        if request.reviewer.overrides_hierarchy_for(actor.user) {
            return None;
        }
        if actor.authority < request.requester.authority {
            return Some(Verdict::deny(format!(
                "authority {} is below the requester's {} for {}",
                actor.authority, request.requester.authority, action
            )));
        }
        None
    }

    /// Step 6
    async fn refinements(
        &self,
        actor: &ActorSnapshot,
        action: Action,
        request: &Request,
    ) -> Result<Option<Verdict>> {
        match action {
            Action::Confirm if request.touched_refusal() => Ok(Some(Verdict::deny(
                "cannot confirm a request that was rejected or cancelled",
            ))),
            Action::Edit if request.status == RequestStatus::ReviewAccepted => {
                if self
                    .has_scoped_capability(actor, Resource::Event, Verb::Update, request)
                    .await?
                {
                    Ok(None)
                } else {
                    Ok(Some(Verdict::deny(
                        "editing an accepted request requires event.update",
                    )))
                }
            }
            _ => Ok(None),
        }
    }

    /// Grant at the request's location, else a system-wide grant
    async fn has_scoped_capability(
        &self,
        actor: &ActorSnapshot,
        resource: Resource,
        verb: Verb,
        request: &Request,
    ) -> Result<bool> {
        let location = &request.context.location;
        if self
            .permissions
            .has_capability(actor.user, resource, verb, Some(location))
            .await?
        {
            return Ok(true);
        }
        self.permissions
            .has_capability(actor.user, resource, verb, None)
            .await
    }
}
