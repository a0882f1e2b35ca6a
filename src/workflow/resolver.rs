//! Coordinator resolver
//!
//! Computes who may review a request (coverage + affiliation, or escalation
//! above a reviewer-tier requester) and decides whether an actor may write
//! to a request given its claim.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::authority::Authority;
use super::request::{
    ActorSnapshot, AssignmentRule, EligibleReviewer, LocationContext, Request, ReviewerAssignment,
};
use super::validator::Verdict;
use crate::config::{EngineConfig, ReviewerPriority, RoutingPolicy};
use crate::directory::{CoverageSource, ReviewerDirectory, ReviewerProfile};
use crate::error::{AppError, Result};
use crate::ids::UserId;

/// Eligible set and primary assignment for a new request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub eligible: Vec<EligibleReviewer>,
    pub assignment: ReviewerAssignment,
}

pub struct CoordinatorResolver {
    reviewer_tier: Authority,
    routing: RoutingPolicy,
    directory: Arc<dyn ReviewerDirectory>,
    coverage: Arc<dyn CoverageSource>,
}

impl CoordinatorResolver {
    pub fn new(
        config: &EngineConfig,
        directory: Arc<dyn ReviewerDirectory>,
        coverage: Arc<dyn CoverageSource>,
    ) -> Self {
        Self {
            reviewer_tier: config.reviewer_tier,
            routing: config.routing.clone(),
            directory,
            coverage,
        }
    }

    /// Compute the eligible reviewer set and the primary assignment.
    ///
    /// `assign_to` names an explicit reviewer; it goes first in the set and
    /// its rule is derived from how its authority compares to the requester's.
    pub async fn resolve(
        &self,
        requester: &ActorSnapshot,
        context: &LocationContext,
        request_type: &str,
        assign_to: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let escalate = requester.authority >= self.reviewer_tier;
        let candidates = self
            .directory
            .active_reviewers(self.reviewer_tier, now)
            .await?;

        let mut eligible = Vec::new();
        for profile in candidates {
            if profile.user == requester.user {
                continue;
            }
            let qualifies = if escalate {
                profile.authority > requester.authority
                    && (profile.authority.is_ceiling()
                        || self.in_jurisdiction(&profile, context).await?)
            } else {
                self.in_jurisdiction(&profile, context).await?
            };
            if qualifies {
                eligible.push(profile);
            }
        }

        rank(&mut eligible, self.routing.priority_for(request_type));

        let assignment = match assign_to {
            Some(assignee) => {
                let profile = self.explicit_assignee(requester, assignee, now).await?;
                let rule = if profile.authority < requester.authority {
                    AssignmentRule::DelegatedToLowerTier
                } else if escalate && profile.authority > requester.authority {
                    AssignmentRule::EscalatedToHigherTier
                } else {
                    AssignmentRule::Manual
                };
                eligible.retain(|p| p.user != assignee);
                eligible.insert(0, profile);
                ReviewerAssignment {
                    reviewer: Some(assignee),
                    rule,
                    auto_assigned: false,
                    overridden_by: None,
                    overridden_at: None,
                }
            }
            None => ReviewerAssignment {
                reviewer: eligible.first().map(|p| p.user),
                rule: if escalate {
                    AssignmentRule::EscalatedToHigherTier
                } else {
                    AssignmentRule::CoverageMatch
                },
                auto_assigned: true,
                overridden_by: None,
                overridden_at: None,
            },
        };

        if eligible.is_empty() {
            tracing::warn!(
                location = %context.location,
                org = %context.org,
                "No eligible reviewers; only override authority can act"
            );
        }

        Ok(Resolution {
            eligible: eligible
                .into_iter()
                .map(|p| EligibleReviewer {
                    user: p.user,
                    authority: p.authority,
                    discovered_at: now,
                })
                .collect(),
            assignment,
        })
    }

    /// Whether `actor` may write to `request` given its claim state
    pub fn write_eligibility(
        &self,
        actor: &ActorSnapshot,
        request: &Request,
        now: DateTime<Utc>,
    ) -> Verdict {
        if actor.authority.is_ceiling() {
            return Verdict::allow("ceiling authority");
        }

        let floor = request.claim_override_floor(self.reviewer_tier);
        match request.active_claim(now) {
            Some(claim) if claim.actor == actor.user => Verdict::allow("claim holder"),
            Some(claim) => {
                if actor.authority > floor {
                    Verdict::allow(format!(
                        "authority {} overrides claim held by {}",
                        actor.authority, claim.actor
                    ))
                } else {
                    Verdict::deny(format!("already claimed by {}", claim.actor))
                }
            }
            None => {
                if request.is_eligible(actor.user) || request.reviewer.reviewer == Some(actor.user)
                {
                    Verdict::allow("eligible reviewer")
                } else if actor.authority > floor {
                    Verdict::allow(format!(
                        "authority {} exceeds eligible reviewers",
                        actor.authority
                    ))
                } else {
                    Verdict::deny("not an eligible reviewer for this request")
                }
            }
        }
    }

    /// Read access that does not depend on capabilities
    pub fn has_standing(&self, actor: &ActorSnapshot, request: &Request) -> bool {
        actor.authority.is_ceiling()
            || request.is_requester(actor.user)
            || request.is_eligible(actor.user)
            || request.reviewer.reviewer == Some(actor.user)
            || request.claimed_by.as_ref().map(|c| c.actor) == Some(actor.user)
    }

    async fn in_jurisdiction(
        &self,
        profile: &ReviewerProfile,
        context: &LocationContext,
    ) -> Result<bool> {
        if !profile.has_org(&context.org) {
            return Ok(false);
        }
        for grant in &profile.coverage {
            if self
                .coverage
                .is_location_covered(&context.location, grant)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn explicit_assignee(
        &self,
        requester: &ActorSnapshot,
        assignee: UserId,
        now: DateTime<Utc>,
    ) -> Result<ReviewerProfile> {
        if assignee == requester.user {
            return Err(AppError::Input(
                "A request cannot be assigned to its own requester".to_string(),
            ));
        }
        let profile = self
            .directory
            .reviewer(assignee, now)
            .await?
            .ok_or_else(|| AppError::Input(format!("Assignee {} is not an active user", assignee)))?;
        if profile.authority < self.reviewer_tier {
            return Err(AppError::Input(format!(
                "Assignee {} is below the reviewer tier",
                assignee
            )));
        }
        Ok(profile)
    }
}

fn rank(profiles: &mut [ReviewerProfile], priority: ReviewerPriority) {
    match priority {
        // sort_by_key is stable, so equal authorities keep directory order
        ReviewerPriority::LowestAuthorityFirst => profiles.sort_by_key(|p| p.authority),
        ReviewerPriority::HighestAuthorityFirst => {
            profiles.sort_by_key(|p| std::cmp::Reverse(p.authority))
        }
        ReviewerPriority::DirectoryOrder => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::DirectoryUser;
    use crate::directory::InMemoryDirectory;
    use crate::ids::{LocationId, OrgTag};
    use crate::workflow::request::fixtures::{request_with, snapshot};
    use crate::workflow::request::Claim;
    use chrono::Duration;

    fn loc(code: &str) -> LocationId {
        LocationId::parse(code).unwrap()
    }

    fn org(tag: &str) -> OrgTag {
        OrgTag::parse(tag).unwrap()
    }

    fn context() -> LocationContext {
        LocationContext {
            location: loc("MUN-01"),
            org: org("A"),
        }
    }

    async fn setup() -> (Arc<InMemoryDirectory>, CoordinatorResolver) {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_parent(loc("MUN-01"), loc("DIST-1")).await;
        let resolver = CoordinatorResolver::new(
            &EngineConfig::default(),
            directory.clone(),
            directory.clone(),
        );
        (directory, resolver)
    }

    async fn coordinator(directory: &InMemoryDirectory, area: &str, tag: &str) -> UserId {
        directory
            .register(
                DirectoryUser::new("coordinator")
                    .with_role("coordinator", Authority::COORDINATOR)
                    .covering(loc(area))
                    .in_org(org(tag)),
            )
            .await
    }

    #[tokio::test]
    async fn test_coverage_and_org_must_both_match() {
        let (directory, resolver) = setup().await;
        let direct = coordinator(&directory, "MUN-01", "A").await;
        let district = coordinator(&directory, "DIST-1", "a").await;
        let _wrong_org = coordinator(&directory, "MUN-01", "B").await;
        let _elsewhere = coordinator(&directory, "MUN-09", "A").await;

        let requester = snapshot(Authority::STAKEHOLDER);
        let resolution = resolver
            .resolve(&requester, &context(), "event", None, Utc::now())
            .await
            .unwrap();

        let users: Vec<UserId> = resolution.eligible.iter().map(|e| e.user).collect();
        assert_eq!(users.len(), 2);
        assert!(users.contains(&direct));
        assert!(users.contains(&district));
        assert_eq!(resolution.assignment.rule, AssignmentRule::CoverageMatch);
        assert!(resolution.assignment.auto_assigned);
        assert!(resolution.assignment.reviewer.is_some());
    }

    #[tokio::test]
    async fn test_stakeholders_are_never_eligible() {
        let (directory, resolver) = setup().await;
        directory
            .register(
                DirectoryUser::new("stakeholder")
                    .with_role("stakeholder", Authority::STAKEHOLDER)
                    .covering(loc("MUN-01"))
                    .in_org(org("A")),
            )
            .await;

        let resolution = resolver
            .resolve(&snapshot(Authority::STAKEHOLDER), &context(), "event", None, Utc::now())
            .await
            .unwrap();
        assert!(resolution.eligible.is_empty());
        assert!(resolution.assignment.reviewer.is_none());
    }

    #[tokio::test]
    async fn test_reviewer_tier_requester_escalates() {
        let (directory, resolver) = setup().await;
        let requester_id = coordinator(&directory, "MUN-01", "A").await;
        let _peer = coordinator(&directory, "MUN-01", "A").await;
        let sysadmin = directory
            .register(DirectoryUser::new("root").with_role("sysadmin", Authority::SYSTEM_ADMIN))
            .await;

        let requester = ActorSnapshot::new(requester_id, "coordinator", Authority::COORDINATOR);
        let resolution = resolver
            .resolve(&requester, &context(), "event", None, Utc::now())
            .await
            .unwrap();

        assert_eq!(resolution.eligible.len(), 1);
        assert_eq!(resolution.eligible[0].user, sysadmin);
        assert_eq!(resolution.assignment.rule, AssignmentRule::EscalatedToHigherTier);
    }

    #[tokio::test]
    async fn test_explicit_lower_tier_assignment_is_delegation() {
        let (directory, resolver) = setup().await;
        let assignee = coordinator(&directory, "MUN-09", "B").await;

        let requester = snapshot(Authority::OPERATIONAL_ADMIN);
        let resolution = resolver
            .resolve(&requester, &context(), "event", Some(assignee), Utc::now())
            .await
            .unwrap();

        assert_eq!(resolution.eligible[0].user, assignee);
        assert_eq!(resolution.assignment.reviewer, Some(assignee));
        assert_eq!(resolution.assignment.rule, AssignmentRule::DelegatedToLowerTier);
        assert!(!resolution.assignment.auto_assigned);
    }

    #[tokio::test]
    async fn test_explicit_assignee_must_be_reviewer_tier() {
        let (directory, resolver) = setup().await;
        let low = directory
            .register(DirectoryUser::new("sam").with_role("stakeholder", Authority::STAKEHOLDER))
            .await;

        let err = resolver
            .resolve(&snapshot(Authority::STAKEHOLDER), &context(), "event", Some(low), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Input(_)));

        let err = resolver
            .resolve(
                &snapshot(Authority::STAKEHOLDER),
                &context(),
                "event",
                Some(UserId::new()),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Input(_)));
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let directory = Arc::new(InMemoryDirectory::new());
        let mut config = EngineConfig::default();
        config.routing.default_priority = ReviewerPriority::HighestAuthorityFirst;
        let resolver = CoordinatorResolver::new(&config, directory.clone(), directory.clone());

        let _low = coordinator(&directory, "MUN-01", "A").await;
        let high = directory
            .register(
                DirectoryUser::new("senior")
                    .with_role("senior-coordinator", Authority::new(70))
                    .covering(loc("MUN-01"))
                    .in_org(org("A")),
            )
            .await;

        let resolution = resolver
            .resolve(&snapshot(Authority::STAKEHOLDER), &context(), "event", None, Utc::now())
            .await
            .unwrap();
        assert_eq!(resolution.assignment.reviewer, Some(high));
    }

    #[tokio::test]
    async fn test_write_eligibility_respects_claim() {
        let (_directory, resolver) = setup().await;
        let requester = snapshot(Authority::STAKEHOLDER);
        let c1 = snapshot(Authority::COORDINATOR);
        let c2 = snapshot(Authority::COORDINATOR);
        let admin = snapshot(Authority::OPERATIONAL_ADMIN);
        let outsider = snapshot(Authority::COORDINATOR);
        let now = Utc::now();

        let mut request = request_with(requester, &[c1.clone(), c2.clone()]);
        assert!(resolver.write_eligibility(&c2, &request, now).allowed);
        assert!(!resolver.write_eligibility(&outsider, &request, now).allowed);

        request.claimed_by = Some(Claim::new(c1.user, now, Duration::hours(24)));
        assert!(resolver.write_eligibility(&c1, &request, now).allowed);

        let verdict = resolver.write_eligibility(&c2, &request, now);
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("already claimed"));

        assert!(resolver.write_eligibility(&admin, &request, now).allowed);

        // Claim lapses after its TTL
        let later = now + Duration::hours(25);
        assert!(resolver.write_eligibility(&c2, &request, later).allowed);
    }
}
