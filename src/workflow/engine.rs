//! Review engine
//!
//! Entry points for submitting requests, acting on them, listing what an
//! actor may do, and sweeping time-driven transitions.
//!
//! Every write follows the same discipline: read a versioned request,
//! validate, apply to a copy, then commit with a conditional update guarded
//! by the version and status that were read. A lost race re-reads and
//! re-validates instead of replaying the write.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::executor::{ActionInput, TransitionExecutor};
use super::hooks::{
    BroadcastNotifier, DerivedItemRef, NoopPublisher, NotifyHook, PublishHook, SideEffectFailure,
    WorkflowEvent,
};
use super::request::{ActorSnapshot, LocationContext, NewRequest, Request, ScheduleWindow};
use super::resolver::CoordinatorResolver;
use super::state::{Action, RequestStatus};
use super::validator::ActionValidator;
use crate::config::EngineConfig;
use crate::directory::{
    AuthoritySource, CoverageSource, InMemoryDirectory, PermissionSource, ReviewerDirectory,
};
use crate::error::{AppError, Result};
use crate::ids::{LocationId, OrgTag, RequestId, UserId};
use crate::store::{RequestStore, Versioned};

/// External services the engine reads from and notifies
#[derive(Clone)]
pub struct Collaborators {
    pub authority: Arc<dyn AuthoritySource>,
    pub permissions: Arc<dyn PermissionSource>,
    pub coverage: Arc<dyn CoverageSource>,
    pub directory: Arc<dyn ReviewerDirectory>,
    pub publisher: Arc<dyn PublishHook>,
    pub notifier: Arc<dyn NotifyHook>,
}

impl Collaborators {
    /// All lookups served by one in-memory directory, no-op publishing and a
    /// broadcast notifier
    pub fn in_memory(directory: Arc<InMemoryDirectory>) -> Self {
        Self {
            authority: directory.clone(),
            permissions: directory.clone(),
            coverage: directory.clone(),
            directory,
            publisher: Arc::new(NoopPublisher),
            notifier: Arc::new(BroadcastNotifier::default()),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn PublishHook>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotifyHook>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Payload of a new request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub request_type: String,
    pub title: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub schedule: ScheduleWindow,
    pub location: LocationId,
    pub org: OrgTag,
    /// Explicit reviewer, bypassing automatic routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<UserId>,
}

impl Submission {
    fn check(&self, now: DateTime<Utc>) -> Result<()> {
        if self.request_type.trim().is_empty() {
            return Err(AppError::Input("request type is required".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Input("title is required".to_string()));
        }
        if !self.schedule.is_well_formed() {
            return Err(AppError::Input("schedule ends before it starts".to_string()));
        }
        if self.schedule.start <= now {
            return Err(AppError::Input("schedule must start in the future".to_string()));
        }
        Ok(())
    }
}

/// Result of `act`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActOutcome {
    /// The request after the action, or as read when denied
    pub request: Request,
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_item: Option<DerivedItemRef>,
    /// Side effects that failed after the transition committed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<SideEffectFailure>,
}

impl ActOutcome {
    fn denied(request: Request, reason: String) -> Self {
        Self {
            request,
            allowed: false,
            reason,
            derived_item: None,
            degraded: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

/// What a sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: Vec<RequestId>,
    pub completed: Vec<RequestId>,
    /// Rows a concurrent writer changed first
    pub skipped: Vec<RequestId>,
}

pub struct ReviewEngine {
    config: EngineConfig,
    store: Arc<dyn RequestStore>,
    authority: Arc<dyn AuthoritySource>,
    resolver: Arc<CoordinatorResolver>,
    validator: ActionValidator,
    executor: TransitionExecutor,
    publisher: Arc<dyn PublishHook>,
    notifier: Arc<dyn NotifyHook>,
}

impl ReviewEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RequestStore>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;

        let resolver = Arc::new(CoordinatorResolver::new(
            &config,
            collaborators.directory,
            collaborators.coverage,
        ));
        let validator = ActionValidator::new(&config, collaborators.permissions, resolver.clone());
        let executor = TransitionExecutor::new(&config)?;

        Ok(Self {
            config,
            store,
            authority: collaborators.authority,
            resolver,
            validator,
            executor,
            publisher: collaborators.publisher,
            notifier: collaborators.notifier,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a new request on behalf of `requester`
    pub async fn submit(&self, requester: UserId, submission: Submission) -> Result<Request> {
        let now = Utc::now();
        submission.check(now)?;

        let snapshot = self.authority.snapshot(requester, now).await?;
        let context = LocationContext {
            location: submission.location,
            org: submission.org,
        };
        let resolution = self
            .resolver
            .resolve(
                &snapshot,
                &context,
                &submission.request_type,
                submission.assign_to,
                now,
            )
            .await?;

        let request = Request::new(
            NewRequest {
                request_type: submission.request_type.trim().to_string(),
                title: submission.title.trim().to_string(),
                details: submission.details,
                schedule: submission.schedule,
                context,
                requester: snapshot,
                reviewer: resolution.assignment,
                eligible_reviewers: resolution.eligible,
            },
            now,
        );
        self.store.insert(&request).await?;

        tracing::info!(
            request_id = %request.id(),
            requester = %requester,
            eligible = request.eligible_reviewers().len(),
            rule = request.reviewer().rule.as_str(),
            "Request submitted"
        );

        let event = WorkflowEvent::Submitted {
            request_id: request.id(),
            requester,
            eligible: request.eligible_reviewers().iter().map(|r| r.user).collect(),
        };
        if let Err(e) = self.notifier.on_transition(&event).await {
            tracing::warn!(request_id = %request.id(), error = %e, "Submit notification failed");
        }

        Ok(request)
    }

    /// Attempt `action` on a request as `actor`
    pub async fn act(
        &self,
        actor: UserId,
        request_id: RequestId,
        action: Action,
        input: ActionInput,
    ) -> Result<ActOutcome> {
        self.act_at(actor, request_id, action, input, Utc::now())
            .await
    }

    /// `act` evaluated at an explicit instant
    pub async fn act_at(
        &self,
        actor_id: UserId,
        request_id: RequestId,
        action: Action,
        input: ActionInput,
        now: DateTime<Utc>,
    ) -> Result<ActOutcome> {
        input.check(action, now)?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let current = self.load(request_id).await?;
            // Live authority, so revocations apply immediately
            let actor = self.authority.snapshot(actor_id, now).await?;

            let verdict = self
                .validator
                .validate(&actor, action, &current.value, now)
                .await?;
            if !verdict.allowed {
                tracing::debug!(
                    request_id = %request_id,
                    actor = %actor_id,
                    action = %action,
                    reason = %verdict.reason,
                    "Action denied"
                );
                return Ok(ActOutcome::denied(current.value, verdict.reason));
            }

            if !action.is_mutating() {
                return Ok(ActOutcome {
                    request: current.value,
                    allowed: true,
                    reason: verdict.reason,
                    derived_item: None,
                    degraded: Vec::new(),
                });
            }

            let next = self
                .executor
                .apply(&current.value, &actor, action, &input, now)?;

            match self
                .store
                .compare_and_swap(request_id, current.version, current.value.status(), &next)
                .await
            {
                Ok(version) => {
                    tracing::info!(
                        request_id = %request_id,
                        actor = %actor_id,
                        action = %action,
                        from = %current.value.status(),
                        to = %next.status(),
                        version,
                        "Transition committed"
                    );
                    let (derived_item, degraded) =
                        self.run_hooks(&current.value, &next, &actor, action).await;
                    return Ok(ActOutcome {
                        request: next,
                        allowed: true,
                        reason: verdict.reason,
                        derived_item,
                        degraded,
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_conflict_retries => {
                    tracing::debug!(
                        request_id = %request_id,
                        actor = %actor_id,
                        attempt,
                        "Conditional write lost, re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Every action `actor` could perform right now; mirrors `act`
    pub async fn available_actions(
        &self,
        actor: UserId,
        request_id: RequestId,
    ) -> Result<Vec<Action>> {
        self.available_actions_at(actor, request_id, Utc::now())
            .await
    }

    pub async fn available_actions_at(
        &self,
        actor_id: UserId,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Action>> {
        let current = self.load(request_id).await?;
        let actor = self.authority.snapshot(actor_id, now).await?;

        let verdicts = try_join_all(
            Action::ALL
                .iter()
                .map(|action| self.validator.validate(&actor, *action, &current.value, now)),
        )
        .await?;

        Ok(Action::ALL
            .iter()
            .zip(verdicts)
            .filter(|(_, verdict)| verdict.allowed)
            .map(|(action, _)| *action)
            .collect())
    }

    /// Fetch a request, deleted or not
    pub async fn get(&self, request_id: RequestId) -> Result<Request> {
        Ok(self.load(request_id).await?.value)
    }

    /// Expire stale reschedule proposals and complete approved requests whose
    /// window has ended
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let expiry = self.config.reschedule_expiry()?;

        for stored in self
            .store
            .list_by_status(RequestStatus::ReviewRescheduled)
            .await?
        {
            let stale = stored
                .value
                .reschedule_proposal()
                .map_or(false, |p| now - p.proposed_at >= expiry);
            if !stale || stored.value.is_deleted() {
                continue;
            }
            let next = self.executor.expire(&stored.value, now)?;
            let id = stored.value.id();
            if self.commit_system(&stored, &next, &mut report.skipped).await? {
                report.expired.push(id);
                self.notify_quietly(&WorkflowEvent::Expired { request_id: id })
                    .await;
            }
        }

        for stored in self.store.list_by_status(RequestStatus::Approved).await? {
            if stored.value.schedule().ends_at() >= now || stored.value.is_deleted() {
                continue;
            }
            let next = self.executor.complete(&stored.value, now)?;
            let id = stored.value.id();
            if self.commit_system(&stored, &next, &mut report.skipped).await? {
                report.completed.push(id);
                self.notify_quietly(&WorkflowEvent::Completed { request_id: id })
                    .await;
            }
        }

        tracing::info!(
            expired = report.expired.len(),
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            "Sweep finished"
        );
        Ok(report)
    }

    async fn load(&self, request_id: RequestId) -> Result<Versioned<Request>> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Request {} not found", request_id)))
    }

    /// Conditional write for a sweep; `false` when a live writer got there first
    async fn commit_system(
        &self,
        stored: &Versioned<Request>,
        next: &Request,
        skipped: &mut Vec<RequestId>,
    ) -> Result<bool> {
        let id = stored.value.id();
        match self
            .store
            .compare_and_swap(id, stored.version, stored.value.status(), next)
            .await
        {
            Ok(_) => {
                tracing::info!(request_id = %id, to = %next.status(), "System transition committed");
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(request_id = %id, "Sweep lost a race, skipping");
                skipped.push(id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_hooks(
        &self,
        before: &Request,
        after: &Request,
        actor: &ActorSnapshot,
        action: Action,
    ) -> (Option<DerivedItemRef>, Vec<SideEffectFailure>) {
        let mut derived_item = None;
        let mut degraded = Vec::new();

        if after.status() == RequestStatus::Approved && before.status() != RequestStatus::Approved {
            match self.publisher.on_approved(after).await {
                Ok(item) => derived_item = Some(item),
                Err(e) => {
                    tracing::warn!(request_id = %after.id(), error = %e, "Publish hook failed");
                    degraded.push(SideEffectFailure::new("publish", e));
                }
            }
        }

        let mut events = vec![WorkflowEvent::Transitioned {
            request_id: after.id(),
            action,
            actor: actor.clone(),
            from: before.status(),
            to: after.status(),
        }];
        if let Some(claim) = after.claimed_by() {
            if before.claimed_by() != Some(claim) {
                events.push(WorkflowEvent::Claimed {
                    request_id: after.id(),
                    actor: claim.actor,
                    expires_at: claim.expires_at,
                });
            }
        }

        for event in &events {
            if let Err(e) = self.notifier.on_transition(event).await {
                tracing::warn!(request_id = %after.id(), error = %e, "Notify hook failed");
                degraded.push(SideEffectFailure::new("notify", e));
            }
        }

        (derived_item, degraded)
    }

    async fn notify_quietly(&self, event: &WorkflowEvent) {
        if let Err(e) = self.notifier.on_transition(event).await {
            tracing::warn!(request_id = %event.request_id(), error = %e, "Notify hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::memory::DirectoryUser;
    use crate::store::InMemoryRequestStore;
    use crate::workflow::authority::Authority;
    use chrono::Duration;

    struct Harness {
        directory: Arc<InMemoryDirectory>,
        store: Arc<InMemoryRequestStore>,
        engine: ReviewEngine,
    }

    async fn harness(config: EngineConfig) -> Harness {
        let directory = Arc::new(InMemoryDirectory::new());
        let store = Arc::new(InMemoryRequestStore::new());
        let engine = ReviewEngine::new(
            config,
            store.clone(),
            Collaborators::in_memory(directory.clone()),
        )
        .unwrap();
        Harness {
            directory,
            store,
            engine,
        }
    }

    fn submission() -> Submission {
        Submission {
            request_type: "event".to_string(),
            title: "Blood drive".to_string(),
            details: serde_json::json!({"expected": 40}),
            schedule: ScheduleWindow::new(Utc::now() + Duration::days(7), None),
            location: LocationId::parse("MUN-01").unwrap(),
            org: OrgTag::parse("A").unwrap(),
            assign_to: None,
        }
    }

    async fn people(h: &Harness) -> (UserId, UserId) {
        let requester = h
            .directory
            .register(DirectoryUser::new("sam").with_role("stakeholder", Authority::STAKEHOLDER))
            .await;
        let coordinator = h
            .directory
            .register(
                DirectoryUser::new("cora")
                    .with_role("coordinator", Authority::COORDINATOR)
                    .covering(LocationId::parse("MUN-01").unwrap())
                    .in_org(OrgTag::parse("A").unwrap()),
            )
            .await;
        (requester, coordinator)
    }

    #[tokio::test]
    async fn test_submit_persists_and_routes() {
        let h = harness(EngineConfig::default()).await;
        let (requester, coordinator) = people(&h).await;

        let request = h.engine.submit(requester, submission()).await.unwrap();
        assert_eq!(request.status(), RequestStatus::PendingReview);
        assert_eq!(request.requester().authority, Authority::STAKEHOLDER);
        assert_eq!(request.reviewer().reviewer, Some(coordinator));
        assert_eq!(h.store.len().await, 1);
        assert_eq!(h.engine.get(request.id()).await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input() {
        let h = harness(EngineConfig::default()).await;
        let (requester, _) = people(&h).await;

        let mut blank = submission();
        blank.title = "  ".to_string();
        let err = h.engine.submit(requester, blank).await.unwrap_err();
        assert!(matches!(err, AppError::Input(_)));

        let mut past = submission();
        past.schedule = ScheduleWindow::new(Utc::now() - Duration::days(1), None);
        assert!(h.engine.submit(requester, past).await.is_err());
        assert_eq!(h.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_act_on_missing_request() {
        let h = harness(EngineConfig::default()).await;
        let (_, coordinator) = people(&h).await;

        let err = h
            .engine
            .act(coordinator, RequestId::new(), Action::Accept, ActionInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_input_errors_precede_authorization() {
        let h = harness(EngineConfig::default()).await;
        let (requester, _) = people(&h).await;
        let request = h.engine.submit(requester, submission()).await.unwrap();

        // An outsider with a malformed payload still gets an input error
        let err = h
            .engine
            .act(UserId::new(), request.id(), Action::Reschedule, ActionInput::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Input(_)));
    }

    #[tokio::test]
    async fn test_view_does_not_write() {
        let h = harness(EngineConfig::default()).await;
        let (requester, _) = people(&h).await;
        let request = h.engine.submit(requester, submission()).await.unwrap();

        let outcome = h
            .engine
            .act(requester, request.id(), Action::View, ActionInput::default())
            .await
            .unwrap();
        assert!(outcome.allowed);
        let stored = h.store.get(request.id()).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_available_actions_for_requester_and_reviewer() {
        let h = harness(EngineConfig::default()).await;
        let (requester, coordinator) = people(&h).await;
        let request = h.engine.submit(requester, submission()).await.unwrap();

        let requester_actions = h
            .engine
            .available_actions(requester, request.id())
            .await
            .unwrap();
        assert_eq!(
            requester_actions,
            vec![Action::View, Action::Cancel, Action::Edit]
        );

        let reviewer_actions = h
            .engine
            .available_actions(coordinator, request.id())
            .await
            .unwrap();
        assert_eq!(
            reviewer_actions,
            vec![
                Action::View,
                Action::Accept,
                Action::Reject,
                Action::Reschedule,
                Action::Edit
            ]
        );
    }

    #[tokio::test]
    async fn test_engine_rejects_invalid_config() {
        let directory = Arc::new(InMemoryDirectory::new());
        let config = EngineConfig {
            max_conflict_retries: 0,
            ..EngineConfig::default()
        };
        let result = ReviewEngine::new(
            config,
            Arc::new(InMemoryRequestStore::new()),
            Collaborators::in_memory(directory),
        );
        assert!(result.is_err());
    }
}
