//! Request review workflow
//!
//! Authority model, request state machine, action validator, coordinator
//! resolver and transition executor, tied together by `ReviewEngine`.

pub mod authority;
pub mod engine;
pub mod executor;
pub mod hooks;
pub mod request;
pub mod resolver;
pub mod state;
pub mod validator;

pub use authority::{Authority, RoleGrant};
pub use engine::{ActOutcome, Collaborators, ReviewEngine, Submission, SweepReport};
pub use executor::{ActionInput, RequestChanges, TransitionExecutor};
pub use hooks::{
    BroadcastNotifier, DerivedItemRef, NoopPublisher, NotifyHook, PublishHook, SideEffectFailure,
    WorkflowEvent,
};
pub use request::{
    ActorSnapshot, AssignmentRule, Claim, DecisionKind, LocationContext, Request,
    ReviewerAssignment, ScheduleWindow,
};
pub use resolver::{CoordinatorResolver, Resolution};
pub use state::{Action, Party, RequestStatus};
pub use validator::{ActionValidator, Verdict};
