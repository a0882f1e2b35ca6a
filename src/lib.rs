//! reviewflow - turn-based request review engine
//!
//! Requests are routed to reviewers by coverage and affiliation, negotiated
//! turn by turn, and closed with a full audit trail.

pub mod config;
pub mod directory;
pub mod error;
pub mod ids;
pub mod store;
pub mod workflow;

pub use config::EngineConfig;
pub use error::{AppError, Result};
pub use ids::{LocationId, OrgTag, RequestId, UserId};
pub use workflow::{ActOutcome, Action, ActionInput, RequestStatus, ReviewEngine, Submission};
