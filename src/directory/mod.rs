//! Collaborator contracts the engine reads from
//!
//! Identity, permissions, geographic coverage and the reviewer roster all
//! live outside the engine. These traits are the seams; `memory` provides an
//! in-process implementation of all of them.

pub mod capability;
pub mod memory;

pub use capability::{Permission, PermissionGrant, PermissionSet, Resource, Verb};
pub use memory::InMemoryDirectory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::{LocationId, OrgTag, UserId};
use crate::workflow::authority::{effective_authority, Authority, EffectiveAuthority, RoleGrant};
use crate::workflow::request::ActorSnapshot;

/// Source of role grants and the authority derived from them
#[async_trait]
pub trait AuthoritySource: Send + Sync {
    /// Role grants currently assigned to `user`, live or not
    async fn active_role_grants(&self, user: UserId) -> Result<Vec<RoleGrant>>;

    /// Effective authority recomputed from live grants
    async fn authority(&self, user: UserId, now: DateTime<Utc>) -> Result<EffectiveAuthority> {
        let grants = self.active_role_grants(user).await?;
        Ok(effective_authority(&grants, now))
    }

    /// Snapshot of `user` as of `now`
    async fn snapshot(&self, user: UserId, now: DateTime<Utc>) -> Result<ActorSnapshot> {
        let effective = self.authority(user, now).await?;
        Ok(ActorSnapshot::new(user, effective.role, effective.authority))
    }
}

/// Source of capability grants
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Whether `user` holds `verb` on `resource` at exactly `scope`
    /// (`None` asks for a system-wide grant)
    async fn has_capability(
        &self,
        user: UserId,
        resource: Resource,
        verb: Verb,
        scope: Option<&LocationId>,
    ) -> Result<bool>;
}

/// A coverage area granted to a reviewer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoverageGrant {
    /// District or municipality the grant is rooted at
    pub area: LocationId,
}

impl CoverageGrant {
    pub fn new(area: LocationId) -> Self {
        Self { area }
    }
}

/// Hierarchy-aware coverage oracle
#[async_trait]
pub trait CoverageSource: Send + Sync {
    async fn is_location_covered(&self, location: &LocationId, grant: &CoverageGrant)
        -> Result<bool>;
}

/// A user who may review requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerProfile {
    pub user: UserId,
    pub role: String,
    pub authority: Authority,
    pub coverage: Vec<CoverageGrant>,
    pub orgs: Vec<OrgTag>,
}

impl ReviewerProfile {
    pub fn has_org(&self, org: &OrgTag) -> bool {
        self.orgs.iter().any(|o| o == org)
    }
}

/// Roster of active users, with live authority
#[async_trait]
pub trait ReviewerDirectory: Send + Sync {
    /// Active users whose live authority is at least `min_authority`
    async fn active_reviewers(
        &self,
        min_authority: Authority,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewerProfile>>;

    /// Profile of one active user, if any
    async fn reviewer(&self, user: UserId, now: DateTime<Utc>) -> Result<Option<ReviewerProfile>>;
}
