//! In-memory directory
//!
//! Registers users with role grants, permissions, coverage and affiliations,
//! and a one-level location hierarchy (municipality -> district).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::capability::{PermissionGrant, PermissionSet, Resource, Verb};
use super::{
    AuthoritySource, CoverageGrant, CoverageSource, PermissionSource, ReviewerDirectory,
    ReviewerProfile,
};
use crate::error::{AppError, Result};
use crate::ids::{LocationId, OrgTag, UserId};
use crate::workflow::authority::{effective_authority, Authority, RoleGrant};

/// A user known to the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: UserId,
    pub name: String,
    pub grants: Vec<RoleGrant>,
    pub permissions: PermissionSet,
    pub coverage: Vec<CoverageGrant>,
    pub orgs: Vec<OrgTag>,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

impl DirectoryUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            grants: Vec::new(),
            permissions: PermissionSet::new(),
            coverage: Vec::new(),
            orgs: Vec::new(),
            active: true,
            registered_at: Utc::now(),
        }
    }

    /// Role grant plus the default permission bundle for its tier
    pub fn with_role(mut self, role: impl Into<String>, authority: Authority) -> Self {
        self.grants.push(RoleGrant::new(role, authority));
        let defaults = if authority >= Authority::OPERATIONAL_ADMIN {
            PermissionSet::admin_defaults()
        } else if authority >= Authority::COORDINATOR {
            PermissionSet::coordinator_defaults()
        } else {
            PermissionSet::stakeholder_defaults()
        };
        self.permissions.merge(defaults);
        self
    }

    /// Replace the whole permission set, defaults included
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn covering(mut self, area: LocationId) -> Self {
        self.coverage.push(CoverageGrant::new(area));
        self
    }

    pub fn in_org(mut self, org: OrgTag) -> Self {
        self.orgs.push(org);
        self
    }

    fn profile(&self, now: DateTime<Utc>) -> ReviewerProfile {
        let effective = effective_authority(&self.grants, now);
        ReviewerProfile {
            user: self.id,
            role: effective.role,
            authority: effective.authority,
            coverage: self.coverage.clone(),
            orgs: self.orgs.clone(),
        }
    }
}

/// Directory backed by in-process maps
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, DirectoryUser>>,
    /// child location -> parent location
    parents: RwLock<HashMap<LocationId, LocationId>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            parents: RwLock::new(HashMap::new()),
        }
    }

    /// Register a user, returning their id
    pub async fn register(&self, user: DirectoryUser) -> UserId {
        let id = user.id;
        tracing::debug!(user = %id, name = %user.name, "Registered directory user");
        let mut users = self.users.write().await;
        users.insert(id, user);
        id
    }

    pub async fn get_user(&self, id: UserId) -> Option<DirectoryUser> {
        let users = self.users.read().await;
        users.get(&id).cloned()
    }

    /// Place `child` beneath `parent` in the location hierarchy
    pub async fn set_parent(&self, child: LocationId, parent: LocationId) {
        let mut parents = self.parents.write().await;
        parents.insert(child, parent);
    }

    pub async fn grant_role(&self, user: UserId, grant: RoleGrant) -> Result<()> {
        self.with_user(user, |u| u.grants.push(grant)).await
    }

    /// Deactivate every grant carrying `role`
    pub async fn revoke_role(&self, user: UserId, role: &str) -> Result<()> {
        self.with_user(user, |u| {
            for grant in u.grants.iter_mut().filter(|g| g.role == role) {
                grant.active = false;
            }
        })
        .await
    }

    pub async fn grant_permission(&self, user: UserId, grant: PermissionGrant) -> Result<()> {
        self.with_user(user, |u| u.permissions.add(grant)).await
    }

    pub async fn revoke_permission(&self, user: UserId, grant: &PermissionGrant) -> Result<()> {
        self.with_user(user, |u| u.permissions.remove(grant)).await
    }

    pub async fn set_active(&self, user: UserId, active: bool) -> Result<()> {
        self.with_user(user, |u| u.active = active).await
    }

    async fn with_user(&self, user: UserId, f: impl FnOnce(&mut DirectoryUser)) -> Result<()> {
        let mut users = self.users.write().await;
        let entry = users
            .get_mut(&user)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;
        f(entry);
        Ok(())
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthoritySource for InMemoryDirectory {
    async fn active_role_grants(&self, user: UserId) -> Result<Vec<RoleGrant>> {
        let users = self.users.read().await;
        Ok(users
            .get(&user)
            .filter(|u| u.active)
            .map(|u| u.grants.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PermissionSource for InMemoryDirectory {
    async fn has_capability(
        &self,
        user: UserId,
        resource: Resource,
        verb: Verb,
        scope: Option<&LocationId>,
    ) -> Result<bool> {
        let users = self.users.read().await;
        Ok(users
            .get(&user)
            .filter(|u| u.active)
            .map_or(false, |u| u.permissions.has(resource, verb, scope)))
    }
}

#[async_trait]
impl CoverageSource for InMemoryDirectory {
    async fn is_location_covered(
        &self,
        location: &LocationId,
        grant: &CoverageGrant,
    ) -> Result<bool> {
        if &grant.area == location {
            return Ok(true);
        }
        // One level of indirection: a district grant covers its municipalities
        let parents = self.parents.read().await;
        Ok(parents.get(location) == Some(&grant.area))
    }
}

#[async_trait]
impl ReviewerDirectory for InMemoryDirectory {
    async fn active_reviewers(
        &self,
        min_authority: Authority,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewerProfile>> {
        let users = self.users.read().await;
        let mut profiles: Vec<(DateTime<Utc>, ReviewerProfile)> = users
            .values()
            .filter(|u| u.active)
            .map(|u| (u.registered_at, u.profile(now)))
            .filter(|(_, p)| p.authority >= min_authority)
            .collect();
        // Stable directory order: registration time, then id
        profiles.sort_by_key(|(registered, p)| (*registered, p.user));
        Ok(profiles.into_iter().map(|(_, p)| p).collect())
    }

    async fn reviewer(&self, user: UserId, now: DateTime<Utc>) -> Result<Option<ReviewerProfile>> {
        let users = self.users.read().await;
        Ok(users.get(&user).filter(|u| u.active).map(|u| u.profile(now)))
    }
}
