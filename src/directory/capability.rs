//! Permission model
//!
//! A permission is a verb on a resource, optionally scoped to a location.
//! `Verb::Manage` on a resource implies every other verb on it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::ids::LocationId;

/// Things permissions apply to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// The review request itself
    Request,
    /// The work item published from an approved request
    Event,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Request => "request",
            Resource::Event => "event",
        }
    }
}

impl std::str::FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request" => Ok(Resource::Request),
            "event" => Ok(Resource::Event),
            _ => Err(format!("Invalid resource: {}", s)),
        }
    }
}

/// Operations on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Read,
    Create,
    Review,
    Confirm,
    Decline,
    Reschedule,
    Cancel,
    Update,
    Delete,
    /// Implies every other verb on the resource
    Manage,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Read => "read",
            Verb::Create => "create",
            Verb::Review => "review",
            Verb::Confirm => "confirm",
            Verb::Decline => "decline",
            Verb::Reschedule => "reschedule",
            Verb::Cancel => "cancel",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Manage => "manage",
        }
    }
}

impl std::str::FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Verb::Read),
            "create" => Ok(Verb::Create),
            "review" => Ok(Verb::Review),
            "confirm" => Ok(Verb::Confirm),
            "decline" => Ok(Verb::Decline),
            "reschedule" => Ok(Verb::Reschedule),
            "cancel" => Ok(Verb::Cancel),
            "update" => Ok(Verb::Update),
            "delete" => Ok(Verb::Delete),
            "manage" => Ok(Verb::Manage),
            _ => Err(format!("Invalid verb: {}", s)),
        }
    }
}

/// A verb on a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub resource: Resource,
    pub verb: Verb,
}

impl Permission {
    pub const fn new(resource: Resource, verb: Verb) -> Self {
        Self { resource, verb }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource.as_str(), self.verb.as_str())
    }
}

/// A permission held system-wide (`scope: None`) or at one location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub permission: Permission,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<LocationId>,
}

impl PermissionGrant {
    pub fn unscoped(resource: Resource, verb: Verb) -> Self {
        Self {
            permission: Permission::new(resource, verb),
            scope: None,
        }
    }

    pub fn scoped(resource: Resource, verb: Verb, scope: LocationId) -> Self {
        Self {
            permission: Permission::new(resource, verb),
            scope: Some(scope),
        }
    }
}

/// A set of permission grants with helper methods
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    grants: HashSet<PermissionGrant>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self {
            grants: HashSet::new(),
        }
    }

    /// Exact-scope check: `scope: None` asks for a system-wide grant only.
    /// `Manage` on the resource satisfies any verb.
    pub fn has(&self, resource: Resource, verb: Verb, scope: Option<&LocationId>) -> bool {
        self.grants.iter().any(|g| {
            g.permission.resource == resource
                && (g.permission.verb == verb || g.permission.verb == Verb::Manage)
                && g.scope.as_ref() == scope
        })
    }

    pub fn add(&mut self, grant: PermissionGrant) {
        self.grants.insert(grant);
    }

    /// Union with another set
    pub fn merge(&mut self, other: PermissionSet) {
        self.grants.extend(other.grants);
    }

    pub fn remove(&mut self, grant: &PermissionGrant) {
        self.grants.remove(grant);
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Unscoped grants for the given request verbs
    pub fn request_verbs(verbs: &[Verb]) -> Self {
        verbs
            .iter()
            .map(|v| PermissionGrant::unscoped(Resource::Request, *v))
            .collect::<Vec<_>>()
            .into()
    }

    /// Default bundle for requesters below the reviewer tier
    pub fn stakeholder_defaults() -> Self {
        Self::request_verbs(&[
            Verb::Read,
            Verb::Create,
            Verb::Confirm,
            Verb::Decline,
            Verb::Reschedule,
            Verb::Cancel,
            Verb::Update,
        ])
    }

    /// Default bundle for reviewers
    pub fn coordinator_defaults() -> Self {
        let mut set = Self::request_verbs(&[
            Verb::Read,
            Verb::Create,
            Verb::Review,
            Verb::Reschedule,
            Verb::Cancel,
            Verb::Update,
        ]);
        set.add(PermissionGrant::unscoped(Resource::Event, Verb::Update));
        set
    }

    /// Default bundle for administrators
    pub fn admin_defaults() -> Self {
        vec![
            PermissionGrant::unscoped(Resource::Request, Verb::Manage),
            PermissionGrant::unscoped(Resource::Event, Verb::Manage),
        ]
        .into()
    }
}

impl From<Vec<PermissionGrant>> for PermissionSet {
    fn from(grants: Vec<PermissionGrant>) -> Self {
        Self {
            grants: grants.into_iter().collect(),
        }
    }
}
