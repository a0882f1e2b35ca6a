//! Authority model
//!
//! Maps a user's role grants to one numeric authority value. Authority is
//! always recomputed from live grants when an action is evaluated, so a
//! revoked role stops counting immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric authority rank. Higher dominates lower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Authority(u16);

impl Authority {
    /// No live role grants
    pub const NONE: Authority = Authority(0);
    pub const BASIC: Authority = Authority(20);
    pub const STAKEHOLDER: Authority = Authority(30);
    pub const COORDINATOR: Authority = Authority(60);
    pub const OPERATIONAL_ADMIN: Authority = Authority(80);
    /// Ceiling tier: bypasses hierarchy and jurisdiction checks
    pub const SYSTEM_ADMIN: Authority = Authority(100);

    pub const fn new(value: u16) -> Self {
        Authority(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_ceiling(&self) -> bool {
        *self >= Authority::SYSTEM_ADMIN
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A role assigned to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    /// Role label, e.g. "coordinator"
    pub role: String,
    pub authority: Authority,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, authority: Authority) -> Self {
        Self {
            role: role.into(),
            authority,
            active: true,
            expires_at: None,
        }
    }

    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Whether this grant counts toward authority at `now`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |at| at > now)
    }
}

/// Effective authority and the role label that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveAuthority {
    pub authority: Authority,
    pub role: String,
}

impl EffectiveAuthority {
    pub fn none() -> Self {
        Self {
            authority: Authority::NONE,
            role: "none".to_string(),
        }
    }
}

/// Maximum authority across live grants
pub fn effective_authority(grants: &[RoleGrant], now: DateTime<Utc>) -> EffectiveAuthority {
    grants
        .iter()
        .filter(|g| g.is_live(now))
        .max_by_key(|g| g.authority)
        .map(|g| EffectiveAuthority {
            authority: g.authority,
            role: g.role.clone(),
        })
        .unwrap_or_else(EffectiveAuthority::none)
}
