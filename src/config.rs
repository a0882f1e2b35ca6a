//! Engine configuration
//!
//! One immutable value handed to the engine at construction. Nothing in the
//! crate reads configuration from globals.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::workflow::authority::Authority;

/// Order in which eligible reviewers are ranked for primary assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewerPriority {
    /// Lowest sufficient authority first, so admins are not the default reviewer
    #[default]
    LowestAuthorityFirst,
    HighestAuthorityFirst,
    /// Whatever order the reviewer directory returned
    DirectoryOrder,
}

/// Reviewer-priority table keyed by request type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub default_priority: ReviewerPriority,
    #[serde(default)]
    pub by_request_type: BTreeMap<String, ReviewerPriority>,
}

impl RoutingPolicy {
    pub fn priority_for(&self, request_type: &str) -> ReviewerPriority {
        self.by_request_type
            .get(request_type)
            .copied()
            .unwrap_or(self.default_priority)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Authority at which actors review (accept/reject vocabulary)
    pub reviewer_tier: Authority,
    /// Route accepted/rejected requests back to the requester before closing
    pub require_confirmation: bool,
    pub claim_ttl_hours: i64,
    /// Age after which an unanswered reschedule proposal expires
    pub reschedule_expiry_hours: i64,
    /// Re-read/re-validate attempts after a lost conditional write
    pub max_conflict_retries: u32,
    pub routing: RoutingPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reviewer_tier: Authority::COORDINATOR,
            require_confirmation: false,
            claim_ttl_hours: 24,
            reschedule_expiry_hours: 72,
            max_conflict_retries: 3,
            routing: RoutingPolicy::default(),
        }
    }
}

/// Upper bound for any hour-denominated window, ten years
pub const MAX_WINDOW_HOURS: i64 = 10 * 365 * 24;

fn window(name: &str, hours: i64) -> Result<Duration> {
    if hours <= 0 || hours > MAX_WINDOW_HOURS {
        return Err(AppError::Input(format!(
            "{} must be between 1 and {}",
            name, MAX_WINDOW_HOURS
        )));
    }
    Duration::try_hours(hours)
        .ok_or_else(|| AppError::Input(format!("{} is out of range", name)))
}

impl EngineConfig {
    pub fn claim_ttl(&self) -> Result<Duration> {
        window("claim_ttl_hours", self.claim_ttl_hours)
    }

    pub fn reschedule_expiry(&self) -> Result<Duration> {
        window("reschedule_expiry_hours", self.reschedule_expiry_hours)
    }

    pub fn with_confirmation(mut self, required: bool) -> Self {
        self.require_confirmation = required;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.claim_ttl()?;
        self.reschedule_expiry()?;
        if self.max_conflict_retries == 0 {
            return Err(AppError::Input(
                "max_conflict_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Input(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}
