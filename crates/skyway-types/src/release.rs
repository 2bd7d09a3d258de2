//! Release types
//!
//! A release is one named application on the platform. Its name mutates
//! during rename sequences; the GUID is the stable identity.

use crate::ids::AppGuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Env var carrying the blue-green status marker of a release
pub const STATUS_MARKER_ENV: &str = "SKYWAY__STATUS__IDENTIFIER";

/// Blue-green role recorded in a release's environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusMarker {
    Active,
    Inactive,
}

impl StatusMarker {
    pub fn as_env_value(&self) -> &'static str {
        match self {
            StatusMarker::Active => "ACTIVE",
            StatusMarker::Inactive => "INACTIVE",
        }
    }

    pub fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Some(StatusMarker::Active),
            "INACTIVE" => Some(StatusMarker::Inactive),
            _ => None,
        }
    }
}

/// Role a release plays within one name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseRole {
    /// Serving production traffic
    Active,
    /// Previous generation kept warm for blue-green rollback
    Inactive,
    /// Leftover of an aborted rename sequence
    Interim,
    /// Any other previous release
    UnversionedOld,
}

impl fmt::Display for ReleaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReleaseRole::Active => "ACTIVE",
            ReleaseRole::Inactive => "INACTIVE",
            ReleaseRole::Interim => "INTERIM",
            ReleaseRole::UnversionedOld => "UNVERSIONED-OLD",
        };
        f.write_str(label)
    }
}

/// Platform-reported state of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Starting,
    Running,
    Crashed,
    Down,
}

/// One instance of a release, keyed by its index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDetail {
    pub index: u32,
    pub state: InstanceState,
}

/// Entry of the previous-releases listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub guid: AppGuid,
    pub name: String,
    /// Instances the platform reports as running
    pub running_instances: u32,
    /// Instance count the release is scaled to
    pub desired_instances: u32,
    pub routes: Vec<String>,
}

/// Full view of a release as returned by a by-name or by-GUID lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDetail {
    pub guid: AppGuid,
    pub name: String,
    pub desired_instances: u32,
    pub routes: Vec<String>,
    #[serde(default)]
    pub instances: Vec<InstanceDetail>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ReleaseDetail {
    pub fn running_instances(&self) -> u32 {
        self.instances
            .iter()
            .filter(|i| i.state == InstanceState::Running)
            .count() as u32
    }

    pub fn status_marker(&self) -> Option<StatusMarker> {
        self.env
            .get(STATUS_MARKER_ENV)
            .and_then(|value| StatusMarker::from_env_value(value))
    }

    pub fn summary(&self) -> ReleaseSummary {
        ReleaseSummary {
            guid: self.guid.clone(),
            name: self.name.clone(),
            running_instances: self.running_instances(),
            desired_instances: self.desired_instances,
            routes: self.routes.clone(),
        }
    }
}

/// Release record handed between steps of a deployment.
///
/// Setup results carry these to the swap, scaling and rollback steps, so
/// rollback can restore names, routes and counts without a durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub guid: AppGuid,
    pub name: String,
    /// Running instances when the record was taken
    pub running_count: u32,
    #[serde(default)]
    pub attached_routes: Vec<String>,
    /// Autoscaler state when the record was taken
    #[serde(default)]
    pub autoscaler_enabled: bool,
}

impl ReleaseInfo {
    pub fn from_summary(summary: &ReleaseSummary) -> Self {
        Self {
            guid: summary.guid.clone(),
            name: summary.name.clone(),
            running_count: summary.running_instances,
            attached_routes: summary.routes.clone(),
            autoscaler_enabled: false,
        }
    }

    pub fn from_detail(detail: &ReleaseDetail) -> Self {
        Self::from_summary(&detail.summary())
    }

    pub fn with_autoscaler(mut self, enabled: bool) -> Self {
        self.autoscaler_enabled = enabled;
        self
    }
}
