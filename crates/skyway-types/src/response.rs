//! Typed command results

use crate::ids::{AppGuid, RunId};
use crate::release::{ReleaseInfo, ReleaseRole};
use crate::request::RequestKind;
use crate::scaling::{InstanceRecord, InstanceScalingEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a command or stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    Failure,
}

/// Error class reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    InvalidPlatformState,
    PlatformApiError,
    Timeout,
}

/// Progress of a go-live route swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapState {
    PreSwap,
    RoutesMovedToNew,
    EnvMarkedNewActive,
    RoutesMovedFromOld,
    EnvMarkedOldInactive,
    Done,
}

impl SwapState {
    /// True once any route has moved
    pub fn swap_occurred(&self) -> bool {
        *self > SwapState::PreSwap
    }
}

/// One rename applied to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRecord {
    pub guid: AppGuid,
    pub from: String,
    pub to: String,
}

/// What the retention pruner did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub downsized: Vec<String>,
    /// Releases whose cleanup exhausted its retries
    pub failed: Vec<String>,
}

/// Output of basic and blue-green setup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupOutput {
    pub new_release: ReleaseInfo,
    pub revision: u32,
    pub active_release: Option<ReleaseInfo>,
    pub inactive_release: Option<ReleaseInfo>,
    /// Running instances across all previous releases before the push
    pub total_previous_instances: u32,
    pub pruned: PruneReport,
    /// Manifest sent to the platform
    pub manifest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingDeployOutput {
    pub release: ReleaseInfo,
    /// Release state before the push, None on a first deployment
    pub previous_release: Option<ReleaseInfo>,
    pub first_deployment: bool,
    pub new_instances: Vec<InstanceRecord>,
}

/// Output of standard deploys and their rollback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingOutput {
    /// Plan entries that completed
    pub instance_data: Vec<InstanceScalingEntry>,
    pub new_instances: Vec<InstanceRecord>,
    pub old_instances: Vec<InstanceRecord>,
    #[serde(default)]
    pub deleted_releases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingRollbackOutput {
    pub release: Option<ReleaseInfo>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRoutesOutput {
    pub state: SwapState,
    pub new_release: ReleaseInfo,
    pub previous_release: Option<ReleaseInfo>,
    pub renames: Vec<RenameRecord>,
    /// Set when a failed swap was rolled back in place
    #[serde(default)]
    pub rolled_back: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRollbackOutput {
    pub restored_active: Option<ReleaseInfo>,
    pub renames: Vec<RenameRecord>,
    pub deleted_new_release: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMappingOutput {
    pub release: ReleaseInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFetchOutput {
    pub active_release: Option<ReleaseInfo>,
    pub inactive_release: Option<ReleaseInfo>,
    /// Every release of the prefix, oldest first, with its role
    pub releases: Vec<(ReleaseInfo, ReleaseRole)>,
    pub next_revision: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPluginOutput {
    pub exit_code: i32,
    pub output: String,
}

/// Strategy-specific output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeploymentOutput {
    Setup(SetupOutput),
    RollingDeploy(RollingDeployOutput),
    Scaling(ScalingOutput),
    RollingRollback(RollingRollbackOutput),
    SwapRoutes(SwapRoutesOutput),
    SwapRollback(SwapRollbackOutput),
    RouteMapping(RouteMappingOutput),
    DataFetch(DataFetchOutput),
    RunPlugin(RunPluginOutput),
}

/// Result returned for every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub run_id: RunId,
    pub kind: RequestKind,
    pub status: CommandStatus,
    /// Sanitized, human readable
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    /// Present on success, and on failure when partial data was collected
    pub output: Option<DeploymentOutput>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentResponse {
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}
