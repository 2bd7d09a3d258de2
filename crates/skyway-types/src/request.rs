//! Deployment request variants
//!
//! Each variant carries the resolved connection, a steady-state timeout and
//! the strategy-specific inputs, including outputs of earlier steps.

use crate::artifact::ArtifactDescriptor;
use crate::connection::PlatformConnection;
use crate::release::ReleaseInfo;
use crate::routes::RouteSet;
use crate::scaling::{InstanceScalingEntry, ResizeStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fields shared by every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHeader {
    pub connection: PlatformConnection,
    /// Upper bound for each steady-state wait
    #[serde(with = "duration_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Whether releases may carry an external autoscaler
    #[serde(default)]
    pub use_app_autoscaler: bool,
}

impl CommandHeader {
    pub fn new(connection: PlatformConnection) -> Self {
        Self {
            connection,
            timeout: default_timeout(),
            use_app_autoscaler: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_autoscaler(mut self, enabled: bool) -> Self {
        self.use_app_autoscaler = enabled;
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_true() -> bool {
    true
}

/// How blue-green releases are named across a swap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingStrategy {
    /// Every release keeps its `<prefix>__<rev>` name
    #[default]
    Versioned,
    /// The live release is renamed to the bare prefix on swap, the old one to `__INACTIVE`
    ProductionName,
}

/// Create a release with zero instances next to the current one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicSetupRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    /// Manifest template (YAML)
    pub manifest: String,
    pub artifact: ArtifactDescriptor,
    #[serde(default)]
    pub routes: RouteSet,
    #[serde(default)]
    pub older_versions_to_keep: Option<u32>,
}

/// Create a new INACTIVE release on temporary routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueGreenSetupRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    pub manifest: String,
    pub artifact: ArtifactDescriptor,
    #[serde(default)]
    pub temp_routes: RouteSet,
    #[serde(default)]
    pub final_routes: RouteSet,
    #[serde(default)]
    pub older_versions_to_keep: Option<u32>,
    #[serde(default)]
    pub naming: NamingStrategy,
}

/// Push in place with the platform's rolling strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingDeployRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    pub manifest: String,
    pub artifact: ArtifactDescriptor,
    #[serde(default)]
    pub routes: RouteSet,
}

/// Desired instance count for one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTarget {
    pub release: ReleaseInfo,
    pub desired_count: u32,
}

/// Resize the new release up and previous releases down
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardDeployRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    pub new_release: ReleaseInfo,
    /// Total instance count the new release should reach
    pub upsize_count: u32,
    /// Instances to remove from previous releases
    #[serde(default)]
    pub downsize_count: u32,
    #[serde(default)]
    pub resize_strategy: ResizeStrategy,
    /// Blue-green deploys upsize only; old releases are retired by the swap
    #[serde(default)]
    pub standard_blue_green: bool,
}

/// Undo a basic or standard deploy from its recorded scaling plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    #[serde(default)]
    pub new_release: Option<ReleaseInfo>,
    #[serde(default)]
    pub active_release: Option<ReleaseInfo>,
    /// Scaling plan executed by the deploy being rolled back
    #[serde(default)]
    pub instance_data: Vec<InstanceScalingEntry>,
    #[serde(default)]
    pub resize_strategy: ResizeStrategy,
    #[serde(default)]
    pub standard_blue_green: bool,
    #[serde(default)]
    pub delete_new_release: bool,
}

/// Undo a rolling deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingRollbackRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    /// No release existed before the rolling deploy
    pub first_deployment: bool,
    #[serde(default)]
    pub previous_manifest: Option<String>,
    #[serde(default)]
    pub previous_artifact: Option<ArtifactDescriptor>,
    #[serde(default)]
    pub routes: RouteSet,
}

/// Move final routes onto the new release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRouteRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    pub new_release: ReleaseInfo,
    #[serde(default)]
    pub existing_release: Option<ReleaseInfo>,
    #[serde(default)]
    pub inactive_release: Option<ReleaseInfo>,
    #[serde(default)]
    pub temp_routes: RouteSet,
    pub final_routes: RouteSet,
    #[serde(default)]
    pub downsize_old_release: bool,
    #[serde(default)]
    pub naming: NamingStrategy,
}

/// Restore the pre-swap topology after a failed blue-green deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRollbackRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    pub new_release: ReleaseInfo,
    #[serde(default)]
    pub active_release: Option<ReleaseInfo>,
    #[serde(default)]
    pub inactive_release: Option<ReleaseInfo>,
    #[serde(default)]
    pub temp_routes: RouteSet,
    pub final_routes: RouteSet,
    /// Caller-supplied: whether the forward swap ran
    pub swap_occurred: bool,
    #[serde(default)]
    pub upsize_inactive_release: bool,
    #[serde(default = "default_true")]
    pub delete_new_release: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOperation {
    Map,
    Unmap,
}

/// Map or unmap routes on a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMappingRequest {
    pub header: CommandHeader,
    pub release_name: String,
    pub routes: RouteSet,
    pub operation: RouteOperation,
}

/// Read-only view of a prefix's releases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFetchRequest {
    pub header: CommandHeader,
    pub release_name_prefix: String,
    #[serde(default)]
    pub blue_green: bool,
}

/// File written into the working directory before a plugin run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginFile {
    /// Path relative to the working directory
    pub path: String,
    pub content: String,
}

/// Run a platform CLI plugin script
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPluginRequest {
    pub header: CommandHeader,
    pub script: String,
    #[serde(default)]
    pub files: Vec<PluginFile>,
}

/// Closed set of deployment commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeploymentRequest {
    BasicSetup(BasicSetupRequest),
    BlueGreenSetup(BlueGreenSetupRequest),
    RollingDeploy(RollingDeployRequest),
    StandardDeploy(StandardDeployRequest),
    Rollback(RollbackRequest),
    RollingRollback(RollingRollbackRequest),
    SwapRoute(SwapRouteRequest),
    SwapRollback(SwapRollbackRequest),
    RouteMapping(RouteMappingRequest),
    DataFetch(DataFetchRequest),
    RunPlugin(RunPluginRequest),
}

/// Discriminant of [`DeploymentRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    BasicSetup,
    BlueGreenSetup,
    RollingDeploy,
    StandardDeploy,
    Rollback,
    RollingRollback,
    SwapRoute,
    SwapRollback,
    RouteMapping,
    DataFetch,
    RunPlugin,
}

impl RequestKind {
    pub const ALL: [RequestKind; 11] = [
        RequestKind::BasicSetup,
        RequestKind::BlueGreenSetup,
        RequestKind::RollingDeploy,
        RequestKind::StandardDeploy,
        RequestKind::Rollback,
        RequestKind::RollingRollback,
        RequestKind::SwapRoute,
        RequestKind::SwapRollback,
        RequestKind::RouteMapping,
        RequestKind::DataFetch,
        RequestKind::RunPlugin,
    ];
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::BasicSetup => "basic-setup",
            RequestKind::BlueGreenSetup => "blue-green-setup",
            RequestKind::RollingDeploy => "rolling-deploy",
            RequestKind::StandardDeploy => "standard-deploy",
            RequestKind::Rollback => "rollback",
            RequestKind::RollingRollback => "rolling-rollback",
            RequestKind::SwapRoute => "swap-route",
            RequestKind::SwapRollback => "swap-rollback",
            RequestKind::RouteMapping => "route-mapping",
            RequestKind::DataFetch => "data-fetch",
            RequestKind::RunPlugin => "run-plugin",
        };
        f.write_str(name)
    }
}

impl DeploymentRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            DeploymentRequest::BasicSetup(_) => RequestKind::BasicSetup,
            DeploymentRequest::BlueGreenSetup(_) => RequestKind::BlueGreenSetup,
            DeploymentRequest::RollingDeploy(_) => RequestKind::RollingDeploy,
            DeploymentRequest::StandardDeploy(_) => RequestKind::StandardDeploy,
            DeploymentRequest::Rollback(_) => RequestKind::Rollback,
            DeploymentRequest::RollingRollback(_) => RequestKind::RollingRollback,
            DeploymentRequest::SwapRoute(_) => RequestKind::SwapRoute,
            DeploymentRequest::SwapRollback(_) => RequestKind::SwapRollback,
            DeploymentRequest::RouteMapping(_) => RequestKind::RouteMapping,
            DeploymentRequest::DataFetch(_) => RequestKind::DataFetch,
            DeploymentRequest::RunPlugin(_) => RequestKind::RunPlugin,
        }
    }

    pub fn header(&self) -> &CommandHeader {
        match self {
            DeploymentRequest::BasicSetup(r) => &r.header,
            DeploymentRequest::BlueGreenSetup(r) => &r.header,
            DeploymentRequest::RollingDeploy(r) => &r.header,
            DeploymentRequest::StandardDeploy(r) => &r.header,
            DeploymentRequest::Rollback(r) => &r.header,
            DeploymentRequest::RollingRollback(r) => &r.header,
            DeploymentRequest::SwapRoute(r) => &r.header,
            DeploymentRequest::SwapRollback(r) => &r.header,
            DeploymentRequest::RouteMapping(r) => &r.header,
            DeploymentRequest::DataFetch(r) => &r.header,
            DeploymentRequest::RunPlugin(r) => &r.header,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAP_ROLLBACK: &str = r#"{
        "kind": "swap_rollback",
        "header": {
            "connection": {
                "endpoint": "api.sys.example.com",
                "organization": "payments",
                "space": "prod",
                "username": "deployer",
                "password": "pw"
            },
            "timeout": 30000
        },
        "release_name_prefix": "PaymentService",
        "new_release": {"guid": "g-new", "name": "PaymentService__3", "running_count": 2},
        "final_routes": ["pay.example.com"],
        "swap_occurred": true
    }"#;

    #[test]
    fn test_tagged_request_parsing() {
        let request: DeploymentRequest = serde_json::from_str(SWAP_ROLLBACK).unwrap();
        assert_eq!(request.kind(), RequestKind::SwapRollback);
        assert_eq!(request.header().timeout, Duration::from_secs(30));
        assert!(!request.header().use_app_autoscaler);
        match request {
            DeploymentRequest::SwapRollback(r) => {
                assert!(r.swap_occurred);
                assert!(r.delete_new_release);
                assert!(r.temp_routes.is_empty());
                assert!(r.active_release.is_none());
            }
            other => panic!("unexpected variant {:?}", other.kind()),
        }
    }

    #[test]
    fn test_request_kind_names_are_unique() {
        let names: std::collections::HashSet<String> =
            RequestKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names.len(), 11);
    }
}
