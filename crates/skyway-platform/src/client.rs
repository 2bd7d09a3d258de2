//! Target platform capability interface

use crate::error::Result;
use async_trait::async_trait;
use skyway_types::{
    AppGuid, PlatformConnection, ReleaseDetail, ReleaseSummary, Secret, StatusMarker,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Operations of the platform interface, used for journaling and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformOperation {
    Push,
    Resize,
    Rename,
    Delete,
    MapRoutes,
    UnmapRoutes,
    GetApplication,
    ListReleases,
    SetStatusMarker,
    UnsetStatusMarker,
    QueryStatusMarker,
    QueryAutoscaler,
    ToggleAutoscaler,
    RunPlugin,
}

impl fmt::Display for PlatformOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatformOperation::Push => "push",
            PlatformOperation::Resize => "resize",
            PlatformOperation::Rename => "rename",
            PlatformOperation::Delete => "delete",
            PlatformOperation::MapRoutes => "map-routes",
            PlatformOperation::UnmapRoutes => "unmap-routes",
            PlatformOperation::GetApplication => "get-application",
            PlatformOperation::ListReleases => "list-releases",
            PlatformOperation::SetStatusMarker => "set-status-marker",
            PlatformOperation::UnsetStatusMarker => "unset-status-marker",
            PlatformOperation::QueryStatusMarker => "query-status-marker",
            PlatformOperation::QueryAutoscaler => "query-autoscaler",
            PlatformOperation::ToggleAutoscaler => "toggle-autoscaler",
            PlatformOperation::RunPlugin => "run-plugin",
        };
        f.write_str(name)
    }
}

/// A push of one finalized manifest
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Finalized manifest (YAML)
    pub manifest: String,
    /// Replace running instances in place instead of creating a fresh release
    pub rolling: bool,
    /// Registry password for container images, never part of the manifest
    pub docker_password: Option<Secret>,
    pub working_dir: PathBuf,
}

/// A plugin script invocation
#[derive(Debug, Clone)]
pub struct PluginScript {
    pub script: String,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOutcome {
    pub exit_code: i32,
    pub output: String,
}

/// Capabilities the deployment engine consumes.
///
/// Implementations are scoped to one organization/space.
#[async_trait]
pub trait TargetPlatform: Send + Sync {
    /// Create or update an application from a manifest
    async fn push_application(&self, push: &PushRequest) -> Result<ReleaseDetail>;

    /// Resize and block until the platform reports steady state
    async fn resize_application(&self, guid: &AppGuid, instances: u32) -> Result<ReleaseDetail>;

    async fn rename_application(&self, guid: &AppGuid, new_name: &str) -> Result<()>;

    async fn delete_application(&self, guid: &AppGuid) -> Result<()>;

    async fn map_routes(&self, guid: &AppGuid, routes: &[String]) -> Result<()>;

    /// Unmap routes. Routes not currently mapped are ignored.
    async fn unmap_routes(&self, guid: &AppGuid, routes: &[String]) -> Result<()>;

    async fn get_application_by_name(&self, name: &str) -> Result<Option<ReleaseDetail>>;

    async fn get_application_by_guid(&self, guid: &AppGuid) -> Result<Option<ReleaseDetail>>;

    /// Releases named `<prefix>` or `<prefix>__*`, oldest first
    async fn list_releases(&self, prefix: &str) -> Result<Vec<ReleaseSummary>>;

    async fn set_status_marker(&self, guid: &AppGuid, marker: StatusMarker) -> Result<()>;

    async fn unset_status_marker(&self, guid: &AppGuid) -> Result<()>;

    /// The authoritative "is this release tagged" query
    async fn status_marker(&self, guid: &AppGuid) -> Result<Option<StatusMarker>>;

    async fn is_autoscaler_enabled(&self, guid: &AppGuid) -> Result<bool>;

    async fn set_autoscaler_enabled(&self, guid: &AppGuid, enabled: bool) -> Result<()>;

    async fn run_plugin(&self, script: &PluginScript) -> Result<PluginOutcome>;
}

/// Opens a platform session for an already-resolved connection
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self, connection: &PlatformConnection) -> Result<Arc<dyn TargetPlatform>>;
}
