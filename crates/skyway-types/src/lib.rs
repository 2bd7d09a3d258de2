//! Skyway Types - Core types for deployment strategy orchestration
//!
//! Skyway drives application releases on a route-based hosting platform
//! (organization/space scoped, CLI/API driven lifecycle). This crate holds
//! the data model shared by the platform client and the deployment engine.
//!
//! ## Key Concepts
//!
//! - **Release**: a named application on the platform, identified by an immutable GUID
//! - **RouteSet**: ordered, duplicate-free set of routes (temp vs final routes)
//! - **InstanceScalingEntry**: one caller-supplied resize step
//! - **DeploymentRequest**: closed sum type of the eleven command variants
//! - **DeploymentResponse**: typed result carrying status, sanitized error and output

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifact;
pub mod connection;
pub mod ids;
pub mod release;
pub mod request;
pub mod response;
pub mod routes;
pub mod scaling;

// Re-export main types
pub use artifact::{ArtifactDescriptor, RegistryCredentials, ResolvedArtifact};
pub use connection::{PlatformConnection, Secret};
pub use ids::{AppGuid, RunId};
pub use release::{
    InstanceDetail, InstanceState, ReleaseDetail, ReleaseInfo, ReleaseRole, ReleaseSummary,
    StatusMarker, STATUS_MARKER_ENV,
};
pub use request::{
    BasicSetupRequest, BlueGreenSetupRequest, CommandHeader, DataFetchRequest,
    DeploymentRequest, NamingStrategy, PluginFile, RequestKind, RollbackRequest,
    RollingDeployRequest, RollingRollbackRequest, RouteMappingRequest, RouteOperation,
    RunPluginRequest, ScaleTarget, StandardDeployRequest, SwapRollbackRequest, SwapRouteRequest,
};
pub use response::{
    CommandStatus, DataFetchOutput, DeploymentOutput, DeploymentResponse, ErrorKind,
    PruneReport, RenameRecord, RollingDeployOutput, RollingRollbackOutput, RouteMappingOutput,
    RunPluginOutput, ScalingOutput, SetupOutput, SwapRollbackOutput, SwapRoutesOutput,
    SwapState,
};
pub use routes::RouteSet;
pub use scaling::{InstanceRecord, InstanceScalingEntry, ResizeStrategy, ScaleDirection};
