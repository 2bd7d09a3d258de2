//! One handler per request variant

pub mod data_fetch;
pub mod plugin;
pub mod resize;
pub mod rolling;
pub mod route_mapping;
pub mod setup;
pub mod swap;

pub use data_fetch::DataFetchHandler;
pub use plugin::RunPluginHandler;
pub use resize::{RollbackHandler, StandardDeployHandler};
pub use rolling::{RollingDeployHandler, RollingRollbackHandler};
pub use route_mapping::RouteMappingHandler;
pub use setup::{BasicSetupHandler, BlueGreenSetupHandler};
pub use swap::{SwapRollbackHandler, SwapRouteHandler};

use crate::artifact::ArtifactResolver;
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError};
use crate::stage_log::StageLog;
use async_trait::async_trait;
use skyway_platform::PushRequest;
use skyway_types::{
    CommandStatus, DeploymentOutput, DeploymentRequest, ReleaseDetail, RequestKind,
    ResolvedArtifact,
};
use std::sync::Arc;

pub type HandlerResult = std::result::Result<DeploymentOutput, CommandFailure>;

/// Executes one request variant
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Variant this handler accepts
    fn kind(&self) -> RequestKind;

    /// Run the request. A request of any other variant fails with `InvalidArgument`
    /// before any platform call.
    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult;
}

/// Factory for request handlers
pub fn create_handler(kind: RequestKind, artifacts: Arc<dyn ArtifactResolver>) -> Arc<dyn CommandHandler> {
    match kind {
        RequestKind::BasicSetup => Arc::new(BasicSetupHandler::new(artifacts)),
        RequestKind::BlueGreenSetup => Arc::new(BlueGreenSetupHandler::new(artifacts)),
        RequestKind::RollingDeploy => Arc::new(RollingDeployHandler::new(artifacts)),
        RequestKind::StandardDeploy => Arc::new(StandardDeployHandler),
        RequestKind::Rollback => Arc::new(RollbackHandler),
        RequestKind::RollingRollback => Arc::new(RollingRollbackHandler::new(artifacts)),
        RequestKind::SwapRoute => Arc::new(SwapRouteHandler),
        RequestKind::SwapRollback => Arc::new(SwapRollbackHandler),
        RequestKind::RouteMapping => Arc::new(RouteMappingHandler),
        RequestKind::DataFetch => Arc::new(DataFetchHandler),
        RequestKind::RunPlugin => Arc::new(RunPluginHandler),
    }
}

pub(crate) fn mismatch(expected: RequestKind, request: &DeploymentRequest) -> CommandFailure {
    CommandFailure::from(DeploymentError::invalid_argument(format!(
        "{} handler received a {} request",
        expected,
        request.kind()
    )))
}

/// Close `log` with the outcome of `result`
pub(crate) fn close_stage<T>(
    ctx: &TaskContext,
    log: &StageLog,
    result: std::result::Result<T, CommandFailure>,
    success: &str,
) -> std::result::Result<T, CommandFailure> {
    match &result {
        Ok(_) => log.finish(CommandStatus::Success, success),
        Err(failure) => log.finish(
            CommandStatus::Failure,
            ctx.sanitize(&failure.error.to_string()),
        ),
    }
    result
}

/// Push a finalized manifest, bounded by the run's timeout
pub(crate) async fn push(
    ctx: &TaskContext,
    manifest: &str,
    artifact: Option<&ResolvedArtifact>,
    rolling: bool,
    log: &StageLog,
) -> crate::error::Result<ReleaseDetail> {
    let docker_password = match artifact {
        Some(ResolvedArtifact::Container { password, .. }) => password.clone(),
        _ => None,
    };
    let request = PushRequest {
        manifest: manifest.to_string(),
        rolling,
        docker_password,
        working_dir: ctx.working_dir().to_path_buf(),
    };
    log.info(format!("Pushing manifest:\n{}", manifest));
    let detail = ctx
        .bounded("push", async {
            ctx.platform()
                .push_application(&request)
                .await
                .map_err(DeploymentError::from)
        })
        .await?;
    log.info(format!(
        "Pushed {} ({}) with {} desired instances",
        detail.name, detail.guid, detail.desired_instances
    ));
    Ok(detail)
}
