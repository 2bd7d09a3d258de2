//! Map or unmap routes on a named release

use super::{close_stage, mismatch, CommandHandler, HandlerResult};
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::routes::RouteSwapCoordinator;
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_types::{
    DeploymentOutput, DeploymentRequest, ReleaseInfo, RequestKind, RouteMappingOutput,
    RouteMappingRequest, RouteOperation,
};
use tracing::instrument;

pub struct RouteMappingHandler;

impl RouteMappingHandler {
    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), release = %request.release_name))]
    async fn run(&self, request: &RouteMappingRequest, ctx: &TaskContext, log: &StageLog) -> Result<RouteMappingOutput> {
        let release = ctx
            .platform()
            .get_application_by_name(&request.release_name)
            .await?
            .ok_or_else(|| {
                DeploymentError::PlatformApi(format!(
                    "Application {} not found",
                    request.release_name
                ))
            })?;

        let coordinator = RouteSwapCoordinator::new(ctx);
        match request.operation {
            RouteOperation::Map => coordinator.map(&release.guid, &request.routes, log).await?,
            RouteOperation::Unmap => coordinator.unmap(&release.guid, &request.routes, log).await?,
        }

        let updated = ctx.release(&release.guid).await?;
        Ok(RouteMappingOutput {
            release: ReleaseInfo::from_detail(&updated),
        })
    }
}

#[async_trait]
impl CommandHandler for RouteMappingHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::RouteMapping
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::RouteMapping(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::RouteMapping);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::RouteMapping)
            .map_err(CommandFailure::from);
        close_stage(ctx, &log, result, "Route mapping completed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage_log::MemoryLogSink;
    use skyway_platform::InMemoryPlatform;
    use skyway_types::{CommandHeader, CommandStatus, PlatformConnection, Secret};
    use std::sync::Arc;

    fn request(name: &str, routes: &[&str], operation: RouteOperation) -> DeploymentRequest {
        DeploymentRequest::RouteMapping(RouteMappingRequest {
            header: CommandHeader::new(PlatformConnection {
                endpoint: "api.example.com".to_string(),
                organization: "org".to_string(),
                space: "dev".to_string(),
                username: "ci".to_string(),
                password: Secret::new("pw"),
            }),
            release_name: name.to_string(),
            routes: routes.iter().copied().collect(),
            operation,
        })
    }

    #[tokio::test]
    async fn test_map_then_unmap_absent_route() {
        let platform = InMemoryPlatform::new();
        let guid = platform.seed_release("web__4", 1, &["web.example.com"]);
        let ctx = TaskContext::new(Arc::new(platform.clone()), Arc::new(MemoryLogSink::new()), "/tmp");

        RouteMappingHandler
            .execute(&request("web__4", &["web-canary.example.com"], RouteOperation::Map), &ctx)
            .await
            .unwrap();
        assert_eq!(platform.release(&guid).unwrap().routes.len(), 2);

        let output = RouteMappingHandler
            .execute(
                &request("web__4", &["web-canary.example.com", "never.example.com"], RouteOperation::Unmap),
                &ctx,
            )
            .await
            .unwrap();
        match output {
            DeploymentOutput::RouteMapping(mapping) => {
                assert_eq!(mapping.release.attached_routes, vec!["web.example.com".to_string()]);
            }
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_release_is_platform_error() {
        let platform = InMemoryPlatform::new();
        let sink = Arc::new(MemoryLogSink::new());
        let ctx = TaskContext::new(Arc::new(platform), sink.clone(), "/tmp");

        let failure = RouteMappingHandler
            .execute(&request("ghost", &["x.example.com"], RouteOperation::Map), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, DeploymentError::PlatformApi(_)));
        assert_eq!(sink.status(Stage::RouteMapping), Some(CommandStatus::Failure));
    }
}
