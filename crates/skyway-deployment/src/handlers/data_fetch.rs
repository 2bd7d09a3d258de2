//! Read-only topology query

use super::{close_stage, mismatch, CommandHandler, HandlerResult};
use crate::autoscaler::AutoscalerReconciler;
use crate::context::TaskContext;
use crate::error::{CommandFailure, Result};
use crate::naming::NamingResolver;
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_types::{
    DataFetchOutput, DataFetchRequest, DeploymentOutput, DeploymentRequest, ReleaseInfo,
    ReleaseSummary, RequestKind,
};
use tracing::instrument;

/// Read-only view of a prefix's releases
pub struct DataFetchHandler;

impl DataFetchHandler {
    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), prefix = %request.release_name_prefix))]
    async fn run(&self, request: &DataFetchRequest, ctx: &TaskContext, log: &StageLog) -> Result<DataFetchOutput> {
        let topology = NamingResolver::new(ctx.platform())
            .resolve(&request.release_name_prefix, request.blue_green)
            .await?;

        let releases = topology
            .releases
            .iter()
            .map(|release| (ReleaseInfo::from_summary(release), topology.role_of(release)))
            .collect::<Vec<_>>();
        for (release, role) in &releases {
            log.info(format!("{} [{}] {} running", release.name, role, release.running_count));
        }

        Ok(DataFetchOutput {
            active_release: with_autoscaler(ctx, topology.active.as_ref(), log).await,
            inactive_release: with_autoscaler(ctx, topology.inactive.as_ref(), log).await,
            next_revision: topology.next_revision(),
            releases,
        })
    }
}

async fn with_autoscaler(ctx: &TaskContext, release: Option<&ReleaseSummary>, log: &StageLog) -> Option<ReleaseInfo> {
    let release = release?;
    let snapshot = AutoscalerReconciler::new(ctx)
        .snapshot(&release.guid, &release.name, log)
        .await;
    Some(ReleaseInfo::from_summary(release).with_autoscaler(snapshot.was_enabled))
}

#[async_trait]
impl CommandHandler for DataFetchHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::DataFetch
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::DataFetch(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::DataFetch);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::DataFetch)
            .map_err(CommandFailure::from);
        close_stage(ctx, &log, result, "Data fetch completed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage_log::MemoryLogSink;
    use skyway_platform::InMemoryPlatform;
    use skyway_types::{CommandHeader, PlatformConnection, ReleaseRole, Secret, StatusMarker};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_roles_and_autoscaler_reported_without_mutation() {
        let platform = InMemoryPlatform::new();
        let inactive = platform.seed_release("pay__1", 1, &[]);
        platform.seed_marker(&inactive, StatusMarker::Inactive);
        let active = platform.seed_release("pay__2", 2, &["pay.example.com"]);
        platform.attach_autoscaler(&active, true);
        platform.seed_release("pay__interim", 0, &[]);
        let ctx = TaskContext::new(Arc::new(platform.clone()), Arc::new(MemoryLogSink::new()), "/tmp")
            .with_autoscaler(true);

        let request = DeploymentRequest::DataFetch(DataFetchRequest {
            header: CommandHeader::new(PlatformConnection {
                endpoint: "api.example.com".to_string(),
                organization: "org".to_string(),
                space: "prod".to_string(),
                username: "ci".to_string(),
                password: Secret::new("pw"),
            }),
            release_name_prefix: "pay".to_string(),
            blue_green: true,
        });
        let output = match DataFetchHandler.execute(&request, &ctx).await.unwrap() {
            DeploymentOutput::DataFetch(output) => output,
            other => panic!("unexpected output {other:?}"),
        };

        let roles: Vec<ReleaseRole> = output.releases.iter().map(|(_, role)| *role).collect();
        assert_eq!(
            roles,
            vec![ReleaseRole::Inactive, ReleaseRole::Active, ReleaseRole::Interim]
        );
        assert!(output.active_release.unwrap().autoscaler_enabled);
        assert_eq!(output.inactive_release.unwrap().guid, inactive);
        assert_eq!(output.next_revision, 3);
        assert!(platform.calls().is_empty());
    }
}
