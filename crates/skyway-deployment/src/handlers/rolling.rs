//! Rolling deploy and its rollback

use super::{close_stage, mismatch, push, CommandHandler, HandlerResult};
use crate::artifact::ArtifactResolver;
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::manifest::{self, ManifestEdit};
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_types::{
    DeploymentOutput, DeploymentRequest, InstanceRecord, ReleaseInfo, RequestKind,
    RollingDeployOutput, RollingDeployRequest, RollingRollbackOutput, RollingRollbackRequest,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// Pushes in place under the bare prefix using the platform's rolling strategy
pub struct RollingDeployHandler {
    artifacts: Arc<dyn ArtifactResolver>,
}

impl RollingDeployHandler {
    pub fn new(artifacts: Arc<dyn ArtifactResolver>) -> Self {
        Self { artifacts }
    }

    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), release = %request.release_name_prefix))]
    async fn run(&self, request: &RollingDeployRequest, ctx: &TaskContext, log: &StageLog) -> Result<RollingDeployOutput> {
        let name = request.release_name_prefix.as_str();

        let previous = ctx
            .platform()
            .get_application_by_name(name)
            .await?
            .map(|detail| ReleaseInfo::from_detail(&detail));
        match &previous {
            Some(previous) => log.info(format!(
                "Captured {} with {} running instances for rollback",
                previous.name, previous.running_count
            )),
            None => log.info(format!("No release named {}, first deployment", name)),
        }

        let resolved = self.artifacts.resolve(&request.artifact, ctx.working_dir()).await?;
        let edit = ManifestEdit::new(name)
            .with_artifact(resolved.clone())
            .with_routes(request.routes.clone());
        let rendered = manifest::render(&request.manifest, &edit)?;

        let detail = push(ctx, &rendered, Some(&resolved), true, log).await?;

        let new_instances: Vec<InstanceRecord> = detail
            .instances
            .iter()
            .map(|instance| InstanceRecord {
                release_name: detail.name.clone(),
                guid: detail.guid.clone(),
                index: instance.index,
                state: instance.state,
                is_upsize: true,
            })
            .collect();

        info!(release = %detail.name, instances = new_instances.len(), "Rolling deploy completed");
        Ok(RollingDeployOutput {
            release: ReleaseInfo::from_detail(&detail),
            first_deployment: previous.is_none(),
            previous_release: previous,
            new_instances,
        })
    }
}

#[async_trait]
impl CommandHandler for RollingDeployHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::RollingDeploy
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::RollingDeploy(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::Setup);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::RollingDeploy)
            .map_err(CommandFailure::from);
        close_stage(ctx, &log, result, "Rolling deploy completed")
    }
}

/// Deletes a first deployment or re-pushes the previous manifest
pub struct RollingRollbackHandler {
    artifacts: Arc<dyn ArtifactResolver>,
}

impl RollingRollbackHandler {
    pub fn new(artifacts: Arc<dyn ArtifactResolver>) -> Self {
        Self { artifacts }
    }

    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), release = %request.release_name_prefix))]
    async fn run(&self, request: &RollingRollbackRequest, ctx: &TaskContext, log: &StageLog) -> Result<RollingRollbackOutput> {
        let name = request.release_name_prefix.as_str();

        if request.first_deployment {
            let Some(current) = ctx.platform().get_application_by_name(name).await? else {
                log.info(format!("Release {} does not exist, nothing to roll back", name));
                return Ok(RollingRollbackOutput {
                    release: None,
                    deleted: false,
                });
            };
            if !current.routes.is_empty() {
                ctx.platform()
                    .unmap_routes(&current.guid, &current.routes)
                    .await?;
            }
            ctx.platform().delete_application(&current.guid).await?;
            log.info(format!("Deleted first deployment {}", current.name));
            return Ok(RollingRollbackOutput {
                release: None,
                deleted: true,
            });
        }

        let template = request.previous_manifest.as_deref().ok_or_else(|| {
            DeploymentError::invalid_argument("rolling rollback needs the previous manifest")
        })?;
        let mut edit = ManifestEdit::new(name).with_routes(request.routes.clone());
        let resolved = match &request.previous_artifact {
            Some(artifact) => {
                let resolved = self.artifacts.resolve(artifact, ctx.working_dir()).await?;
                edit = edit.with_artifact(resolved.clone());
                Some(resolved)
            }
            None => None,
        };
        let rendered = manifest::render(template, &edit)?;
        log.info(format!("Re-pushing previous version of {}", name));
        let detail = push(ctx, &rendered, resolved.as_ref(), true, log).await?;

        Ok(RollingRollbackOutput {
            release: Some(ReleaseInfo::from_detail(&detail)),
            deleted: false,
        })
    }
}

#[async_trait]
impl CommandHandler for RollingRollbackHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::RollingRollback
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::RollingRollback(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::Rollback);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::RollingRollback)
            .map_err(CommandFailure::from);
        close_stage(ctx, &log, result, "Rolling rollback completed")
    }
}
