//! Basic and blue-green setup
//!
//! Both flows prune previous releases, then push the next revision with zero
//! instances. Scaling happens in a later standard deploy.

use super::{close_stage, mismatch, push, CommandHandler, HandlerResult};
use crate::artifact::ArtifactResolver;
use crate::autoscaler::AutoscalerReconciler;
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::manifest::{self, ManifestEdit};
use crate::naming::{self, NamingResolver, ReleaseTopology};
use crate::pruning::RetentionPruner;
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_types::{
    AppGuid, ArtifactDescriptor, BasicSetupRequest, BlueGreenSetupRequest, CommandStatus,
    DeploymentOutput, DeploymentRequest, PruneReport, ReleaseInfo, ReleaseSummary, RequestKind,
    RouteSet, SetupOutput,
};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct BasicSetupHandler {
    artifacts: Arc<dyn ArtifactResolver>,
}

impl BasicSetupHandler {
    pub fn new(artifacts: Arc<dyn ArtifactResolver>) -> Self {
        Self { artifacts }
    }

    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), prefix = %request.release_name_prefix))]
    async fn run(&self, request: &BasicSetupRequest, ctx: &TaskContext, log: &StageLog) -> Result<SetupOutput> {
        let prefix = request.release_name_prefix.as_str();
        validate_prefix(prefix)?;
        log.info(format!("Starting basic setup for {}", prefix));

        let topology = NamingResolver::new(ctx.platform()).resolve(prefix, false).await?;
        let active = active_info(ctx, &topology, log).await;

        let protected: Vec<_> = topology.active.iter().map(|a| &a.guid).collect();
        let pruned = prune(ctx, &topology.releases, &protected, prefix, request.older_versions_to_keep).await;

        let revision = topology.next_revision();
        let setup = NewRelease {
            name: naming::versioned_name(prefix, revision),
            manifest: &request.manifest,
            artifact: &request.artifact,
            routes: request.routes.clone(),
            inactive_marker: false,
        };
        let (new_release, manifest) = setup.push(&*self.artifacts, ctx, log).await?;

        Ok(SetupOutput {
            new_release,
            revision,
            active_release: active,
            inactive_release: None,
            total_previous_instances: topology.total_running_instances(),
            pruned,
            manifest,
        })
    }
}

#[async_trait]
impl CommandHandler for BasicSetupHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::BasicSetup
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::BasicSetup(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::Setup);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::Setup)
            .map_err(CommandFailure::from);
        close_stage(ctx, &log, result, "Basic setup completed")
    }
}

pub struct BlueGreenSetupHandler {
    artifacts: Arc<dyn ArtifactResolver>,
}

impl BlueGreenSetupHandler {
    pub fn new(artifacts: Arc<dyn ArtifactResolver>) -> Self {
        Self { artifacts }
    }

    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), prefix = %request.release_name_prefix))]
    async fn run(&self, request: &BlueGreenSetupRequest, ctx: &TaskContext, log: &StageLog) -> Result<SetupOutput> {
        let prefix = request.release_name_prefix.as_str();
        validate_prefix(prefix)?;
        if let Some(shared) = request.temp_routes.iter().find(|r| request.final_routes.contains(r)) {
            return Err(DeploymentError::invalid_argument(format!(
                "route {} is both a temp route and a final route",
                shared
            )));
        }
        log.info(format!("Starting blue-green setup for {}", prefix));
        if let Some(declared) = manifest::declared_instances(&request.manifest)? {
            log.info(format!("Manifest declares {} instances for the upsize", declared));
        }

        let topology = NamingResolver::new(ctx.platform()).resolve(prefix, true).await?;
        let active = active_info(ctx, &topology, log).await;

        // The previous INACTIVE release hands its marker and temp routes to the new release.
        // Its recorded state lets a swap rollback restore it.
        let inactive = match &topology.inactive {
            Some(inactive) => {
                let detail = ctx.release(&inactive.guid).await?;
                let recorded = ReleaseInfo::from_detail(&detail);
                ctx.platform().unset_status_marker(&inactive.guid).await?;
                log.info(format!("Removed INACTIVE marker from {}", inactive.name));
                let held: Vec<String> = detail
                    .routes
                    .iter()
                    .filter(|r| request.temp_routes.contains(r))
                    .cloned()
                    .collect();
                if !held.is_empty() {
                    ctx.platform().unmap_routes(&inactive.guid, &held).await?;
                    log.info(format!("Unmapped temp routes {:?} from {}", held, inactive.name));
                }
                Some(recorded)
            }
            None => None,
        };

        let protected: Vec<_> = topology
            .active
            .iter()
            .chain(topology.inactive.iter())
            .map(|r| &r.guid)
            .collect();
        let pruned = prune(ctx, &topology.releases, &protected, prefix, request.older_versions_to_keep).await;

        let revision = topology.next_revision();
        let setup = NewRelease {
            name: naming::versioned_name(prefix, revision),
            manifest: &request.manifest,
            artifact: &request.artifact,
            routes: request.temp_routes.clone(),
            inactive_marker: true,
        };
        let (new_release, manifest) = setup.push(&*self.artifacts, ctx, log).await?;

        info!(
            prefix = %prefix,
            new_release = %new_release.name,
            active = ?active.as_ref().map(|a| &a.name),
            inactive = ?inactive.as_ref().map(|i| &i.name),
            "Blue-green setup pushed new release"
        );

        Ok(SetupOutput {
            new_release,
            revision,
            active_release: active,
            inactive_release: inactive,
            total_previous_instances: topology.total_running_instances(),
            pruned,
            manifest,
        })
    }
}

#[async_trait]
impl CommandHandler for BlueGreenSetupHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::BlueGreenSetup
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::BlueGreenSetup(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::Setup);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::Setup)
            .map_err(CommandFailure::from);
        close_stage(ctx, &log, result, "Blue-green setup completed")
    }
}

struct NewRelease<'r> {
    name: String,
    manifest: &'r str,
    artifact: &'r ArtifactDescriptor,
    routes: RouteSet,
    inactive_marker: bool,
}

impl NewRelease<'_> {
    async fn push(
        self,
        artifacts: &dyn ArtifactResolver,
        ctx: &TaskContext,
        log: &StageLog,
    ) -> Result<(ReleaseInfo, String)> {
        let resolved = artifacts.resolve(self.artifact, ctx.working_dir()).await?;
        let mut edit = ManifestEdit::new(&self.name)
            .with_artifact(resolved.clone())
            .with_routes(self.routes)
            .with_zero_instances();
        if self.inactive_marker {
            edit = edit.with_inactive_marker();
        }
        let rendered = manifest::render(self.manifest, &edit)?;
        let detail = push(ctx, &rendered, Some(&resolved), false, log).await?;
        Ok((ReleaseInfo::from_detail(&detail), rendered))
    }
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.trim().is_empty() {
        return Err(DeploymentError::invalid_argument("release name prefix is empty"));
    }
    if prefix.contains(naming::DELIMITER) {
        return Err(DeploymentError::invalid_argument(format!(
            "release name prefix {} must not contain {}",
            prefix,
            naming::DELIMITER
        )));
    }
    Ok(())
}

async fn active_info(ctx: &TaskContext, topology: &ReleaseTopology, log: &StageLog) -> Option<ReleaseInfo> {
    let active = topology.active.as_ref()?;
    let snapshot = AutoscalerReconciler::new(ctx)
        .snapshot(&active.guid, &active.name, log)
        .await;
    log.info(format!(
        "Current active release is {} with {} running instances",
        active.name, active.running_instances
    ));
    Some(ReleaseInfo::from_summary(active).with_autoscaler(snapshot.was_enabled))
}

async fn prune(
    ctx: &TaskContext,
    releases: &[ReleaseSummary],
    protected: &[&AppGuid],
    prefix: &str,
    keep: Option<u32>,
) -> PruneReport {
    let keep = keep.unwrap_or(ctx.config().retention.older_versions_to_keep);
    let log = ctx.stage(Stage::CheckExistingApps);
    log.info(format!("Keeping {} older versions of {}", keep, prefix));
    let report = RetentionPruner::new(ctx)
        .prune(releases, protected, prefix, keep, &log)
        .await;
    log.finish(
        CommandStatus::Success,
        format!(
            "Deleted {}, downsized {}, failed {}",
            report.deleted.len(),
            report.downsized.len(),
            report.failed.len()
        ),
    );
    report
}
