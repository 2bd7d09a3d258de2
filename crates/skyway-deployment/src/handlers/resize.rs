//! Standard deploy and its rollback
//!
//! Both hand a [`ScalingPlan`] to the scaling coordinator. The deploy builds
//! the plan from the requested counts; the rollback reverses the plan the
//! deploy recorded.

use super::{close_stage, mismatch, CommandHandler, HandlerResult};
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::naming::is_interim;
use crate::routes::RouteSwapCoordinator;
use crate::scaling::{ScalingCoordinator, ScalingPlan};
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_types::{
    CommandStatus, DeploymentOutput, DeploymentRequest, InstanceScalingEntry, ReleaseInfo,
    ReleaseSummary, RequestKind, RollbackRequest, RouteSet, ScalingOutput, StandardDeployRequest,
};
use tracing::{info, instrument, warn};

/// Upsizes the new release and downsizes previous ones
pub struct StandardDeployHandler;

impl StandardDeployHandler {
    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id(), release = %request.new_release.name))]
    async fn plan(&self, request: &StandardDeployRequest, ctx: &TaskContext, log: &StageLog) -> Result<ScalingPlan> {
        let new_release = ctx.release(&request.new_release.guid).await?;
        let mut plan = ScalingPlan {
            upsize: vec![InstanceScalingEntry::new(
                new_release.guid.clone(),
                new_release.name.clone(),
                request.upsize_count,
                new_release.desired_instances,
            )],
            downsize: Vec::new(),
            unmap_routes_at_zero: !request.standard_blue_green,
        };

        if request.standard_blue_green && request.downsize_count == 0 {
            log.info("Blue-green deploy, previous releases are left to the route swap");
            return Ok(plan);
        }

        let releases = ctx
            .platform()
            .list_releases(&request.release_name_prefix)
            .await?;
        plan.downsize = distribute_downsize(
            &releases,
            &request.new_release,
            &request.release_name_prefix,
            request.downsize_count,
        );
        for entry in &plan.downsize {
            log.info(format!(
                "Planned downsize of {} from {} to {} instances",
                entry.name, entry.previous_count, entry.desired_count
            ));
        }
        Ok(plan)
    }
}

/// Spread `count` instance removals over running previous releases, newest first
fn distribute_downsize(
    releases: &[ReleaseSummary],
    new_release: &ReleaseInfo,
    prefix: &str,
    count: u32,
) -> Vec<InstanceScalingEntry> {
    let mut remaining = count;
    let mut entries = Vec::new();
    for release in releases.iter().rev() {
        if remaining == 0 {
            break;
        }
        if release.guid == new_release.guid
            || is_interim(&release.name, prefix)
            || release.running_instances == 0
        {
            continue;
        }
        let removed = remaining.min(release.running_instances);
        remaining -= removed;
        entries.push(InstanceScalingEntry::new(
            release.guid.clone(),
            release.name.clone(),
            release.running_instances - removed,
            release.running_instances,
        ));
    }
    entries
}

#[async_trait]
impl CommandHandler for StandardDeployHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::StandardDeploy
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::StandardDeploy(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::CheckExistingApps);
        let plan = close_stage(
            ctx,
            &log,
            self.plan(request, ctx, &log)
                .await
                .map_err(CommandFailure::from),
            "Scaling plan ready",
        )?;

        let output = ScalingCoordinator::new(ctx)
            .execute(&plan, request.resize_strategy)
            .await?;
        info!(
            release = %request.new_release.name,
            entries = output.instance_data.len(),
            "Standard deploy completed"
        );
        Ok(DeploymentOutput::Scaling(output))
    }
}

/// Restores the counts and routes a standard deploy changed
pub struct RollbackHandler;

impl RollbackHandler {
    /// Reverse the recorded plan against the live counts
    async fn plan(&self, request: &RollbackRequest, ctx: &TaskContext, log: &StageLog) -> Result<ScalingPlan> {
        let new_guid = request.new_release.as_ref().map(|r| &r.guid);
        let mut plan = ScalingPlan {
            unmap_routes_at_zero: !request.standard_blue_green,
            ..ScalingPlan::default()
        };

        for recorded in request.instance_data.iter().rev() {
            let Some(current) = ctx.platform().get_application_by_guid(&recorded.guid).await? else {
                log.warn(format!("Release {} no longer exists, skipping", recorded.name));
                continue;
            };
            let restored = recorded.previous_count;
            let entry = InstanceScalingEntry::new(
                current.guid.clone(),
                current.name.clone(),
                restored,
                current.desired_instances,
            );
            let both_zero = restored == 0 && current.desired_instances == 0;
            if restored > current.desired_instances || (both_zero && Some(&current.guid) != new_guid) {
                plan.upsize.push(entry);
            } else if restored < current.desired_instances {
                plan.downsize.push(entry);
            }
        }
        log.info(format!(
            "Rollback restores {} releases upward and {} downward",
            plan.upsize.len(),
            plan.downsize.len()
        ));
        Ok(plan)
    }

    /// Map the old active release's recorded routes back if they went missing
    async fn restore_routes(&self, active: &ReleaseInfo, ctx: &TaskContext, log: &StageLog) -> Result<()> {
        let current = ctx.release(&active.guid).await?;
        let recorded: RouteSet = active.attached_routes.iter().cloned().collect();
        let live: RouteSet = current.routes.iter().cloned().collect();
        if recorded.is_empty() || (!live.is_empty() && live.is_subset_of(&recorded)) {
            return Ok(());
        }
        RouteSwapCoordinator::new(ctx).map(&active.guid, &recorded, log).await
    }

    /// Delete the new release, resolved by GUID with a name fallback
    async fn delete_new_release(
        &self,
        request: &RollbackRequest,
        new_release: &ReleaseInfo,
        ctx: &TaskContext,
        log: &StageLog,
    ) -> Result<Option<String>> {
        let target = match ctx.platform().get_application_by_guid(&new_release.guid).await? {
            Some(detail) => detail.summary(),
            None => {
                let releases = ctx
                    .platform()
                    .list_releases(&request.release_name_prefix)
                    .await?;
                let matches: Vec<&ReleaseSummary> = releases
                    .iter()
                    .filter(|r| r.name.eq_ignore_ascii_case(&new_release.name))
                    .collect();
                match matches.as_slice() {
                    [] => {
                        log.info(format!("Release {} not found, nothing to delete", new_release.name));
                        return Ok(None);
                    }
                    [single] => (*single).clone(),
                    _ => {
                        warn!(release = %new_release.name, matches = matches.len(), "Ambiguous new release");
                        log.warn(format!(
                            "Found {} releases named {}, skipping delete",
                            matches.len(),
                            new_release.name
                        ));
                        return Ok(None);
                    }
                }
            }
        };

        if !target.routes.is_empty() {
            ctx.platform().unmap_routes(&target.guid, &target.routes).await?;
        }
        ctx.platform().delete_application(&target.guid).await?;
        log.info(format!("Deleted release {}", target.name));
        Ok(Some(target.name))
    }

    #[instrument(skip(self, request, ctx, log, output), fields(run_id = %ctx.run_id(), prefix = %request.release_name_prefix))]
    async fn finish(
        &self,
        request: &RollbackRequest,
        ctx: &TaskContext,
        log: &StageLog,
        output: &mut ScalingOutput,
    ) -> Result<()> {
        if let Some(active) = &request.active_release {
            self.restore_routes(active, ctx, log).await?;
        }
        if request.delete_new_release {
            let new_release = request.new_release.as_ref().ok_or_else(|| {
                DeploymentError::invalid_argument("delete_new_release is set without a new release")
            })?;
            if let Some(deleted) = self.delete_new_release(request, new_release, ctx, log).await? {
                output.deleted_releases.push(deleted);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for RollbackHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::Rollback
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::Rollback(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::Rollback);
        let plan = match self.plan(request, ctx, &log).await {
            Ok(plan) => plan,
            Err(e) => return close_stage(ctx, &log, Err(CommandFailure::from(e)), ""),
        };

        let mut output = match ScalingCoordinator::new(ctx)
            .execute(&plan, request.resize_strategy)
            .await
        {
            Ok(output) => output,
            Err(failure) => return close_stage(ctx, &log, Err(failure), ""),
        };

        match self.finish(request, ctx, &log, &mut output).await {
            Ok(()) => {
                log.finish(CommandStatus::Success, "Rollback completed");
                Ok(DeploymentOutput::Scaling(output))
            }
            Err(e) => close_stage(
                ctx,
                &log,
                Err(CommandFailure::with_partial(e, DeploymentOutput::Scaling(output))),
                "",
            ),
        }
    }
}
