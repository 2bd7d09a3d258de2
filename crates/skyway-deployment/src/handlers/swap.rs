//! Go-live route swap and swap rollback
//!
//! A failed forward swap is rolled back in place before the failure is
//! returned, so the caller never sees production routes split across two
//! releases.

use super::{mismatch, CommandHandler, HandlerResult};
use crate::autoscaler::AutoscalerReconciler;
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::routes::{RouteSwapCoordinator, SwapPlan, SwapProgress, SwapRollbackPlan};
use crate::scaling::ScalingCoordinator;
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_types::{
    CommandStatus, DeploymentOutput, DeploymentRequest, InstanceScalingEntry, ReleaseDetail,
    ReleaseInfo, RequestKind, ScalingOutput, SwapRollbackOutput, SwapRollbackRequest, SwapRouteRequest,
    SwapRoutesOutput, SwapState,
};
use tracing::{error, info, instrument, warn};

/// Go-live route swap, rolled back in place on failure
pub struct SwapRouteHandler;

impl SwapRouteHandler {
    #[instrument(skip(self, request, ctx), fields(run_id = %ctx.run_id(), new_release = %request.new_release.name))]
    async fn run(&self, request: &SwapRouteRequest, ctx: &TaskContext) -> HandlerResult {
        if request.final_routes.is_empty() {
            return Err(DeploymentError::invalid_argument("final routes must not be empty").into());
        }

        let plan = SwapPlan {
            prefix: request.release_name_prefix.clone(),
            new_release: request.new_release.clone(),
            existing: request.existing_release.clone(),
            inactive: request.inactive_release.clone(),
            temp_routes: request.temp_routes.clone(),
            final_routes: request.final_routes.clone(),
            naming: request.naming,
            mark_existing_inactive: true,
        };

        // One stage covers every step taken on the existing release
        let reconciler = AutoscalerReconciler::new(ctx);
        let existing_log = ctx.stage(Stage::SwapRoutesForExistingApplication);
        let mut snapshot = match &request.existing_release {
            Some(existing) => Some(reconciler.suspend(&existing.guid, &existing.name, &existing_log).await),
            None => None,
        };

        let coordinator = RouteSwapCoordinator::new(ctx);
        let mut progress = SwapProgress::default();
        if let Err(e) = coordinator.swap_forward(&plan, &mut progress, &existing_log).await {
            if let Some(snapshot) = snapshot.as_mut() {
                reconciler.restore(snapshot, &existing_log).await;
            }
            if progress.state >= SwapState::EnvMarkedNewActive || snapshot.is_some() {
                existing_log.finish(CommandStatus::Failure, ctx.sanitize(&e.to_string()));
            }
            return Err(self.roll_back_in_place(request, ctx, progress, e).await);
        }

        if !request.downsize_old_release {
            if let Some(snapshot) = snapshot.as_mut() {
                reconciler.restore(snapshot, &existing_log).await;
            }
        }
        existing_log.finish(
            CommandStatus::Success,
            format!("{} completed", Stage::SwapRoutesForExistingApplication),
        );

        if let Some(existing) = &request.existing_release {
            if request.downsize_old_release {
                let log = ctx.stage(Stage::Downsize);
                match downsize_to_zero(ctx, existing, &log).await {
                    Ok(_) => log.finish(CommandStatus::Success, "Downsize completed"),
                    Err(e) => {
                        log.finish(CommandStatus::Failure, ctx.sanitize(&e.to_string()));
                        let partial = self.output(ctx, request, &progress).await;
                        return Err(CommandFailure::with_partial(e, DeploymentOutput::SwapRoutes(partial)));
                    }
                }
            }
        }

        info!(new_release = %request.new_release.name, state = ?progress.state, "Swap completed");
        Ok(DeploymentOutput::SwapRoutes(
            self.output(ctx, request, &progress).await,
        ))
    }

    /// Restore the pre-swap topology after a failed forward swap
    async fn roll_back_in_place(
        &self,
        request: &SwapRouteRequest,
        ctx: &TaskContext,
        progress: SwapProgress,
        cause: DeploymentError,
    ) -> CommandFailure {
        warn!(
            new_release = %request.new_release.name,
            state = ?progress.state,
            error = %ctx.sanitize(&cause.to_string()),
            "Swap failed, rolling back in place"
        );
        let plan = SwapRollbackPlan {
            prefix: request.release_name_prefix.clone(),
            new_release: request.new_release.clone(),
            active: request.existing_release.clone(),
            inactive: request.inactive_release.clone(),
            temp_routes: request.temp_routes.clone(),
            final_routes: request.final_routes.clone(),
            swap_occurred: progress.state.swap_occurred(),
            upsize_inactive: false,
            delete_new_release: false,
        };
        let mut renames = progress.renames.clone();
        let rolled_back = match RouteSwapCoordinator::new(ctx).rollback(&plan).await {
            Ok(outcome) => {
                renames.extend(outcome.renames);
                true
            }
            Err(e) => {
                error!(error = %ctx.sanitize(&e.to_string()), "In-place rollback failed");
                false
            }
        };

        let partial = SwapRoutesOutput {
            state: progress.state,
            new_release: request.new_release.clone(),
            previous_release: request.existing_release.clone(),
            renames,
            rolled_back,
        };
        CommandFailure::with_partial(cause, DeploymentOutput::SwapRoutes(partial))
    }

    async fn output(
        &self,
        ctx: &TaskContext,
        request: &SwapRouteRequest,
        progress: &SwapProgress,
    ) -> SwapRoutesOutput {
        let new_release = refreshed(ctx, &request.new_release).await;
        let previous_release = match &request.existing_release {
            Some(existing) => Some(refreshed(ctx, existing).await),
            None => None,
        };
        SwapRoutesOutput {
            state: progress.state,
            new_release,
            previous_release,
            renames: progress.renames.clone(),
            rolled_back: false,
        }
    }
}

/// Take the old release out of service, keeping its routes
async fn downsize_to_zero(ctx: &TaskContext, existing: &ReleaseInfo, log: &StageLog) -> Result<ReleaseDetail> {
    let current = ctx.release(&existing.guid).await?;
    let entry = InstanceScalingEntry::new(
        existing.guid.clone(),
        current.name.clone(),
        0,
        current.desired_instances,
    );
    ScalingCoordinator::new(ctx)
        .downsize(&entry, false, log, &mut ScalingOutput::default())
        .await
}

/// Live view of a release, or the recorded one if the lookup fails
async fn refreshed(ctx: &TaskContext, recorded: &ReleaseInfo) -> ReleaseInfo {
    match ctx.release(&recorded.guid).await {
        Ok(detail) => ReleaseInfo::from_detail(&detail).with_autoscaler(recorded.autoscaler_enabled),
        Err(_) => recorded.clone(),
    }
}

#[async_trait]
impl CommandHandler for SwapRouteHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::SwapRoute
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::SwapRoute(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        self.run(request, ctx).await
    }
}

pub struct SwapRollbackHandler;

#[async_trait]
impl CommandHandler for SwapRollbackHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::SwapRollback
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::SwapRollback(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let plan = rollback_plan(request);
        let outcome = RouteSwapCoordinator::new(ctx).rollback(&plan).await?;
        Ok(DeploymentOutput::SwapRollback(SwapRollbackOutput {
            restored_active: outcome.restored_active,
            renames: outcome.renames,
            deleted_new_release: outcome.deleted_new_release,
        }))
    }
}

fn rollback_plan(request: &SwapRollbackRequest) -> SwapRollbackPlan {
    SwapRollbackPlan {
        prefix: request.release_name_prefix.clone(),
        new_release: request.new_release.clone(),
        active: request.active_release.clone(),
        inactive: request.inactive_release.clone(),
        temp_routes: request.temp_routes.clone(),
        final_routes: request.final_routes.clone(),
        swap_occurred: request.swap_occurred,
        upsize_inactive: request.upsize_inactive_release,
        delete_new_release: request.delete_new_release,
    }
}
