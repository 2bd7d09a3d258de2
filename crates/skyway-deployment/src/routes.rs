//! Route swap coordinator
//!
//! Go-live state machine:
//!
//! ```text
//! PRE_SWAP -> ROUTES_MOVED_TO_NEW -> ENV_MARKED_NEW_ACTIVE
//!          -> ROUTES_MOVED_FROM_OLD -> ENV_MARKED_OLD_INACTIVE -> DONE
//! ```
//!
//! Rollback branches on whether the swap occurred. There is no durable log
//! of a previous run, so the caller supplies that flag. Every release is
//! resolved by GUID before it is touched because names change mid-sequence.

use crate::context::TaskContext;
use crate::error::{DeploymentError, Result};
use crate::naming::{self, has_inactive_suffix};
use crate::scaling::ScalingCoordinator;
use crate::stage_log::{Stage, StageLog};
use skyway_types::{
    AppGuid, CommandStatus, InstanceScalingEntry, NamingStrategy, ReleaseInfo, RenameRecord,
    RouteSet, ScalingOutput, StatusMarker, SwapState,
};
use tracing::{info, instrument, warn};

/// Inputs of a forward swap
#[derive(Debug, Clone)]
pub struct SwapPlan {
    pub prefix: String,
    pub new_release: ReleaseInfo,
    /// Release serving `final_routes` before the swap
    pub existing: Option<ReleaseInfo>,
    /// INACTIVE release before this deployment
    pub inactive: Option<ReleaseInfo>,
    pub temp_routes: RouteSet,
    pub final_routes: RouteSet,
    pub naming: NamingStrategy,
    /// Tag the existing release INACTIVE once its routes moved
    pub mark_existing_inactive: bool,
}

/// Inputs of a swap rollback
#[derive(Debug, Clone)]
pub struct SwapRollbackPlan {
    pub prefix: String,
    pub new_release: ReleaseInfo,
    /// Release that was ACTIVE before the deployment, with its pre-swap name and routes
    pub active: Option<ReleaseInfo>,
    pub inactive: Option<ReleaseInfo>,
    pub temp_routes: RouteSet,
    pub final_routes: RouteSet,
    pub swap_occurred: bool,
    pub upsize_inactive: bool,
    pub delete_new_release: bool,
}

/// Progress reached by a forward swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapProgress {
    pub state: SwapState,
    pub renames: Vec<RenameRecord>,
}

impl Default for SwapProgress {
    fn default() -> Self {
        Self {
            state: SwapState::PreSwap,
            renames: Vec::new(),
        }
    }
}

/// What a rollback restored
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub restored_active: Option<ReleaseInfo>,
    pub renames: Vec<RenameRecord>,
    pub deleted_new_release: bool,
    pub scaling: ScalingOutput,
}

/// Moves routes, markers and names between the releases of one prefix.
///
/// Every platform call resolves its release by GUID first.
pub struct RouteSwapCoordinator<'a> {
    ctx: &'a TaskContext,
}

impl<'a> RouteSwapCoordinator<'a> {
    pub fn new(ctx: &'a TaskContext) -> Self {
        Self { ctx }
    }

    /// Map routes on a release resolved by GUID
    pub async fn map(&self, guid: &AppGuid, routes: &RouteSet, log: &StageLog) -> Result<()> {
        if routes.is_empty() {
            return Ok(());
        }
        let release = self.ctx.release(guid).await?;
        self.ctx
            .platform()
            .map_routes(guid, routes.as_slice())
            .await?;
        log.info(format!("Mapped routes {:?} to {}", routes.as_slice(), release.name));
        Ok(())
    }

    /// Unmap routes; routes not mapped on the release are ignored
    pub async fn unmap(&self, guid: &AppGuid, routes: &RouteSet, log: &StageLog) -> Result<()> {
        if routes.is_empty() {
            return Ok(());
        }
        let release = self.ctx.release(guid).await?;
        self.ctx
            .platform()
            .unmap_routes(guid, routes.as_slice())
            .await?;
        log.info(format!(
            "Unmapped routes {:?} from {}",
            routes.as_slice(),
            release.name
        ));
        Ok(())
    }

    /// Drive the forward swap, recording progress as each state is reached.
    ///
    /// The existing release is moved under `existing_log`, which the caller
    /// opened and closes once its own work on that release is done.
    #[instrument(skip(self, plan, progress, existing_log), fields(run_id = %self.ctx.run_id(), new_release = %plan.new_release.name))]
    pub async fn swap_forward(
        &self,
        plan: &SwapPlan,
        progress: &mut SwapProgress,
        existing_log: &StageLog,
    ) -> Result<()> {
        if plan.temp_routes.iter().any(|r| plan.final_routes.contains(r)) {
            return Err(DeploymentError::invalid_argument(
                "temp routes and final routes must be disjoint",
            ));
        }

        let platform = self.ctx.platform();
        let new_guid = &plan.new_release.guid;

        // Phase 1: New release takes the production routes
        let log = self.ctx.stage(Stage::SwapRoutesForNewApplication);
        let step = async {
            self.map(new_guid, &plan.final_routes, &log).await?;
            progress.state = SwapState::RoutesMovedToNew;
            self.unmap(new_guid, &plan.temp_routes, &log).await?;
            platform
                .set_status_marker(new_guid, StatusMarker::Active)
                .await?;
            log.info(format!("Marked {} ACTIVE", plan.new_release.name));
            progress.state = SwapState::EnvMarkedNewActive;
            Ok::<(), DeploymentError>(())
        };
        self.close_stage(&log, step.await)?;

        // Phase 2: Existing release moves onto the temporary routes
        let log = existing_log;
        let step = async {
            match &plan.existing {
                Some(existing) => {
                    self.map(&existing.guid, &plan.temp_routes, log).await?;
                    self.unmap(&existing.guid, &plan.final_routes, log).await?;
                    progress.state = SwapState::RoutesMovedFromOld;
                    if plan.mark_existing_inactive {
                        platform
                            .set_status_marker(&existing.guid, StatusMarker::Inactive)
                            .await?;
                        log.info(format!("Marked {} INACTIVE", existing.name));
                    }
                    progress.state = SwapState::EnvMarkedOldInactive;
                }
                None => {
                    log.info("No existing release to move off the production routes");
                    progress.state = SwapState::EnvMarkedOldInactive;
                }
            }
            Ok::<(), DeploymentError>(())
        };
        step.await?;

        // Phase 3: Production naming
        if plan.naming == NamingStrategy::ProductionName {
            let log = self.ctx.stage(Stage::RenameApplications);
            let result = self.rename_for_production(plan, &mut progress.renames, &log).await;
            self.close_stage(&log, result)?;
        }

        progress.state = SwapState::Done;
        info!(new_release = %plan.new_release.name, renames = progress.renames.len(), "Route swap completed");
        Ok(())
    }

    async fn rename_for_production(
        &self,
        plan: &SwapPlan,
        renames: &mut Vec<RenameRecord>,
        log: &StageLog,
    ) -> Result<()> {
        let prefix = plan.prefix.as_str();

        if let Some(inactive) = &plan.inactive {
            let current = self.ctx.release(&inactive.guid).await?;
            if has_inactive_suffix(&current.name, prefix) {
                let releases = self.ctx.platform().list_releases(prefix).await?;
                let versioned = naming::versioned_name(prefix, naming::next_revision(&releases, prefix));
                self.rename(&inactive.guid, &versioned, renames, log).await?;
            }
        }

        match &plan.existing {
            Some(existing) => {
                self.rename(&existing.guid, &naming::interim_name(prefix), renames, log)
                    .await?;
                self.rename(&plan.new_release.guid, prefix, renames, log).await?;
                self.rename(&existing.guid, &naming::inactive_name(prefix), renames, log)
                    .await?;
            }
            None => {
                self.rename(&plan.new_release.guid, prefix, renames, log).await?;
            }
        }
        Ok(())
    }

    /// Rename a release by GUID; a release already carrying `to` is left alone
    pub async fn rename(
        &self,
        guid: &AppGuid,
        to: &str,
        renames: &mut Vec<RenameRecord>,
        log: &StageLog,
    ) -> Result<()> {
        let current = self.ctx.release(guid).await?;
        if current.name == to {
            return Ok(());
        }
        self.ctx.platform().rename_application(guid, to).await?;
        log.info(format!("Renamed {} to {}", current.name, to));
        renames.push(RenameRecord {
            guid: guid.clone(),
            from: current.name,
            to: to.to_string(),
        });
        Ok(())
    }

    /// Restore the pre-deployment topology
    #[instrument(skip(self, plan), fields(run_id = %self.ctx.run_id(), swap_occurred = plan.swap_occurred))]
    pub async fn rollback(&self, plan: &SwapRollbackPlan) -> Result<RollbackOutcome> {
        let log = self.ctx.stage(Stage::Rollback);
        let result = self.rollback_inner(plan, &log).await;
        match &result {
            Ok(_) => log.finish(CommandStatus::Success, "Rollback completed"),
            Err(e) => log.finish(CommandStatus::Failure, self.ctx.sanitize(&e.to_string())),
        }
        result
    }

    async fn rollback_inner(&self, plan: &SwapRollbackPlan, log: &StageLog) -> Result<RollbackOutcome> {
        let platform = self.ctx.platform();
        let mut outcome = RollbackOutcome::default();

        // Names first; the recorded infos carry the pre-swap names
        self.rename(&plan.new_release.guid, &plan.new_release.name, &mut outcome.renames, log)
            .await?;
        if let Some(active) = &plan.active {
            self.rename(&active.guid, &active.name, &mut outcome.renames, log)
                .await?;
        }
        if let Some(inactive) = &plan.inactive {
            self.rename(&inactive.guid, &inactive.name, &mut outcome.renames, log)
                .await?;
        }

        let new_guid = &plan.new_release.guid;
        if plan.swap_occurred {
            log.info("Swap occurred, restoring routes");
            if let Some(active) = &plan.active {
                self.restore_routes(active, &plan.final_routes, log).await?;
                platform
                    .set_status_marker(&active.guid, StatusMarker::Active)
                    .await?;
            }
            if let Some(inactive) = &plan.inactive {
                let recorded: RouteSet = inactive.attached_routes.iter().cloned().collect();
                self.map(&inactive.guid, &recorded, log).await?;
            }
            self.unmap(new_guid, &plan.final_routes, log).await?;
            self.unmap(new_guid, &plan.temp_routes, log).await?;
            log.info(format!("Stripped routes from {}", plan.new_release.name));
        } else {
            log.info("Swap did not occur, routes are untouched");
        }

        // Setup tagged the new release INACTIVE whether or not the swap ran
        platform.unset_status_marker(new_guid).await?;
        log.info(format!("Removed status marker from {}", plan.new_release.name));

        if let Some(inactive) = &plan.inactive {
            platform
                .set_status_marker(&inactive.guid, StatusMarker::Inactive)
                .await?;
            log.info(format!("Restored INACTIVE marker on {}", inactive.name));
        }

        let scaling = ScalingCoordinator::new(self.ctx);
        if let Some(active) = &plan.active {
            let current = self.ctx.release(&active.guid).await?;
            if current.running_instances() < active.running_count {
                let entry = InstanceScalingEntry::new(
                    active.guid.clone(),
                    current.name.clone(),
                    active.running_count,
                    current.desired_instances,
                );
                scaling.upsize(&entry, log, &mut outcome.scaling).await?;
            }
            outcome.restored_active = Some(ReleaseInfo::from_detail(&self.ctx.release(&active.guid).await?));
        }

        if plan.upsize_inactive {
            if let Some(inactive) = &plan.inactive {
                let current = self.ctx.release(&inactive.guid).await?;
                if current.desired_instances != inactive.running_count {
                    let entry = InstanceScalingEntry::new(
                        inactive.guid.clone(),
                        current.name.clone(),
                        inactive.running_count,
                        current.desired_instances,
                    );
                    scaling.upsize(&entry, log, &mut outcome.scaling).await?;
                }
            }
        }

        if plan.delete_new_release {
            outcome.deleted_new_release = self.retire(&plan.new_release, log, &mut outcome.scaling).await?;
        }

        Ok(outcome)
    }

    /// Rebuild the routes of a release in their recorded order, followed by
    /// any final route it did not carry. Routes past the first position that
    /// differs are unmapped and mapped again.
    async fn restore_routes(&self, release: &ReleaseInfo, final_routes: &RouteSet, log: &StageLog) -> Result<()> {
        let mut target = release.attached_routes.clone();
        for route in final_routes.iter() {
            if !target.contains(route) {
                target.push(route.clone());
            }
        }

        let current = self.ctx.release(&release.guid).await?.routes;
        let in_place = current
            .iter()
            .zip(&target)
            .take_while(|(live, wanted)| live == wanted)
            .count();
        let stale: RouteSet = current[in_place..].iter().cloned().collect();
        let missing: RouteSet = target[in_place..].iter().cloned().collect();
        self.unmap(&release.guid, &stale, log).await?;
        self.map(&release.guid, &missing, log).await
    }

    /// Downsize the new release to zero and delete it
    async fn retire(&self, release: &ReleaseInfo, log: &StageLog, scaling: &mut ScalingOutput) -> Result<bool> {
        let current = match self.ctx.platform().get_application_by_guid(&release.guid).await? {
            Some(current) => current,
            None => {
                warn!(release = %release.name, "New release already gone");
                log.warn(format!("Release {} no longer exists", release.name));
                return Ok(false);
            }
        };
        if current.desired_instances > 0 {
            let entry = InstanceScalingEntry::new(
                release.guid.clone(),
                current.name.clone(),
                0,
                current.desired_instances,
            );
            ScalingCoordinator::new(self.ctx)
                .downsize(&entry, true, log, scaling)
                .await?;
        }
        self.ctx.platform().delete_application(&release.guid).await?;
        log.info(format!("Deleted release {}", current.name));
        Ok(true)
    }

    fn close_stage(&self, log: &StageLog, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => log.finish(CommandStatus::Success, format!("{} completed", log.stage())),
            Err(e) => log.finish(CommandStatus::Failure, self.ctx.sanitize(&e.to_string())),
        }
        result
    }
}
