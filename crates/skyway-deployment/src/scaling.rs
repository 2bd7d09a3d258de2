//! Instance scaling coordinator
//!
//! Executes a caller-supplied scaling plan. Every entry is resolved by GUID,
//! resized, and awaited until steady state or the run's timeout. Failures
//! are never retried; they abort the remaining entries and carry the
//! scaling data collected so far.

use crate::autoscaler::AutoscalerReconciler;
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::stage_log::{Stage, StageLog};
use skyway_types::{
    AppGuid, CommandStatus, DeploymentOutput, InstanceRecord, InstanceScalingEntry, ReleaseDetail,
    ResizeStrategy, ScalingOutput,
};
use std::collections::BTreeSet;
use tracing::{info, instrument};

/// Entries of one standard deploy or rollback
#[derive(Debug, Clone, Default)]
pub struct ScalingPlan {
    pub upsize: Vec<InstanceScalingEntry>,
    pub downsize: Vec<InstanceScalingEntry>,
    /// Unmap all routes of a release once it reaches zero instances
    pub unmap_routes_at_zero: bool,
}

impl ScalingPlan {
    pub fn is_empty(&self) -> bool {
        self.upsize.is_empty() && self.downsize.is_empty()
    }
}

/// Resizes releases in the order a [`ResizeStrategy`] asks for
pub struct ScalingCoordinator<'a> {
    ctx: &'a TaskContext,
}

impl<'a> ScalingCoordinator<'a> {
    pub fn new(ctx: &'a TaskContext) -> Self {
        Self { ctx }
    }

    /// Run both phases in the order `strategy` dictates.
    ///
    /// The second phase starts only after every resize of the first has
    /// reached steady state.
    #[instrument(skip(self, plan), fields(run_id = %self.ctx.run_id()))]
    pub async fn execute(
        &self,
        plan: &ScalingPlan,
        strategy: ResizeStrategy,
    ) -> std::result::Result<ScalingOutput, CommandFailure> {
        let mut output = ScalingOutput::default();

        let result = match strategy {
            ResizeStrategy::DownscaleOldFirst => {
                match self.downsize_phase(plan, &mut output).await {
                    Ok(()) => self.upsize_phase(plan, &mut output).await,
                    Err(e) => Err(e),
                }
            }
            ResizeStrategy::UpscaleNewFirst => match self.upsize_phase(plan, &mut output).await {
                Ok(()) => self.downsize_phase(plan, &mut output).await,
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => Ok(output),
            Err(e) => Err(CommandFailure::with_partial(e, DeploymentOutput::Scaling(output))),
        }
    }

    async fn upsize_phase(&self, plan: &ScalingPlan, output: &mut ScalingOutput) -> Result<()> {
        if plan.upsize.is_empty() {
            return Ok(());
        }
        let log = self.ctx.stage(Stage::Upsize);
        for entry in &plan.upsize {
            if let Err(e) = self.upsize(entry, &log, output).await {
                log.finish(CommandStatus::Failure, self.ctx.sanitize(&e.to_string()));
                return Err(e);
            }
        }
        log.finish(CommandStatus::Success, "Upsize completed");
        Ok(())
    }

    async fn downsize_phase(&self, plan: &ScalingPlan, output: &mut ScalingOutput) -> Result<()> {
        if plan.downsize.is_empty() {
            return Ok(());
        }
        let log = self.ctx.stage(Stage::Downsize);
        for entry in &plan.downsize {
            if let Err(e) = self
                .downsize(entry, plan.unmap_routes_at_zero, &log, output)
                .await
            {
                log.finish(CommandStatus::Failure, self.ctx.sanitize(&e.to_string()));
                return Err(e);
            }
        }
        log.finish(CommandStatus::Success, "Downsize completed");
        Ok(())
    }

    /// Grow a release and record every instance observed afterwards.
    ///
    /// Instances whose index was absent before the resize are flagged as upsized.
    /// A suspended autoscaler is re-enabled whether or not the resize succeeds.
    pub async fn upsize(
        &self,
        entry: &InstanceScalingEntry,
        log: &StageLog,
        output: &mut ScalingOutput,
    ) -> Result<ReleaseDetail> {
        let before = self.ctx.release(&entry.guid).await?;
        let known: BTreeSet<u32> = before.instances.iter().map(|i| i.index).collect();

        log.info(format!(
            "Upsizing {} from {} to {} instances",
            before.name, before.desired_instances, entry.desired_count
        ));
        let reconciler = AutoscalerReconciler::new(self.ctx);
        let mut snapshot = reconciler.suspend(&entry.guid, &before.name, log).await;

        let resized = self
            .ctx
            .bounded(
                &format!("upsize of {}", before.name),
                self.resize(&entry.guid, entry.desired_count),
            )
            .await;
        reconciler.restore(&mut snapshot, log).await;
        let after = resized?;

        output.new_instances.extend(after.instances.iter().map(|instance| InstanceRecord {
            release_name: after.name.clone(),
            guid: after.guid.clone(),
            index: instance.index,
            state: instance.state,
            is_upsize: !known.contains(&instance.index),
        }));
        output.instance_data.push(InstanceScalingEntry::new(
            after.guid.clone(),
            after.name.clone(),
            entry.desired_count,
            before.desired_instances,
        ));

        info!(
            release = %after.name,
            guid = %after.guid,
            running = after.running_instances(),
            "Upsize reached steady state"
        );
        log.info(format!(
            "{} now has {} running instances",
            after.name,
            after.running_instances()
        ));
        Ok(after)
    }

    /// Shrink a release and record the instances that remain.
    ///
    /// The autoscaler stays off on a release taken to zero; a failed resize
    /// re-enables it.
    pub async fn downsize(
        &self,
        entry: &InstanceScalingEntry,
        unmap_routes_at_zero: bool,
        log: &StageLog,
        output: &mut ScalingOutput,
    ) -> Result<ReleaseDetail> {
        let before = self.ctx.release(&entry.guid).await?;
        log.info(format!(
            "Downsizing {} from {} to {} instances",
            before.name, before.desired_instances, entry.desired_count
        ));

        let reconciler = AutoscalerReconciler::new(self.ctx);
        let mut snapshot = reconciler.suspend(&entry.guid, &before.name, log).await;

        let after = match self
            .ctx
            .bounded(
                &format!("downsize of {}", before.name),
                self.resize(&entry.guid, entry.desired_count),
            )
            .await
        {
            Ok(after) => after,
            Err(e) => {
                reconciler.restore(&mut snapshot, log).await;
                return Err(e);
            }
        };

        if after.desired_instances > 0 {
            reconciler.restore(&mut snapshot, log).await;
        }

        output.old_instances.extend(after.instances.iter().map(|instance| InstanceRecord {
            release_name: after.name.clone(),
            guid: after.guid.clone(),
            index: instance.index,
            state: instance.state,
            is_upsize: false,
        }));
        output.instance_data.push(InstanceScalingEntry::new(
            after.guid.clone(),
            after.name.clone(),
            entry.desired_count,
            before.desired_instances,
        ));

        if unmap_routes_at_zero && after.desired_instances == 0 && !after.routes.is_empty() {
            self.ctx
                .platform()
                .unmap_routes(&after.guid, &after.routes)
                .await?;
            log.info(format!("Unmapped routes {:?} from {}", after.routes, after.name));
        }

        info!(release = %after.name, guid = %after.guid, "Downsize reached steady state");
        Ok(after)
    }

    async fn resize(&self, guid: &AppGuid, instances: u32) -> Result<ReleaseDetail> {
        self.ctx
            .platform()
            .resize_application(guid, instances)
            .await
            .map_err(DeploymentError::from)
    }
}
