//! Retention pruner
//!
//! Keeps the most recent `older_versions_to_keep` releases downsized to zero
//! for fast rollback and deletes everything older. Interim leftovers are
//! always deleted; ACTIVE and INACTIVE releases are never touched. Route
//! removal and downsizing are retried, deletion is attempted once since the
//! platform may have acted on a delete it reported as failed. Exhausted
//! cleanups are logged with a remediation message and swallowed.

use crate::autoscaler::AutoscalerReconciler;
use crate::context::TaskContext;
use crate::error::{DeploymentError, Result};
use crate::naming::is_interim;
use crate::retry::{remediation_message, RetryExecutor};
use crate::stage_log::StageLog;
use skyway_types::{AppGuid, PruneReport, ReleaseSummary};
use tracing::{error, info, instrument};

/// What the pruner decided for one release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneAction {
    Protect,
    Downsize,
    Delete,
}

/// Plan retention actions, oldest first, without touching the platform
pub fn plan_retention<'r>(
    releases: &'r [ReleaseSummary],
    protected: &[&AppGuid],
    prefix: &str,
    keep: u32,
) -> Vec<(&'r ReleaseSummary, PruneAction)> {
    let prunable = releases
        .iter()
        .filter(|r| !is_interim(&r.name, prefix) && !protected.contains(&&r.guid))
        .count();
    let delete_below = prunable.saturating_sub(keep as usize);

    let mut seen = 0usize;
    releases
        .iter()
        .map(|release| {
            let action = if is_interim(&release.name, prefix) {
                PruneAction::Delete
            } else if protected.contains(&&release.guid) {
                PruneAction::Protect
            } else {
                seen += 1;
                if seen <= delete_below {
                    PruneAction::Delete
                } else {
                    PruneAction::Downsize
                }
            };
            (release, action)
        })
        .collect()
}

/// Applies [`plan_retention`] to the platform, reporting instead of failing
pub struct RetentionPruner<'a> {
    ctx: &'a TaskContext,
    retry: RetryExecutor,
}

impl<'a> RetentionPruner<'a> {
    /// Pruner using the context's retry policy
    pub fn new(ctx: &'a TaskContext) -> Self {
        Self {
            ctx,
            retry: RetryExecutor::new(ctx.config().retry.clone()),
        }
    }

    /// Prune the prefix's previous releases. Never fails.
    #[instrument(skip(self, releases, protected, log), fields(run_id = %self.ctx.run_id()))]
    pub async fn prune(
        &self,
        releases: &[ReleaseSummary],
        protected: &[&AppGuid],
        prefix: &str,
        keep: u32,
        log: &StageLog,
    ) -> PruneReport {
        let mut report = PruneReport::default();

        for (release, action) in plan_retention(releases, protected, prefix, keep) {
            match action {
                PruneAction::Protect => {
                    log.info(format!("Keeping {} untouched", release.name));
                }
                PruneAction::Downsize => {
                    if self.downsize(release, log).await {
                        report.downsized.push(release.name.clone());
                    } else {
                        report.failed.push(release.name.clone());
                    }
                }
                PruneAction::Delete => {
                    if self.delete(release, log).await {
                        report.deleted.push(release.name.clone());
                    } else {
                        report.failed.push(release.name.clone());
                    }
                }
            }
        }

        info!(
            prefix = %prefix,
            deleted = report.deleted.len(),
            downsized = report.downsized.len(),
            failed = report.failed.len(),
            "Retention pruning finished"
        );
        report
    }

    async fn downsize(&self, release: &ReleaseSummary, log: &StageLog) -> bool {
        log.info(format!("Downsizing old release {} to 0 instances", release.name));

        if !self.unmap_all(release, log).await {
            return false;
        }

        AutoscalerReconciler::new(self.ctx)
            .suspend(&release.guid, &release.name, log)
            .await;

        if release.desired_instances == 0 && release.running_instances == 0 {
            return true;
        }

        self.retry
            .run_best_effort("downsize", &release.name, log, || async {
                self.ctx
                    .bounded(
                        &format!("downsize of {}", release.name),
                        async {
                            self.ctx
                                .platform()
                                .resize_application(&release.guid, 0)
                                .await
                                .map_err(DeploymentError::from)
                        },
                    )
                    .await
            })
            .await
            .is_some()
    }

    async fn delete(&self, release: &ReleaseSummary, log: &StageLog) -> bool {
        log.info(format!("Deleting old release {}", release.name));

        if !self.unmap_all(release, log).await {
            return false;
        }

        match self.ctx.platform().delete_application(&release.guid).await {
            Ok(()) => true,
            Err(e) => {
                let message = self.ctx.sanitize(&e.to_string());
                error!(release = %release.name, error = %message, "Delete of old release failed");
                log.error(remediation_message("delete", &release.name, 1));
                false
            }
        }
    }

    async fn unmap_all(&self, release: &ReleaseSummary, log: &StageLog) -> bool {
        if release.routes.is_empty() {
            return true;
        }
        self.retry
            .run_best_effort("unmap routes of", &release.name, log, || async {
                self.unmap(&release.guid, &release.routes).await
            })
            .await
            .is_some()
    }

    async fn unmap(&self, guid: &AppGuid, routes: &[String]) -> Result<()> {
        self.ctx.platform().unmap_routes(guid, routes).await?;
        Ok(())
    }
}
