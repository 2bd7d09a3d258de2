//! Autoscaler reconciler
//!
//! Disables an attached autoscaler before a resize or route swap touches a
//! release and re-enables it afterwards, only when it was enabled to begin
//! with. Every toggle is best-effort.

use crate::context::TaskContext;
use crate::stage_log::StageLog;
use skyway_types::AppGuid;
use tracing::{debug, warn};

/// Autoscaler state captured before a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalerSnapshot {
    pub guid: AppGuid,
    pub release_name: String,
    pub was_enabled: bool,
    /// State the platform should currently be in
    pub expected_enabled: bool,
}

impl AutoscalerSnapshot {
    /// Snapshot for a release known to carry no autoscaler
    pub fn detached(guid: AppGuid, release_name: impl Into<String>) -> Self {
        Self {
            guid,
            release_name: release_name.into(),
            was_enabled: false,
            expected_enabled: false,
        }
    }
}

/// Best-effort autoscaler toggling around a mutation
pub struct AutoscalerReconciler<'a> {
    ctx: &'a TaskContext,
}

impl<'a> AutoscalerReconciler<'a> {
    pub fn new(ctx: &'a TaskContext) -> Self {
        Self { ctx }
    }

    /// Query the current state. A failed query counts as disabled.
    pub async fn snapshot(&self, guid: &AppGuid, release_name: &str, log: &StageLog) -> AutoscalerSnapshot {
        if !self.ctx.use_autoscaler() {
            return AutoscalerSnapshot::detached(guid.clone(), release_name);
        }

        let enabled = match self.ctx.platform().is_autoscaler_enabled(guid).await {
            Ok(enabled) => enabled,
            Err(e) => {
                let message = self.ctx.sanitize(&e.to_string());
                warn!(release = %release_name, guid = %guid, error = %message, "Autoscaler query failed, assuming disabled");
                log.warn(format!(
                    "Could not read autoscaler state of {}, assuming disabled: {}",
                    release_name, message
                ));
                false
            }
        };

        debug!(release = %release_name, enabled = enabled, "Autoscaler snapshot");
        AutoscalerSnapshot {
            guid: guid.clone(),
            release_name: release_name.to_string(),
            was_enabled: enabled,
            expected_enabled: enabled,
        }
    }

    /// Disable the autoscaler if the snapshot says it is on
    pub async fn disable(&self, snapshot: &mut AutoscalerSnapshot, log: &StageLog) {
        if !snapshot.expected_enabled {
            return;
        }
        match self
            .ctx
            .platform()
            .set_autoscaler_enabled(&snapshot.guid, false)
            .await
        {
            Ok(()) => {
                snapshot.expected_enabled = false;
                log.info(format!("Disabled autoscaler of {}", snapshot.release_name));
            }
            Err(e) => {
                let message = self.ctx.sanitize(&e.to_string());
                warn!(release = %snapshot.release_name, error = %message, "Failed to disable autoscaler");
                log.warn(format!(
                    "Failed to disable autoscaler of {}, continuing: {}",
                    snapshot.release_name, message
                ));
            }
        }
    }

    /// Re-enable an autoscaler this run disabled
    pub async fn restore(&self, snapshot: &mut AutoscalerSnapshot, log: &StageLog) {
        if !snapshot.was_enabled || snapshot.expected_enabled {
            return;
        }
        match self
            .ctx
            .platform()
            .set_autoscaler_enabled(&snapshot.guid, true)
            .await
        {
            Ok(()) => {
                snapshot.expected_enabled = true;
                log.info(format!("Re-enabled autoscaler of {}", snapshot.release_name));
            }
            Err(e) => {
                let message = self.ctx.sanitize(&e.to_string());
                warn!(release = %snapshot.release_name, error = %message, "Failed to re-enable autoscaler");
                log.warn(format!(
                    "Failed to re-enable autoscaler of {}: {}",
                    snapshot.release_name, message
                ));
            }
        }
    }

    /// Snapshot and disable in one step
    pub async fn suspend(&self, guid: &AppGuid, release_name: &str, log: &StageLog) -> AutoscalerSnapshot {
        let mut snapshot = self.snapshot(guid, release_name, log).await;
        self.disable(&mut snapshot, log).await;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage_log::{MemoryLogSink, Stage};
    use skyway_platform::{FaultRule, InMemoryPlatform, PlatformOperation, TargetPlatform};
    use std::sync::Arc;

    fn context(platform: &InMemoryPlatform, enabled: bool) -> (TaskContext, Arc<MemoryLogSink>) {
        let sink = Arc::new(MemoryLogSink::new());
        let ctx = TaskContext::new(Arc::new(platform.clone()), sink.clone(), "/tmp")
            .with_autoscaler(enabled);
        (ctx, sink)
    }

    fn toggles(platform: &InMemoryPlatform) -> usize {
        platform
            .calls()
            .iter()
            .filter(|c| c.operation == PlatformOperation::ToggleAutoscaler)
            .count()
    }

    #[tokio::test]
    async fn test_suspend_and_restore_enabled_autoscaler() {
        let platform = InMemoryPlatform::new();
        let guid = platform.seed_release("app__1", 2, &[]);
        platform.attach_autoscaler(&guid, true);
        let (ctx, _) = context(&platform, true);
        let log = ctx.stage(Stage::Downsize);
        let reconciler = AutoscalerReconciler::new(&ctx);

        let mut snapshot = reconciler.suspend(&guid, "app__1", &log).await;
        assert!(snapshot.was_enabled);
        assert!(!snapshot.expected_enabled);
        assert!(!platform.is_autoscaler_enabled(&guid).await.unwrap());

        reconciler.restore(&mut snapshot, &log).await;
        reconciler.restore(&mut snapshot, &log).await;
        assert!(platform.is_autoscaler_enabled(&guid).await.unwrap());
        assert_eq!(toggles(&platform), 2);
    }

    #[tokio::test]
    async fn test_disabled_autoscaler_is_never_toggled() {
        let platform = InMemoryPlatform::new();
        let guid = platform.seed_release("app__1", 2, &[]);
        platform.attach_autoscaler(&guid, false);
        let (ctx, _) = context(&platform, true);
        let log = ctx.stage(Stage::Upsize);
        let reconciler = AutoscalerReconciler::new(&ctx);

        let mut snapshot = reconciler.suspend(&guid, "app__1", &log).await;
        reconciler.restore(&mut snapshot, &log).await;
        assert_eq!(toggles(&platform), 0);
    }

    #[tokio::test]
    async fn test_failed_query_fails_open() {
        let platform = InMemoryPlatform::new();
        let guid = platform.seed_release("app__1", 2, &[]);
        platform.attach_autoscaler(&guid, true);
        platform.inject_fault(FaultRule::new(PlatformOperation::QueryAutoscaler, "503"));
        let (ctx, sink) = context(&platform, true);
        let log = ctx.stage(Stage::Upsize);

        let snapshot = AutoscalerReconciler::new(&ctx).suspend(&guid, "app__1", &log).await;
        assert!(!snapshot.was_enabled);
        assert_eq!(toggles(&platform), 0);
        assert!(sink.messages(Stage::Upsize)[0].contains("assuming disabled"));
    }

    #[tokio::test]
    async fn test_failed_disable_does_not_abort() {
        let platform = InMemoryPlatform::new();
        let guid = platform.seed_release("app__1", 2, &[]);
        platform.attach_autoscaler(&guid, true);
        platform.inject_fault(FaultRule::new(PlatformOperation::ToggleAutoscaler, "denied"));
        let (ctx, _) = context(&platform, true);
        let log = ctx.stage(Stage::Downsize);
        let reconciler = AutoscalerReconciler::new(&ctx);

        let mut snapshot = reconciler.suspend(&guid, "app__1", &log).await;
        assert!(snapshot.expected_enabled);
        reconciler.restore(&mut snapshot, &log).await;
        assert!(platform.is_autoscaler_enabled(&guid).await.unwrap());
    }

    #[tokio::test]
    async fn test_skipped_when_header_disables_autoscaler() {
        let platform = InMemoryPlatform::new();
        let guid = platform.seed_release("app__1", 2, &[]);
        platform.attach_autoscaler(&guid, true);
        let (ctx, _) = context(&platform, false);
        let log = ctx.stage(Stage::Downsize);

        let snapshot = AutoscalerReconciler::new(&ctx).suspend(&guid, "app__1", &log).await;
        assert!(!snapshot.was_enabled);
        assert!(platform.calls().is_empty());
    }
}
