//! Task Context - Execution environment for one orchestration run
//!
//! Bridges the strategy handlers and the target platform. It holds the
//! platform session, the staged log sink, the steady-state timeout and the
//! run's working directory.

use crate::config::EngineConfig;
use crate::error::{DeploymentError, Result};
use crate::stage_log::{Stage, StageLog, StageLogSink};
use skyway_platform::{sanitize_message, TargetPlatform};
use skyway_types::{AppGuid, ReleaseDetail, RunId};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Per-run working directory, removed on [`WorkingDirectory::close`] or drop
pub struct WorkingDirectory {
    dir: TempDir,
}

impl WorkingDirectory {
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("skyway-run-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

/// Context handed to every handler
pub struct TaskContext {
    run_id: RunId,
    platform: Arc<dyn TargetPlatform>,
    sink: Arc<dyn StageLogSink>,
    config: EngineConfig,
    timeout: Duration,
    use_autoscaler: bool,
    working_dir: PathBuf,
    secrets: Vec<String>,
}

impl TaskContext {
    pub fn new(
        platform: Arc<dyn TargetPlatform>,
        sink: Arc<dyn StageLogSink>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run_id: RunId::generate(),
            platform,
            sink,
            config: EngineConfig::default(),
            timeout: Duration::from_secs(600),
            use_autoscaler: false,
            working_dir: working_dir.into(),
            secrets: Vec::new(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_autoscaler(mut self, enabled: bool) -> Self {
        self.use_autoscaler = enabled;
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn platform(&self) -> &dyn TargetPlatform {
        self.platform.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Upper bound of each steady-state wait
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn use_autoscaler(&self) -> bool {
        self.use_autoscaler
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Open a named stage of the staged log
    pub fn stage(&self, stage: Stage) -> StageLog {
        StageLog::open(self.sink.clone(), stage)
    }

    /// Scrub secrets known to this run from a message
    pub fn sanitize(&self, message: &str) -> String {
        let secrets: Vec<&str> = self.secrets.iter().map(String::as_str).collect();
        sanitize_message(message, &secrets)
    }

    /// Resolve a release by its immutable GUID
    pub async fn release(&self, guid: &AppGuid) -> Result<ReleaseDetail> {
        self.platform
            .get_application_by_guid(guid)
            .await?
            .ok_or_else(|| {
                DeploymentError::PlatformApi(format!("Application with guid {} not found", guid))
            })
    }

    /// Bound a blocking platform call by the run's steady-state timeout
    pub async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DeploymentError::timeout(operation, self.timeout)),
        }
    }
}
