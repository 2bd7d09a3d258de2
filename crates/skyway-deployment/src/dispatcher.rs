//! Strategy Dispatcher - Entry point for deployment requests
//!
//! Selects the handler for a request variant, opens a platform session for
//! the request's connection, and runs the handler inside a per-run working
//! directory. The Wrapup stage runs on every path and removes that
//! directory.

use crate::artifact::{ArtifactResolver, LocalArtifactResolver};
use crate::config::EngineConfig;
use crate::context::{TaskContext, WorkingDirectory};
use crate::error::{CommandFailure, DeploymentError};
use crate::handlers::{create_handler, mismatch, CommandHandler, HandlerResult};
use crate::stage_log::{Stage, StageLog, StageLogSink};
use chrono::Utc;
use skyway_platform::{sanitize_message, PlatformConnector};
use skyway_types::{
    ArtifactDescriptor, CommandStatus, DeploymentRequest, DeploymentResponse, RequestKind, RunId,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Runs deployment requests against the platform
pub struct StrategyDispatcher {
    connector: Arc<dyn PlatformConnector>,
    sink: Arc<dyn StageLogSink>,
    artifacts: Arc<dyn ArtifactResolver>,
    config: EngineConfig,
}

impl StrategyDispatcher {
    /// Create a dispatcher resolving artifacts from the local filesystem
    pub fn new(connector: Arc<dyn PlatformConnector>, sink: Arc<dyn StageLogSink>, config: EngineConfig) -> Self {
        Self {
            connector,
            sink,
            artifacts: Arc::new(LocalArtifactResolver),
            config,
        }
    }

    /// Replace the artifact resolver
    pub fn with_artifact_resolver(mut self, artifacts: Arc<dyn ArtifactResolver>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a request with the handler of its own variant
    pub async fn dispatch(&self, request: &DeploymentRequest) -> DeploymentResponse {
        self.dispatch_as(request.kind(), request).await
    }

    /// Run a request with the handler registered for `kind`.
    ///
    /// A request of another variant fails with `InvalidArgument` before any
    /// platform session is opened.
    #[instrument(skip(self, request), fields(kind = %kind))]
    pub async fn dispatch_as(&self, kind: RequestKind, request: &DeploymentRequest) -> DeploymentResponse {
        let run_id = RunId::generate();
        let started_at = Utc::now();
        let secrets = request_secrets(request);
        let handler = create_handler(kind, self.artifacts.clone());

        let mut workspace = None;
        let result = if handler.kind() != request.kind() {
            Err(mismatch(kind, request))
        } else {
            match WorkingDirectory::create(self.config.working_dir_root.as_deref()) {
                Ok(dir) => {
                    let result = self
                        .run(handler.as_ref(), request, run_id, &secrets, dir.path())
                        .await;
                    workspace = Some(dir);
                    result
                }
                Err(e) => Err(CommandFailure::from(e)),
            }
        };

        self.wrapup(workspace);

        let secret_refs: Vec<&str> = secrets.iter().map(String::as_str).collect();
        let (status, error_message, error_kind, output) = match result {
            Ok(output) => (CommandStatus::Success, None, None, Some(output)),
            Err(failure) => (
                CommandStatus::Failure,
                Some(sanitize_message(&failure.error.to_string(), &secret_refs)),
                Some(failure.error.kind()),
                failure.partial,
            ),
        };

        info!(
            run_id = %run_id,
            kind = %kind,
            status = ?status,
            error_kind = ?error_kind,
            "Request finished"
        );

        DeploymentResponse {
            run_id,
            kind,
            status,
            error_message,
            error_kind,
            output,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run(
        &self,
        handler: &dyn CommandHandler,
        request: &DeploymentRequest,
        run_id: RunId,
        secrets: &[String],
        working_dir: &Path,
    ) -> HandlerResult {
        let header = request.header();
        let platform = self
            .connector
            .connect(&header.connection)
            .await
            .map_err(DeploymentError::from)?;

        let ctx = TaskContext::new(platform, self.sink.clone(), working_dir)
            .with_run_id(run_id)
            .with_config(self.config.clone())
            .with_timeout(header.timeout)
            .with_autoscaler(header.use_app_autoscaler)
            .with_secrets(secrets.to_vec());

        info!(
            run_id = %run_id,
            kind = %handler.kind(),
            endpoint = %header.connection.endpoint,
            space = %header.connection.space,
            "Dispatching request"
        );
        handler.execute(request, &ctx).await
    }

    fn wrapup(&self, workspace: Option<WorkingDirectory>) {
        let log = StageLog::open(self.sink.clone(), Stage::Wrapup);
        let Some(dir) = workspace else {
            log.finish(CommandStatus::Success, "No working directory to remove");
            return;
        };
        let path = dir.path().display().to_string();
        match dir.close() {
            Ok(()) => log.finish(
                CommandStatus::Success,
                format!("Removed working directory {}", path),
            ),
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to remove working directory");
                log.finish(
                    CommandStatus::Failure,
                    format!("Failed to remove working directory {}: {}", path, e),
                );
            }
        }
    }
}

/// Secrets carried by a request, scrubbed from every outgoing message
fn request_secrets(request: &DeploymentRequest) -> Vec<String> {
    let mut secrets: Vec<String> = request
        .header()
        .connection
        .secrets()
        .into_iter()
        .map(str::to_string)
        .collect();

    let artifact = match request {
        DeploymentRequest::BasicSetup(r) => Some(&r.artifact),
        DeploymentRequest::BlueGreenSetup(r) => Some(&r.artifact),
        DeploymentRequest::RollingDeploy(r) => Some(&r.artifact),
        DeploymentRequest::RollingRollback(r) => r.previous_artifact.as_ref(),
        _ => None,
    };
    if let Some(ArtifactDescriptor::Container {
        registry: Some(registry),
        ..
    }) = artifact
    {
        if !registry.password.is_empty() {
            secrets.push(registry.password.expose().to_string());
        }
    }
    secrets
}
