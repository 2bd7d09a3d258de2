//! Platform CLI plugin runs

use super::{close_stage, mismatch, CommandHandler, HandlerResult};
use crate::context::TaskContext;
use crate::error::{CommandFailure, DeploymentError, Result};
use crate::stage_log::{Stage, StageLog};
use async_trait::async_trait;
use skyway_platform::PluginScript;
use skyway_types::{
    DeploymentOutput, DeploymentRequest, PluginFile, RequestKind, RunPluginOutput,
    RunPluginRequest,
};
use std::path::{Component, Path, PathBuf};
use tracing::{info, instrument};

/// Placeholder replaced with the working directory before a run
pub const REPO_ROOT_PLACEHOLDER: &str = "${service.manifest.repoRoot}";

pub struct RunPluginHandler;

impl RunPluginHandler {
    async fn write_files(&self, files: &[PluginFile], root: &Path, log: &StageLog) -> Result<()> {
        for file in files {
            let target = relative_target(root, &file.path)?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, file.content.as_bytes()).await?;
            log.info(format!("Wrote {}", file.path));
        }
        Ok(())
    }

    #[instrument(skip(self, request, ctx, log), fields(run_id = %ctx.run_id()))]
    async fn run(
        &self,
        request: &RunPluginRequest,
        ctx: &TaskContext,
        log: &StageLog,
    ) -> std::result::Result<RunPluginOutput, CommandFailure> {
        self.write_files(&request.files, ctx.working_dir(), log).await?;

        let script = request
            .script
            .replace(REPO_ROOT_PLACEHOLDER, &ctx.working_dir().display().to_string());
        log.info(format!("Running plugin script:\n{}", ctx.sanitize(&script)));

        let outcome = ctx
            .bounded("plugin script", async {
                ctx.platform()
                    .run_plugin(&PluginScript {
                        script,
                        working_dir: ctx.working_dir().to_path_buf(),
                    })
                    .await
                    .map_err(DeploymentError::from)
            })
            .await?;

        let output = RunPluginOutput {
            exit_code: outcome.exit_code,
            output: ctx.sanitize(&outcome.output),
        };
        if !output.output.is_empty() {
            log.info(output.output.clone());
        }
        info!(exit_code = output.exit_code, "Plugin script finished");

        if output.exit_code != 0 {
            let error = DeploymentError::PlatformApi(format!(
                "plugin script exited with code {}",
                output.exit_code
            ));
            return Err(CommandFailure::with_partial(error, DeploymentOutput::RunPlugin(output)));
        }
        Ok(output)
    }
}

/// Resolve a caller-supplied path inside the working directory
fn relative_target(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(DeploymentError::invalid_argument(format!(
            "plugin file path {} must stay inside the working directory",
            path
        )));
    }
    Ok(root.join(relative))
}

#[async_trait]
impl CommandHandler for RunPluginHandler {
    fn kind(&self) -> RequestKind {
        RequestKind::RunPlugin
    }

    async fn execute(&self, request: &DeploymentRequest, ctx: &TaskContext) -> HandlerResult {
        let DeploymentRequest::RunPlugin(request) = request else {
            return Err(mismatch(self.kind(), request));
        };
        let log = ctx.stage(Stage::RunPluginScript);
        let result = self
            .run(request, ctx, &log)
            .await
            .map(DeploymentOutput::RunPlugin);
        close_stage(ctx, &log, result, "Plugin script completed")
    }
}
