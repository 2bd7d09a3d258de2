//! Dry runs against a simulated foundation

use anyhow::{Context, Result};
use skyway_deployment::{EngineConfig, StrategyDispatcher, TracingLogSink};
use skyway_platform::{FoundationSnapshot, InMemoryPlatform};
use skyway_types::{DeploymentRequest, DeploymentResponse};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Arguments of `skyway run`
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// JSON request document
    #[arg(short, long)]
    pub request: PathBuf,

    /// JSON foundation snapshot to seed the simulation with
    #[arg(short, long)]
    pub state: Option<PathBuf>,

    /// Write the resulting foundation snapshot back to this file
    #[arg(short, long)]
    pub write_state: Option<PathBuf>,
}

/// Run a request and print the response. Returns whether it succeeded.
pub async fn execute(args: &RunArgs, config: EngineConfig) -> Result<bool> {
    let request = read_request(&args.request)?;
    let snapshot = match &args.state {
        Some(path) => read_snapshot(path)?,
        None => FoundationSnapshot::default(),
    };

    let response = simulate(&request, snapshot, config, args.write_state.as_deref()).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.is_success())
}

/// Dispatch `request` against a foundation seeded from `snapshot`
pub async fn simulate(
    request: &DeploymentRequest,
    snapshot: FoundationSnapshot,
    config: EngineConfig,
    write_state: Option<&Path>,
) -> Result<DeploymentResponse> {
    let platform = InMemoryPlatform::from_snapshot(snapshot);
    let dispatcher = StrategyDispatcher::new(Arc::new(platform.clone()), Arc::new(TracingLogSink), config);

    let response = dispatcher.dispatch(request).await;
    info!(run_id = %response.run_id, calls = platform.calls().len(), "Simulation finished");

    if let Some(path) = write_state {
        let state = serde_json::to_string_pretty(&platform.snapshot())?;
        std::fs::write(path, state)
            .with_context(|| format!("Failed to write state to {}", path.display()))?;
    }
    Ok(response)
}

fn read_request(path: &Path) -> Result<DeploymentRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid request in {}", path.display()))
}

fn read_snapshot(path: &Path) -> Result<FoundationSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid state in {}", path.display()))
}
