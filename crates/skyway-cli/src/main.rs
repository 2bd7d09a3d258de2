//! Skyway CLI - Dry runs of deployment strategies
//!
//! The `skyway` binary provides:
//! - `run`: dispatch a JSON request against a simulated foundation
//! - `render-manifest`: apply the manifest mutator to a template

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{render::RenderArgs, run::RunArgs};
use config::SkywayConfig;

/// Skyway CLI
#[derive(Parser)]
#[command(name = "skyway")]
#[command(about = "Skyway - Deployment strategy orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SKYWAY_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "SKYWAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "SKYWAY_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request against a simulated foundation
    Run(RunArgs),

    /// Render a manifest template
    RenderManifest(RenderArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = SkywayConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing; logs go to stderr so stdout stays parseable
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Run(args) => {
            let succeeded = commands::run::execute(&args, config.engine).await?;
            Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::RenderManifest(args) => {
            commands::render::execute(&args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
