//! Skyway Deployment Engine
//!
//! Orchestrates application releases on a route-based hosting platform using
//! blue-green, rolling and basic strategies.
//!
//! ## Architectural Boundaries
//!
//! - `skyway-platform` owns: the platform API, secret scrubbing, the in-memory foundation
//! - `skyway-deployment` owns: naming, manifest mutation, route swaps, scaling, retention, rollback
//! - `skyway-types` owns: the request and response model shared with callers
//!
//! ## Key Principle
//!
//! Every release is resolved by GUID before it is renamed, resized or
//! re-routed. Names change mid-sequence; GUIDs never do.
//!
//! ## Usage
//!
//! ```no_run
//! use skyway_deployment::{EngineConfig, StrategyDispatcher, TracingLogSink};
//! use skyway_platform::InMemoryPlatform;
//! use skyway_types::DeploymentRequest;
//! use std::sync::Arc;
//!
//! # async fn example(request: DeploymentRequest) {
//! let platform = InMemoryPlatform::new();
//! let dispatcher = StrategyDispatcher::new(
//!     Arc::new(platform),
//!     Arc::new(TracingLogSink),
//!     EngineConfig::default(),
//! );
//!
//! let response = dispatcher.dispatch(&request).await;
//! println!("{:?}: {:?}", response.status, response.error_message);
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod artifact;
pub mod autoscaler;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod manifest;
pub mod naming;
pub mod pruning;
pub mod retry;
pub mod routes;
pub mod scaling;
pub mod stage_log;

// Re-exports
pub use artifact::{ArtifactResolver, LocalArtifactResolver};
pub use autoscaler::{AutoscalerReconciler, AutoscalerSnapshot};
pub use config::{EngineConfig, RetentionConfig};
pub use context::{TaskContext, WorkingDirectory};
pub use dispatcher::StrategyDispatcher;
pub use error::{CommandFailure, DeploymentError, Result};
pub use handlers::{create_handler, CommandHandler, HandlerResult};
pub use manifest::{ManifestEdit, RouteMode};
pub use naming::{NamingResolver, ReleaseTopology};
pub use pruning::{plan_retention, PruneAction, RetentionPruner};
pub use retry::{RetryConfig, RetryExecutor};
pub use routes::{RouteSwapCoordinator, SwapPlan, SwapProgress, SwapRollbackPlan};
pub use scaling::{ScalingCoordinator, ScalingPlan};
pub use stage_log::{LogLevel, MemoryLogSink, Stage, StageLog, StageLogEntry, StageLogSink, TracingLogSink};
