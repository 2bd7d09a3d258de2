//! Skyway Platform - Target platform client
//!
//! The deployment engine never talks to a foundation directly. It calls the
//! [`TargetPlatform`] capability interface, obtained per connection from a
//! [`PlatformConnector`].
//!
//! Every call is blocking from the engine's point of view: resize and rolling
//! pushes return once the platform reports steady state. Errors are
//! [`PlatformError`]s and must pass through [`sanitize_message`] before they
//! are logged or returned to a caller.
//!
//! [`InMemoryPlatform`] is a complete foundation kept in memory. It backs the
//! test suites and the CLI's dry-run mode.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod client;
pub mod error;
pub mod memory;
pub mod sanitize;

pub use client::{PlatformConnector, PlatformOperation, PluginOutcome, PluginScript, PushRequest, TargetPlatform};
pub use error::{PlatformError, Result};
pub use memory::{AppRecord, FaultRule, FoundationSnapshot, InMemoryPlatform, PlatformCall};
pub use sanitize::{sanitize_message, REDACTED};
