//! Engine configuration

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration of the deployment engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Parent of per-run working directories; system temp dir when unset
    #[serde(default)]
    pub working_dir_root: Option<PathBuf>,

    /// Retention policy applied by setup strategies
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Best-effort retries for pruning cleanup
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Previous releases kept downsized-but-present
    #[serde(default = "default_older_versions_to_keep")]
    pub older_versions_to_keep: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            older_versions_to_keep: default_older_versions_to_keep(),
        }
    }
}

fn default_older_versions_to_keep() -> u32 {
    3
}

impl EngineConfig {
    /// Configuration for tests: no retry delays
    pub fn immediate() -> Self {
        Self {
            retry: RetryConfig::immediate(3),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retention.older_versions_to_keep, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.working_dir_root.is_none());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"retention":{},"retry":{"max_attempts":5}}"#).unwrap();
        assert_eq!(config.retention.older_versions_to_keep, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
    }
}
