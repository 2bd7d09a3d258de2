//! Bounded best-effort retries for cleanup operations
//!
//! Only pruning uses this. Scaling and route operations are never retried:
//! their failures must surface to the caller.

use crate::stage_log::StageLog;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry configuration with exponential backoff and jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryConfig {
    /// Retries without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

/// Remediation logged when cleanup of a release gives up
pub fn remediation_message(operation: &str, release: &str, attempts: u32) -> String {
    format!(
        "Failed to {} release {} after {} attempts. Manual intervention required: \
         clean up release {} on the platform.",
        operation, release, attempts, release
    )
}

/// Runs cleanup operations up to `max_attempts` times, swallowing the final failure
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`; on exhaustion log the remediation message and return `None`
    pub async fn run_best_effort<F, Fut, T, E>(
        &self,
        operation_name: &str,
        release: &str,
        log: &StageLog,
        mut operation: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = Duration::from_millis(self.config.initial_delay_ms);
        let max_delay = Duration::from_millis(self.config.max_delay_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Some(value),
                Err(e) if attempt >= max_attempts => {
                    error!(
                        operation = %operation_name,
                        release = %release,
                        attempt = attempt,
                        error = %e,
                        "Cleanup failed after max retries"
                    );
                    log.error(remediation_message(operation_name, release, attempt));
                    return None;
                }
                Err(e) => {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
                    warn!(
                        operation = %operation_name,
                        release = %release,
                        attempt = attempt,
                        error = %e,
                        delay_ms = jittered.as_millis() as u64,
                        "Cleanup failed, retrying"
                    );
                    log.warn(format!(
                        "Attempt {} to {} {} failed: {}",
                        attempt, operation_name, release, e
                    ));
                    if !jittered.is_zero() {
                        tokio::time::sleep(jittered).await;
                    }
                    delay = Duration::from_secs_f64(
                        (delay.as_secs_f64() * self.config.backoff_multiplier)
                            .min(max_delay.as_secs_f64()),
                    );
                }
            }
        }
    }
}
