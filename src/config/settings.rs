//! Engine configuration and retry policies
//!
//! Defaults mirror production behavior; every duration is configurable so
//! tests can shrink the backoffs to milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use crate::workflow::ValidationThresholds;

/// In-stage retry policy for one class of external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub tries: u32,
    /// Linear backoff base: wait `attempt * base_delay` between tries.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(tries: u32, base_delay: Duration) -> Self {
        Self {
            tries: tries.max(1),
            base_delay,
        }
    }
}

/// Configuration for [`crate::workflow::ReportEngine`].
///
/// ## Environment Variables
///
/// - `REPORT_MODEL`: generation model name (default: gemini-2.5-flash)
/// - `REPORT_PROMPTS_DIR`: prompt template directory (default: prompts)
/// - `REPORT_MAX_ATTEMPTS`: research attempt cap (default: 3)
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub prompts_dir: PathBuf,

    /// Default research attempt cap; `RunRequest.max_attempts` overrides
    /// per session.
    pub max_attempts: u32,

    /// Research calls are heavy (search tool plus long output), so they
    /// get the longest backoff.
    pub research_retry: RetryPolicy,
    pub component_retry: RetryPolicy,
    pub translate_retry: RetryPolicy,

    /// Persist retries for transient storage failures.
    pub persist_retries: u32,
    /// Raised retry budget for oversized artifacts.
    pub persist_retries_large: u32,
    /// Combined artifact size above which the raised budget applies.
    pub large_artifact_chars: usize,
    /// Exponential backoff base: wait `base * 2^attempt`.
    pub persist_backoff_base: Duration,

    /// Shared deadline for the market data fan-out.
    pub aggregate_deadline: Duration,
    /// Individual market provider call timeout.
    pub provider_timeout: Duration,

    /// Longest a stage will wait for the generation rate limiter before
    /// treating the call as failed.
    pub limiter_max_wait: Duration,

    pub validation: ValidationThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            prompts_dir: PathBuf::from("prompts"),
            max_attempts: 3,
            research_retry: RetryPolicy::new(3, Duration::from_secs(45)),
            component_retry: RetryPolicy::new(3, Duration::from_secs(20)),
            translate_retry: RetryPolicy::new(3, Duration::from_secs(10)),
            persist_retries: 3,
            persist_retries_large: 5,
            large_artifact_chars: 50_000,
            persist_backoff_base: Duration::from_secs(1),
            aggregate_deadline: Duration::from_secs(10),
            provider_timeout: Duration::from_secs(8),
            limiter_max_wait: Duration::from_secs(30),
            validation: ValidationThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("REPORT_MODEL") {
            config.model = model;
        }
        if let Ok(dir) = std::env::var("REPORT_PROMPTS_DIR") {
            config.prompts_dir = PathBuf::from(dir);
        }
        if let Ok(attempts) = std::env::var("REPORT_MAX_ATTEMPTS") {
            if let Ok(parsed) = attempts.parse() {
                config.max_attempts = parsed;
            }
        }
        config
    }

    /// Persist retry budget for a given combined artifact size.
    pub fn persist_budget(&self, artifact_chars: usize) -> u32 {
        if artifact_chars > self.large_artifact_chars {
            self.persist_retries_large
        } else {
            self.persist_retries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persist_budget_grows_for_large_artifacts() {
        let config = EngineConfig::default();
        assert_eq!(config.persist_budget(10_000), 3);
        assert_eq!(config.persist_budget(60_000), 5);
    }

    #[test]
    fn retry_policy_floors_at_one_try() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.tries, 1);
    }
}
