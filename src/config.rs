//! Functional-options configuration for one pipeline instance.
//!
//! Each `with_*` method silently falls back to the existing value when
//! given an out-of-range input (non-positive duration, threshold outside
//! `(0, 1]`) rather than returning a `Result` — invalid configuration is a
//! caller bug to be logged, not a recoverable error at call time.

use crate::behavior_phase::{DEFAULT_CONCURRENCY, DEFAULT_FAILURE_THRESHOLD, DEFAULT_FEATURE_TIMEOUT, DEFAULT_PHASE2_TIMEOUT};
use crate::taxonomy_phase::DEFAULT_PHASE1_TIMEOUT;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_model_id: String,
    pub phase1_timeout: Duration,
    pub phase2_timeout: Duration,
    pub feature_timeout: Duration,
    pub phase2_concurrency: usize,
    pub failure_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_model_id: "default".to_string(),
            phase1_timeout: DEFAULT_PHASE1_TIMEOUT,
            phase2_timeout: DEFAULT_PHASE2_TIMEOUT,
            feature_timeout: DEFAULT_FEATURE_TIMEOUT,
            phase2_concurrency: DEFAULT_CONCURRENCY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.default_model_id = model_id.into();
        self
    }

    pub fn with_phase1_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("ignoring non-positive Phase1Timeout, keeping default");
            return self;
        }
        self.phase1_timeout = timeout;
        self
    }

    pub fn with_phase2_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("ignoring non-positive Phase2Timeout, keeping default");
            return self;
        }
        self.phase2_timeout = timeout;
        self
    }

    pub fn with_feature_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            warn!("ignoring non-positive feature timeout, keeping default");
            return self;
        }
        self.feature_timeout = timeout;
        self
    }

    pub fn with_phase2_concurrency(mut self, concurrency: usize) -> Self {
        if concurrency == 0 {
            warn!("ignoring non-positive Phase2Concurrency, keeping default");
            return self;
        }
        self.phase2_concurrency = concurrency;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        if !(threshold > 0.0 && threshold <= 1.0) {
            warn!(threshold, "ignoring FailureThreshold outside (0,1], keeping default");
            return self;
        }
        self.failure_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_values_are_silently_ignored() {
        let config = PipelineConfig::new()
            .with_phase1_timeout(Duration::ZERO)
            .with_phase2_concurrency(0)
            .with_failure_threshold(1.5)
            .with_failure_threshold(-0.1);

        let default = PipelineConfig::default();
        assert_eq!(config.phase1_timeout, default.phase1_timeout);
        assert_eq!(config.phase2_concurrency, default.phase2_concurrency);
        assert_eq!(config.failure_threshold, default.failure_threshold);
    }

    #[test]
    fn valid_values_are_applied() {
        let config = PipelineConfig::new()
            .with_phase1_timeout(Duration::from_secs(60))
            .with_phase2_concurrency(10)
            .with_failure_threshold(0.25);

        assert_eq!(config.phase1_timeout, Duration::from_secs(60));
        assert_eq!(config.phase2_concurrency, 10);
        assert_eq!(config.failure_threshold, 0.25);
    }

    #[test]
    fn boundary_threshold_of_one_is_valid() {
        let config = PipelineConfig::new().with_failure_threshold(1.0);
        assert_eq!(config.failure_threshold, 1.0);
    }
}
