//! Error types for the spec-view pipeline.
//!
//! Mirrors the shape callers need per the error kinds the use case can
//! surface: invalid input, missing analysis, inventory load failure, AI
//! processing failure, partial feature failure, and save failure. Side
//! channel operations (usage/history recording) never produce one of these;
//! they are logged and swallowed at the call site.

use thiserror::Error;

/// Primary error type for the spec-view core.
#[derive(Error, Debug)]
pub enum SpecViewError {
    /// Request validation failed (empty analysisId/userId, unrecognized language).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The repository has no analysis under this id.
    #[error("analysis not found: {0}")]
    AnalysisNotFound(String),

    /// The test inventory could not be loaded, or was empty.
    #[error("load inventory failed: {0}")]
    LoadInventoryFailed(String),

    /// Phase 1 exhausted its retries, or the provider returned structurally
    /// invalid output that recovery could not repair.
    #[error("AI processing failed: {0}")]
    AiProcessingFailed(String),

    /// Phase 2 completed but the fallback-feature fraction exceeded
    /// `FailureThreshold`.
    #[error("partial feature failure: {failed}/{total} features fell back (threshold {threshold})")]
    PartialFeatureFailure {
        failed: usize,
        total: usize,
        threshold: f64,
    },

    /// Document persistence failed.
    #[error("save failed: {0}")]
    SaveFailed(String),

    /// Provider or repository error that doesn't fit a named variant above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpecViewError {
    /// Whether this error was produced by a reliability-wrapped call that
    /// exhausted its retries (as opposed to failing validation up front).
    pub fn is_ai_processing_failure(&self) -> bool {
        matches!(self, SpecViewError::AiProcessingFailed(_))
    }
}

impl From<serde_json::Error> for SpecViewError {
    fn from(err: serde_json::Error) -> Self {
        SpecViewError::Internal(format!("serialization error: {err}"))
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpecViewError>;
