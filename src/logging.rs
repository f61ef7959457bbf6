//! Thin `tracing` span helpers shared across phase boundaries, so every
//! orchestrator tags its log lines with the same fields instead of each
//! module inventing its own span shape.

use tracing::Span;

/// Span covering one taxonomy-phase run.
pub fn taxonomy_phase_span(test_count: usize) -> Span {
    tracing::info_span!("taxonomy_phase", test_count)
}

/// Span covering one behavior-phase run.
pub fn behavior_phase_span(total_tasks: usize) -> Span {
    tracing::info_span!("behavior_phase", total_tasks)
}

/// Span covering one `GenerateUseCase` call.
pub fn generate_use_case_span(analysis_id: &str, language: &str) -> Span {
    tracing::info_span!("generate_use_case", analysis_id, language)
}
