//! Phase 1: obtain a `Phase1Output` covering every test index exactly once.
//!
//! Both the `Full` provider path (a single `classify_domains` call) and the
//! `Batched` path (build-taxonomy + chunked assignment, already self-healed
//! inside `BatchedProvider`) are driven through the same orchestrator,
//! since both are just an `AiProvider` underneath — the distinction lives
//! in which provider implementation is plugged in, not in separate
//! orchestration code.

use crate::error::{Result, SpecViewError};
use crate::model::{FileInfo, Language, Phase1Output, TestInfo, TokenUsage};
use crate::provider::{AiProvider, ClassifyDomainsInput};
use crate::reliability::{retry_with_backoff, BackoffPolicy};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Instrument};

/// Default Phase 1 top-level timeout: deliberately under the 5-minute
/// provider limit most AI backends enforce.
pub const DEFAULT_PHASE1_TIMEOUT: Duration = Duration::from_secs(270);

pub struct TaxonomyPhase<P: AiProvider> {
    provider: Arc<P>,
    backoff: BackoffPolicy,
    timeout: Duration,
}

impl<P: AiProvider> TaxonomyPhase<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            backoff: BackoffPolicy::phase1_default(),
            timeout: DEFAULT_PHASE1_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the full taxonomy build for a fresh (non-incremental) request.
    pub async fn run(
        &self,
        files: &[FileInfo],
        language: Language,
    ) -> Result<(Phase1Output, TokenUsage)> {
        let expected: HashSet<u32> = files.iter().flat_map(|f| f.tests.iter().map(|t| t.index)).collect();
        let span = crate::logging::taxonomy_phase_span(expected.len());

        info!(parent: &span, "starting taxonomy phase");

        let attempt = tokio::time::timeout(self.timeout, self.classify_with_retry(files, language, None))
            .instrument(span.clone())
            .await;

        let (output, usage) = match attempt {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                error!(parent: &span, %err, "taxonomy phase exhausted retries");
                return Err(SpecViewError::AiProcessingFailed(err.to_string()));
            }
            Err(_) => {
                error!(parent: &span, "taxonomy phase timed out");
                return Err(SpecViewError::AiProcessingFailed("phase 1 timed out".into()));
            }
        };

        validate_coverage(&output, &expected).map_err(SpecViewError::AiProcessingFailed)?;

        info!(parent: &span, domain_count = output.domains.len(), "taxonomy phase complete");
        Ok((output, usage))
    }

    async fn classify_with_retry(
        &self,
        files: &[FileInfo],
        language: Language,
        taxonomy_hint: Option<&Phase1Output>,
    ) -> std::result::Result<(Phase1Output, TokenUsage), crate::provider::ProviderError> {
        retry_with_backoff(
            &self.backoff,
            crate::reliability::classify_provider_error,
            || {
                let hint = taxonomy_hint;
                async move {
                    self.provider
                        .classify_domains(ClassifyDomainsInput {
                            files,
                            language,
                            taxonomy_hint: hint,
                        })
                        .await
                }
            },
        )
        .await
    }
}

/// Checks the structural invariants of a classification result: non-empty
/// output, no empty names/index lists, and full single-coverage of the
/// expected test set.
fn validate_coverage(output: &Phase1Output, expected: &HashSet<u32>) -> std::result::Result<(), String> {
    if output.domains.is_empty() {
        return Err("taxonomy output has no domains".to_string());
    }

    let mut seen: HashSet<u32> = HashSet::new();
    for domain in &output.domains {
        if domain.name.is_empty() {
            return Err("domain with empty name".to_string());
        }
        if domain.features.is_empty() {
            return Err(format!("domain '{}' has no features", domain.name));
        }
        for feature in &domain.features {
            if feature.name.is_empty() {
                return Err(format!("domain '{}' has a feature with an empty name", domain.name));
            }
            if feature.test_indices.is_empty() {
                return Err(format!("feature '{}' has no test indices", feature.name));
            }
            for &idx in &feature.test_indices {
                if !seen.insert(idx) {
                    return Err(format!("test index {idx} appears in more than one feature"));
                }
            }
        }
    }

    if &seen != expected {
        let missing: Vec<u32> = expected.difference(&seen).copied().collect();
        let extra: Vec<u32> = seen.difference(expected).copied().collect();
        return Err(format!("coverage mismatch: missing={missing:?} extra={extra:?}"));
    }

    Ok(())
}

/// Flattens `FileInfo` into `(filePath, TestInfo)` pairs, the shape the
/// diff engine consumes.
pub fn flatten_with_paths(files: &[FileInfo]) -> Vec<(String, TestInfo)> {
    files
        .iter()
        .flat_map(|f| f.tests.iter().map(move |t| (f.path.clone(), t.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DomainGroup, FeatureGroup};
    use crate::provider::MockProvider;

    fn files() -> Vec<FileInfo> {
        vec![FileInfo {
            path: "auth/login.test.ts".into(),
            framework: "jest".into(),
            tests: vec![
                TestInfo { index: 0, name: "rejectsBadPassword".into(), suite_path: Some("Login".into()), test_case_id: "tc-1".into() },
                TestInfo { index: 1, name: "acceptsGoodPassword".into(), suite_path: Some("Login".into()), test_case_id: "tc-2".into() },
            ],
        }]
    }

    #[tokio::test]
    async fn full_strategy_produces_complete_coverage() {
        let provider = Arc::new(MockProvider::new());
        let phase = TaxonomyPhase::new(provider);
        let (output, _) = phase.run(&files(), Language::English).await.unwrap();

        let mut indices = output.all_test_indices();
        indices.sort();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn validate_coverage_rejects_missing_index() {
        let output = Phase1Output {
            domains: vec![DomainGroup {
                name: "Authentication".into(),
                description: "d".into(),
                confidence: 0.9,
                features: vec![FeatureGroup {
                    name: "Login".into(),
                    description: "f".into(),
                    confidence: 0.9,
                    test_indices: vec![0],
                }],
            }],
        };
        let expected: HashSet<u32> = [0, 1].into_iter().collect();
        assert!(validate_coverage(&output, &expected).is_err());
    }

    #[test]
    fn validate_coverage_rejects_duplicate_index() {
        let output = Phase1Output {
            domains: vec![DomainGroup {
                name: "Authentication".into(),
                description: "d".into(),
                confidence: 0.9,
                features: vec![
                    FeatureGroup { name: "Login".into(), description: "f".into(), confidence: 0.9, test_indices: vec![0] },
                    FeatureGroup { name: "Logout".into(), description: "f".into(), confidence: 0.9, test_indices: vec![0] },
                ],
            }],
        };
        let expected: HashSet<u32> = [0].into_iter().collect();
        assert!(validate_coverage(&output, &expected).is_err());
    }

    #[test]
    fn validate_coverage_accepts_exact_match() {
        let output = Phase1Output {
            domains: vec![DomainGroup {
                name: "Authentication".into(),
                description: "d".into(),
                confidence: 0.9,
                features: vec![FeatureGroup {
                    name: "Login".into(),
                    description: "f".into(),
                    confidence: 0.9,
                    test_indices: vec![0, 1],
                }],
            }],
        };
        let expected: HashSet<u32> = [0, 1].into_iter().collect();
        assert!(validate_coverage(&output, &expected).is_ok());
    }
}
