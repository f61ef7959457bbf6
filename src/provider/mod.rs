//! AI provider interface: the two operations the pipeline drives, plus the
//! supplemented placement operation used by incremental reclassification.
//!
//! Concrete wire protocols (auth, HTTP, model selection) are out of scope
//! here; this module only defines the contract orchestration code depends
//! on and ships a deterministic mock plus a self-healing batched adapter.

mod batched;
mod mock;

pub use batched::BatchedProvider;
pub use mock::MockProvider;

use crate::model::{FileInfo, Language, Phase1Output, TokenUsage};
use async_trait::async_trait;
use std::fmt;

/// Input to `classify_domains`: the full inventory plus an optional hint
/// taxonomy used on incremental runs (features/domains that should be
/// preferred over inventing new ones).
pub struct ClassifyDomainsInput<'a> {
    pub files: &'a [FileInfo],
    pub language: Language,
    pub taxonomy_hint: Option<&'a Phase1Output>,
}

/// One test as presented to `convert_test_names`.
#[derive(Debug, Clone)]
pub struct NamedTest {
    pub index: u32,
    pub name: String,
}

/// Input to `convert_test_names`: one feature's worth of uncached tests.
pub struct ConvertTestNamesInput<'a> {
    pub domain_context: &'a str,
    pub feature_name: &'a str,
    pub language: Language,
    pub tests: &'a [NamedTest],
}

/// One new test as presented to `place_tests` during incremental runs.
#[derive(Debug, Clone)]
pub struct PlacementCandidate {
    pub index: u32,
    pub name: String,
    pub suite_path: Option<String>,
}

/// `(domain, feature)` assignment returned by `place_tests`, prior to
/// resolution against the existing taxonomy.
#[derive(Debug, Clone)]
pub struct Placement {
    pub test_index: u32,
    pub domain: String,
    pub feature: String,
}

/// Behavior sentence produced for one test, prior to being wrapped into a
/// `BehaviorSpec`.
#[derive(Debug, Clone)]
pub struct ConvertedBehavior {
    pub test_index: u32,
    pub description: String,
    pub confidence: f64,
}

/// Error surfaced by a provider call. Carries enough for the reliability
/// wrapper to classify it without parsing free text.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retryable: false,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        let retryable = matches!(status, 429 | 500 | 502 | 503 | 504);
        Self {
            message: message.into(),
            status: Some(status),
            retryable,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Contract the taxonomy and behavior phases depend on.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Classify the whole inventory into a Domain → Feature → test-indices
    /// tree. Must cover every test index exactly once on success.
    async fn classify_domains(
        &self,
        input: ClassifyDomainsInput<'_>,
    ) -> Result<(Phase1Output, TokenUsage), ProviderError>;

    /// Convert one feature's uncached test names into behavior sentences,
    /// preserving order and indices.
    async fn convert_test_names(
        &self,
        input: ConvertTestNamesInput<'_>,
    ) -> Result<(Vec<ConvertedBehavior>, TokenUsage), ProviderError>;

    /// Assign newly-discovered tests into an existing taxonomy. Used by
    /// incremental reclassification in place of a full `classify_domains`
    /// call. Implementations should self-heal unresolvable placements into
    /// `Uncategorized/General` rather than failing the whole call.
    async fn place_tests(
        &self,
        existing: &Phase1Output,
        candidates: &[PlacementCandidate],
        language: Language,
    ) -> Result<(Vec<Placement>, TokenUsage), ProviderError>;
}

/// Domain/feature names used when a batched assignment can't be resolved
/// against the known taxonomy.
pub const UNCATEGORIZED_DOMAIN: &str = "Uncategorized";
pub const UNCATEGORIZED_FEATURE: &str = "General";
