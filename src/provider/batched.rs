//! Batched provider adapter for high-fan-out real providers: builds a
//! taxonomy skeleton from file-level signals, then assigns tests in chunks
//! of at most 100, validating and self-healing the result before handing
//! orchestration a normal `Phase1Output`.

use super::{
    AiProvider, ClassifyDomainsInput, ConvertTestNamesInput, ConvertedBehavior, NamedTest,
    Placement, PlacementCandidate, ProviderError, UNCATEGORIZED_DOMAIN, UNCATEGORIZED_FEATURE,
};
use crate::model::{DomainGroup, FeatureGroup, FileInfo, Language, Phase1Output, TestInfo, TokenUsage};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Maximum tests per `assign_tests_batch` call.
pub const MAX_BATCH_SIZE: usize = 100;

/// The two sub-operations a high-fan-out provider exposes, plus the two
/// operations it shares verbatim with the plain `AiProvider` contract.
#[async_trait]
pub trait BatchedAiBackend: Send + Sync {
    /// Build domain/feature names (no test indices yet) from file-level
    /// metadata only.
    async fn build_taxonomy(
        &self,
        files: &[FileInfo],
        language: Language,
    ) -> Result<(Vec<DomainGroup>, TokenUsage), ProviderError>;

    /// Assign one batch (≤ `MAX_BATCH_SIZE` tests) into `(domain, feature)`
    /// pairs. `batch_index` identifies the batch for logging/diagnostics.
    async fn assign_tests_batch(
        &self,
        taxonomy: &[DomainGroup],
        batch_index: usize,
        tests: &[NamedTest],
    ) -> Result<(Vec<Placement>, TokenUsage), ProviderError>;

    async fn convert_test_names(
        &self,
        input: ConvertTestNamesInput<'_>,
    ) -> Result<(Vec<ConvertedBehavior>, TokenUsage), ProviderError>;

    async fn place_tests(
        &self,
        existing: &Phase1Output,
        candidates: &[PlacementCandidate],
        language: Language,
    ) -> Result<(Vec<Placement>, TokenUsage), ProviderError>;
}

/// Wraps a `BatchedAiBackend`, generic so a real wire implementation can be
/// dropped in without touching orchestration code.
pub struct BatchedProvider<B: BatchedAiBackend> {
    backend: B,
}

impl<B: BatchedAiBackend> BatchedProvider<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

fn flatten_tests(files: &[FileInfo]) -> Vec<NamedTest> {
    files
        .iter()
        .flat_map(|f| f.tests.iter())
        .map(|t| NamedTest {
            index: t.index,
            name: t.name.clone(),
        })
        .collect()
}

fn taxonomy_pair_exists(taxonomy: &[DomainGroup], domain: &str, feature: &str) -> bool {
    taxonomy
        .iter()
        .any(|d| d.name == domain && d.features.iter().any(|f| f.name == feature))
}

/// Validate a batch's placements against the taxonomy and self-heal:
/// invalid/missing indices route to Uncategorized/General, duplicates keep
/// the first, out-of-batch indices are discarded. Returns `(domain,
/// feature) -> test_indices` entries to merge into the running tree.
fn recover_batch(
    taxonomy: &[DomainGroup],
    batch: &[NamedTest],
    placements: Vec<Placement>,
) -> HashMap<(String, String), Vec<u32>> {
    let batch_indices: HashSet<u32> = batch.iter().map(|t| t.index).collect();
    let mut assigned = HashSet::new();
    let mut result: HashMap<(String, String), Vec<u32>> = HashMap::new();

    for placement in placements {
        if !batch_indices.contains(&placement.test_index) {
            continue; // index outside the batch: discard
        }
        if !assigned.insert(placement.test_index) {
            continue; // duplicate: keep first, drop subsequent
        }

        let (domain, feature) = if placement.domain.is_empty()
            || placement.feature.is_empty()
            || !taxonomy_pair_exists(taxonomy, &placement.domain, &placement.feature)
        {
            (UNCATEGORIZED_DOMAIN.to_string(), UNCATEGORIZED_FEATURE.to_string())
        } else {
            (placement.domain, placement.feature)
        };

        result.entry((domain, feature)).or_default().push(placement.test_index);
    }

    for test in batch {
        if !assigned.contains(&test.index) {
            result
                .entry((UNCATEGORIZED_DOMAIN.to_string(), UNCATEGORIZED_FEATURE.to_string()))
                .or_default()
                .push(test.index);
        }
    }

    result
}

fn assemble(taxonomy: Vec<DomainGroup>, assignments: HashMap<(String, String), Vec<u32>>) -> Phase1Output {
    let mut domains: Vec<DomainGroup> = taxonomy
        .into_iter()
        .map(|mut d| {
            d.features.iter_mut().for_each(|f| f.test_indices.clear());
            d
        })
        .collect();

    for ((domain_name, feature_name), mut indices) in assignments {
        indices.sort();
        let domain = match domains.iter_mut().find(|d| d.name == domain_name) {
            Some(d) => d,
            None => {
                domains.push(DomainGroup {
                    name: domain_name.clone(),
                    description: format!("{domain_name} (self-healed)"),
                    confidence: 0.0,
                    features: Vec::new(),
                });
                domains.last_mut().unwrap()
            }
        };

        match domain.features.iter_mut().find(|f| f.name == feature_name) {
            Some(feature) => feature.test_indices.extend(indices),
            None => domain.features.push(FeatureGroup {
                name: feature_name.clone(),
                description: format!("{feature_name} (self-healed)"),
                confidence: 0.0,
                test_indices: indices,
            }),
        }
    }

    domains.retain(|d| !d.features.is_empty());
    Phase1Output { domains }
}

#[async_trait]
impl<B: BatchedAiBackend> AiProvider for BatchedProvider<B> {
    async fn classify_domains(
        &self,
        input: ClassifyDomainsInput<'_>,
    ) -> Result<(Phase1Output, TokenUsage), ProviderError> {
        let (taxonomy, mut usage) = self.backend.build_taxonomy(input.files, input.language).await?;

        if taxonomy.is_empty() {
            return Err(ProviderError::terminal("build_taxonomy returned an empty taxonomy"));
        }

        let all_tests = flatten_tests(input.files);
        let mut assignments: HashMap<(String, String), Vec<u32>> = HashMap::new();

        for (batch_index, chunk) in all_tests.chunks(MAX_BATCH_SIZE).enumerate() {
            let (placements, batch_usage) = self.backend.assign_tests_batch(&taxonomy, batch_index, chunk).await?;
            usage = usage.combine(&batch_usage);
            for (key, mut indices) in recover_batch(&taxonomy, chunk, placements) {
                assignments.entry(key).or_default().append(&mut indices);
            }
        }

        Ok((assemble(taxonomy, assignments), usage))
    }

    async fn convert_test_names(
        &self,
        input: ConvertTestNamesInput<'_>,
    ) -> Result<(Vec<ConvertedBehavior>, TokenUsage), ProviderError> {
        self.backend.convert_test_names(input).await
    }

    async fn place_tests(
        &self,
        existing: &Phase1Output,
        candidates: &[PlacementCandidate],
        language: Language,
    ) -> Result<(Vec<Placement>, TokenUsage), ProviderError> {
        self.backend.place_tests(existing, candidates, language).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubBackend {
        taxonomy: Vec<DomainGroup>,
        /// One set of placements per expected batch call, consumed in order.
        batch_responses: Mutex<Vec<Vec<Placement>>>,
    }

    #[async_trait]
    impl BatchedAiBackend for StubBackend {
        async fn build_taxonomy(
            &self,
            _files: &[FileInfo],
            _language: Language,
        ) -> Result<(Vec<DomainGroup>, TokenUsage), ProviderError> {
            Ok((self.taxonomy.clone(), TokenUsage::default()))
        }

        async fn assign_tests_batch(
            &self,
            _taxonomy: &[DomainGroup],
            _batch_index: usize,
            _tests: &[NamedTest],
        ) -> Result<(Vec<Placement>, TokenUsage), ProviderError> {
            let mut responses = self.batch_responses.lock().unwrap();
            Ok((responses.remove(0), TokenUsage::default()))
        }

        async fn convert_test_names(
            &self,
            _input: ConvertTestNamesInput<'_>,
        ) -> Result<(Vec<ConvertedBehavior>, TokenUsage), ProviderError> {
            Ok((Vec::new(), TokenUsage::default()))
        }

        async fn place_tests(
            &self,
            _existing: &Phase1Output,
            _candidates: &[PlacementCandidate],
            _language: Language,
        ) -> Result<(Vec<Placement>, TokenUsage), ProviderError> {
            Ok((Vec::new(), TokenUsage::default()))
        }
    }

    fn taxonomy_with(domain: &str, feature: &str) -> Vec<DomainGroup> {
        vec![DomainGroup {
            name: domain.into(),
            description: "d".into(),
            confidence: 0.9,
            features: vec![FeatureGroup {
                name: feature.into(),
                description: "f".into(),
                confidence: 0.9,
                test_indices: vec![],
            }],
        }]
    }

    fn files_with_tests(indices: &[u32]) -> Vec<FileInfo> {
        vec![FileInfo {
            path: "a.test.ts".into(),
            framework: "jest".into(),
            tests: indices
                .iter()
                .map(|&i| TestInfo {
                    index: i,
                    name: format!("test{i}"),
                    suite_path: None,
                    test_case_id: format!("tc-{i}"),
                })
                .collect(),
        }]
    }

    #[tokio::test]
    async fn valid_placements_land_where_assigned() {
        let backend = StubBackend {
            taxonomy: taxonomy_with("Authentication", "Login"),
            batch_responses: Mutex::new(vec![vec![Placement {
                test_index: 0,
                domain: "Authentication".into(),
                feature: "Login".into(),
            }]]),
        };
        let provider = BatchedProvider::new(backend);
        let files = files_with_tests(&[0]);

        let (output, _) = provider
            .classify_domains(ClassifyDomainsInput {
                files: &files,
                language: Language::English,
                taxonomy_hint: None,
            })
            .await
            .unwrap();

        assert_eq!(output.domains.len(), 1);
        assert_eq!(output.domains[0].features[0].test_indices, vec![0]);
    }

    #[tokio::test]
    async fn invalid_pair_self_heals_to_uncategorized() {
        let backend = StubBackend {
            taxonomy: taxonomy_with("Authentication", "Login"),
            batch_responses: Mutex::new(vec![vec![Placement {
                test_index: 0,
                domain: "NoSuchDomain".into(),
                feature: "NoSuchFeature".into(),
            }]]),
        };
        let provider = BatchedProvider::new(backend);
        let files = files_with_tests(&[0]);

        let (output, _) = provider
            .classify_domains(ClassifyDomainsInput {
                files: &files,
                language: Language::English,
                taxonomy_hint: None,
            })
            .await
            .unwrap();

        let uncategorized = output.domains.iter().find(|d| d.name == UNCATEGORIZED_DOMAIN).unwrap();
        assert_eq!(uncategorized.features[0].name, UNCATEGORIZED_FEATURE);
        assert_eq!(uncategorized.features[0].test_indices, vec![0]);
    }

    #[tokio::test]
    async fn missing_index_falls_back_to_uncategorized() {
        let backend = StubBackend {
            taxonomy: taxonomy_with("Authentication", "Login"),
            batch_responses: Mutex::new(vec![vec![]]),
        };
        let provider = BatchedProvider::new(backend);
        let files = files_with_tests(&[7]);

        let (output, _) = provider
            .classify_domains(ClassifyDomainsInput {
                files: &files,
                language: Language::English,
                taxonomy_hint: None,
            })
            .await
            .unwrap();

        let uncategorized = output.domains.iter().find(|d| d.name == UNCATEGORIZED_DOMAIN).unwrap();
        assert_eq!(uncategorized.features[0].test_indices, vec![7]);
    }

    #[tokio::test]
    async fn duplicate_index_keeps_first_assignment() {
        let backend = StubBackend {
            taxonomy: taxonomy_with("Authentication", "Login"),
            batch_responses: Mutex::new(vec![vec![
                Placement {
                    test_index: 0,
                    domain: "Authentication".into(),
                    feature: "Login".into(),
                },
                Placement {
                    test_index: 0,
                    domain: "NoSuchDomain".into(),
                    feature: "NoSuchFeature".into(),
                },
            ]]),
        };
        let provider = BatchedProvider::new(backend);
        let files = files_with_tests(&[0]);

        let (output, _) = provider
            .classify_domains(ClassifyDomainsInput {
                files: &files,
                language: Language::English,
                taxonomy_hint: None,
            })
            .await
            .unwrap();

        assert!(output.domains.iter().all(|d| d.name != UNCATEGORIZED_DOMAIN));
        assert_eq!(output.domains[0].features[0].test_indices, vec![0]);
    }

    #[tokio::test]
    async fn out_of_batch_index_is_discarded() {
        let backend = StubBackend {
            taxonomy: taxonomy_with("Authentication", "Login"),
            batch_responses: Mutex::new(vec![vec![Placement {
                test_index: 999,
                domain: "Authentication".into(),
                feature: "Login".into(),
            }]]),
        };
        let provider = BatchedProvider::new(backend);
        let files = files_with_tests(&[0]);

        let (output, _) = provider
            .classify_domains(ClassifyDomainsInput {
                files: &files,
                language: Language::English,
                taxonomy_hint: None,
            })
            .await
            .unwrap();

        let total: usize = output.all_test_indices().len();
        assert_eq!(total, 1);
        assert!(output.all_test_indices().contains(&0));
    }
}
