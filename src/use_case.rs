//! Top-level orchestration: validate, hash, check the document cache, run
//! the two phases (or the incremental diff+placement path), assemble the
//! document, save it, and record usage/history.

use crate::behavior_phase::BehaviorPhase;
use crate::config::PipelineConfig;
use crate::diff::{calculate_test_diff, remove_deleted_test_indices};
use crate::error::{Result, SpecViewError};
use crate::hashing::generate_content_hash;
use crate::model::{
    AnalysisContext, BehaviorCacheStats, DocumentBehavior, DocumentDomain, DocumentFeature,
    FileInfo, Language, Phase1Output, PipelineStats, SpecDocument, TestInfo, TestKey, TokenUsage,
};
use crate::provider::{AiProvider, PlacementCandidate};
use crate::reliability::retry_with_backoff;
use crate::repository::DocumentRepository;
use crate::taxonomy_phase::TaxonomyPhase;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub analysis_id: String,
    pub language: Language,
    pub model_id: Option<String>,
    pub user_id: String,
    pub force_regenerate: bool,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub cache_hit: bool,
    pub content_hash: Option<Vec<u8>>,
    pub document_id: String,
    pub analysis_context: AnalysisContext,
    pub behavior_cache_stats: Option<BehaviorCacheStats>,
    pub pipeline_stats: Option<PipelineStats>,
}

pub struct GenerateUseCase<P: AiProvider> {
    provider: Arc<P>,
    repository: Arc<dyn DocumentRepository>,
    config: PipelineConfig,
}

impl<P: AiProvider + 'static> GenerateUseCase<P> {
    pub fn new(provider: Arc<P>, repository: Arc<dyn DocumentRepository>, config: PipelineConfig) -> Self {
        Self {
            provider,
            repository,
            config,
        }
    }

    fn validate(request: &GenerateRequest) -> Result<()> {
        if request.analysis_id.trim().is_empty() {
            return Err(SpecViewError::InvalidInput("analysisId must not be empty".into()));
        }
        if request.user_id.trim().is_empty() {
            return Err(SpecViewError::InvalidInput("userID must not be empty".into()));
        }
        Ok(())
    }

    fn resolve_model_id(&self, request: &GenerateRequest) -> String {
        request.model_id.clone().unwrap_or_else(|| self.config.default_model_id.clone())
    }

    /// Fresh (non-incremental) run: full taxonomy phase followed by the
    /// behavior phase.
    pub async fn run(&self, request: GenerateRequest) -> Result<GenerateResult> {
        Self::validate(&request)?;
        let model_id = self.resolve_model_id(&request);
        let span = crate::logging::generate_use_case_span(&request.analysis_id, &request.language.to_string());

        let context = self.repository.get_analysis_context(&request.analysis_id).await?;
        let files = self.repository.get_test_data_by_analysis_id(&request.analysis_id).await?;
        if files.is_empty() || files.iter().all(|f| f.tests.is_empty()) {
            return Err(SpecViewError::LoadInventoryFailed(format!(
                "analysis {} has no tests",
                request.analysis_id
            )));
        }

        let content_hash = generate_content_hash(&files, &model_id, request.language).to_vec();

        if !request.force_regenerate {
            if let Some(existing) = self
                .repository
                .find_document_by_content_hash(&request.user_id, &content_hash, request.language, &model_id)
                .await?
            {
                if let Err(err) = self.repository.record_user_history(&request.user_id, &existing.id).await {
                    warn!(parent: &span, %err, "failed to record user history on cache hit");
                }
                info!(parent: &span, document_id = %existing.id, "document cache hit");
                return Ok(GenerateResult {
                    cache_hit: true,
                    content_hash: None,
                    document_id: existing.id,
                    analysis_context: context,
                    behavior_cache_stats: None,
                    pipeline_stats: None,
                });
            }
        }

        let taxonomy_phase = TaxonomyPhase::new(self.provider.clone()).with_timeout(self.config.phase1_timeout);
        let phase1_started = Instant::now();
        let (phase1, phase1_usage) = taxonomy_phase.run(&files, request.language).await?;
        let phase1_duration_ms = phase1_started.elapsed().as_millis() as u64;

        self.run_behavior_and_finish(
            &request,
            &context,
            &files,
            phase1,
            content_hash,
            &model_id,
            phase1_usage,
            phase1_duration_ms,
        )
        .await
    }

    /// Incremental run: diff the current inventory against a previously
    /// known taxonomy, compact deletions, and place only new tests via the
    /// cheap `place_tests` operation instead of re-running Phase 1 in full.
    pub async fn run_incremental(
        &self,
        previous_phase1: &Phase1Output,
        previous_keys: &HashMap<TestKey, crate::model::TestIdentity>,
        request: GenerateRequest,
    ) -> Result<GenerateResult> {
        Self::validate(&request)?;
        let model_id = self.resolve_model_id(&request);
        let span = crate::logging::generate_use_case_span(&request.analysis_id, &request.language.to_string());

        let context = self.repository.get_analysis_context(&request.analysis_id).await?;
        let files = self.repository.get_test_data_by_analysis_id(&request.analysis_id).await?;
        if files.is_empty() || files.iter().all(|f| f.tests.is_empty()) {
            return Err(SpecViewError::LoadInventoryFailed(format!(
                "analysis {} has no tests",
                request.analysis_id
            )));
        }

        let content_hash = generate_content_hash(&files, &model_id, request.language).to_vec();

        if !request.force_regenerate {
            if let Some(existing) = self
                .repository
                .find_document_by_content_hash(&request.user_id, &content_hash, request.language, &model_id)
                .await?
            {
                if let Err(err) = self.repository.record_user_history(&request.user_id, &existing.id).await {
                    warn!(parent: &span, %err, "failed to record user history on cache hit");
                }
                info!(parent: &span, document_id = %existing.id, "document cache hit");
                return Ok(GenerateResult {
                    cache_hit: true,
                    content_hash: None,
                    document_id: existing.id,
                    analysis_context: context,
                    behavior_cache_stats: None,
                    pipeline_stats: None,
                });
            }
        }

        let current_tests: Vec<(String, TestInfo)> = files
            .iter()
            .flat_map(|f| f.tests.iter().map(move |t| (f.path.clone(), t.clone())))
            .collect();

        let diff = calculate_test_diff(previous_keys, &current_tests);
        info!(
            parent: &span,
            new_tests = diff.new_tests.len(),
            deleted_tests = diff.deleted_tests.len(),
            "running incremental reclassification"
        );
        let compacted = remove_deleted_test_indices(previous_phase1, &diff.deleted_tests);

        let placement_started = Instant::now();
        let (phase1, placement_usage) = if diff.new_tests.is_empty() {
            (compacted, TokenUsage::default())
        } else {
            let candidates: Vec<PlacementCandidate> = diff
                .new_tests
                .iter()
                .map(|t| PlacementCandidate {
                    index: t.index,
                    name: t.name.clone(),
                    suite_path: t.suite_path.clone(),
                })
                .collect();

            let backoff = crate::reliability::BackoffPolicy::phase1_default();
            let language = request.language;
            let (placements, usage) = retry_with_backoff(
                &backoff,
                crate::reliability::classify_provider_error,
                || {
                    let compacted = &compacted;
                    let candidates = &candidates;
                    async move { self.provider.place_tests(compacted, candidates, language).await }
                },
            )
            .await
            .map_err(|err| SpecViewError::AiProcessingFailed(err.to_string()))?;

            (merge_placements(compacted, placements), usage)
        };
        let placement_duration_ms = placement_started.elapsed().as_millis() as u64;

        self.run_behavior_and_finish(
            &request,
            &context,
            &files,
            phase1,
            content_hash,
            &model_id,
            placement_usage,
            placement_duration_ms,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_behavior_and_finish(
        &self,
        request: &GenerateRequest,
        context: &AnalysisContext,
        files: &[FileInfo],
        phase1: Phase1Output,
        content_hash: Vec<u8>,
        model_id: &str,
        phase1_usage: TokenUsage,
        phase1_duration_ms: u64,
    ) -> Result<GenerateResult> {
        let full_index: HashMap<u32, TestInfo> = files
            .iter()
            .flat_map(|f| f.tests.iter().cloned())
            .map(|t| (t.index, t))
            .collect();

        let test_lookup: HashMap<u32, (String, Option<String>)> = full_index
            .iter()
            .map(|(idx, t)| (*idx, (t.name.clone(), t.suite_path.clone())))
            .collect();

        let behavior_phase = BehaviorPhase::new(self.provider.clone(), self.repository.clone())
            .with_phase_timeout(self.config.phase2_timeout)
            .with_feature_timeout(self.config.feature_timeout)
            .with_concurrency(self.config.phase2_concurrency)
            .with_failure_threshold(self.config.failure_threshold);

        let phase2_started = Instant::now();
        let behavior_output = behavior_phase
            .run(&phase1, &test_lookup, request.language, model_id, request.force_regenerate)
            .await?;
        let phase2_duration_ms = phase2_started.elapsed().as_millis() as u64;

        let document = assemble_document(&request.analysis_id, request.language, model_id, &phase1, &behavior_output.results, &full_index, content_hash.clone());

        let saved = self
            .repository
            .save_document(&request.user_id, document)
            .await
            .map_err(|err| SpecViewError::SaveFailed(err.to_string()))?;

        let quota_amount = behavior_output.cache_stats.generated_behaviors as u64;
        if let Err(err) = self.repository.record_usage_event(&request.user_id, &saved.id, quota_amount).await {
            warn!(%err, "failed to record usage event");
        }
        if let Err(err) = self.repository.record_user_history(&request.user_id, &saved.id).await {
            warn!(%err, "failed to record user history");
        }

        let pipeline_stats = PipelineStats {
            phase1_usage,
            phase2_usage: behavior_output.usage,
            phase1_duration_ms,
            phase2_duration_ms,
        };

        Ok(GenerateResult {
            cache_hit: false,
            content_hash: Some(content_hash),
            document_id: saved.id,
            analysis_context: context.clone(),
            behavior_cache_stats: Some(behavior_output.cache_stats),
            pipeline_stats: Some(pipeline_stats),
        })
    }
}

/// Merges placements for newly-discovered tests into an existing
/// (already-compacted) taxonomy, self-healing to Uncategorized/General
/// when a placement names a domain/feature pair that isn't there.
fn merge_placements(mut phase1: Phase1Output, placements: Vec<crate::provider::Placement>) -> Phase1Output {
    use crate::model::{DomainGroup, FeatureGroup};
    use crate::provider::{UNCATEGORIZED_DOMAIN, UNCATEGORIZED_FEATURE};

    for placement in placements {
        let exists = phase1
            .domains
            .iter()
            .any(|d| d.name == placement.domain && d.features.iter().any(|f| f.name == placement.feature));

        let (domain_name, feature_name) = if exists && !placement.domain.is_empty() && !placement.feature.is_empty() {
            (placement.domain, placement.feature)
        } else {
            (UNCATEGORIZED_DOMAIN.to_string(), UNCATEGORIZED_FEATURE.to_string())
        };

        let domain = match phase1.domains.iter_mut().find(|d| d.name == domain_name) {
            Some(d) => d,
            None => {
                phase1.domains.push(DomainGroup {
                    name: domain_name.clone(),
                    description: format!("{domain_name} (self-healed)"),
                    confidence: 0.0,
                    features: Vec::new(),
                });
                phase1.domains.last_mut().unwrap()
            }
        };

        match domain.features.iter_mut().find(|f| f.name == feature_name) {
            Some(feature) => feature.test_indices.push(placement.test_index),
            None => domain.features.push(FeatureGroup {
                name: feature_name,
                description: "placed by incremental reclassification".to_string(),
                confidence: 0.0,
                test_indices: vec![placement.test_index],
            }),
        }
    }

    phase1
}

fn assemble_document(
    analysis_id: &str,
    language: Language,
    model_id: &str,
    phase1: &Phase1Output,
    results: &[crate::behavior_phase::FeatureTaskResult],
    full_index: &HashMap<u32, TestInfo>,
    content_hash: Vec<u8>,
) -> SpecDocument {
    let mut behaviors_by_position: HashMap<(usize, usize), Vec<DocumentBehavior>> = HashMap::new();

    for result in results {
        let behaviors = result
            .behaviors
            .iter()
            .map(|b| {
                let test = full_index.get(&b.test_index);
                DocumentBehavior {
                    test_index: b.test_index,
                    original_name: test.map(|t| t.name.clone()).unwrap_or_default(),
                    test_case_id: test.map(|t| t.test_case_id.clone()).unwrap_or_default(),
                    description: b.description.clone(),
                    confidence: b.confidence,
                }
            })
            .collect();
        behaviors_by_position.insert((result.domain_index, result.feature_index), behaviors);
    }

    let domains = phase1
        .domains
        .iter()
        .enumerate()
        .map(|(domain_index, domain)| DocumentDomain {
            name: domain.name.clone(),
            description: domain.description.clone(),
            confidence: domain.confidence,
            features: domain
                .features
                .iter()
                .enumerate()
                .map(|(feature_index, feature)| DocumentFeature {
                    name: feature.name.clone(),
                    description: feature.description.clone(),
                    confidence: feature.confidence,
                    behaviors: behaviors_by_position
                        .remove(&(domain_index, feature_index))
                        .unwrap_or_default(),
                })
                .collect(),
        })
        .collect();

    SpecDocument {
        id: String::new(),
        analysis_id: analysis_id.to_string(),
        language,
        model_id: model_id.to_string(),
        created_at: chrono::Utc::now(),
        content_hash,
        domains,
    }
}
