//! Phase 2: fan out per-feature test-name conversion with bounded
//! concurrency, per-feature timeouts, cache-aware skipping, and
//! fallback-on-failure.
//!
//! Grounded directly on the bounded-concurrency evaluation runner pattern:
//! a `Semaphore` gates how many feature tasks run at once, each task is
//! wrapped in its own `tokio::time::timeout`, and results are written into
//! a pre-sized, position-indexed slice so the final order never depends on
//! which task finished first.

use crate::behavior_cache::{lookup_cached, write_generated};
use crate::error::{Result, SpecViewError};
use crate::model::{BehaviorCacheStats, BehaviorSpec, Language, Phase1Output, TokenUsage};
use crate::provider::{AiProvider, ConvertTestNamesInput, NamedTest};
use crate::reliability::{retry_with_backoff, BackoffPolicy};
use crate::repository::DocumentRepository;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument};

pub const DEFAULT_PHASE2_TIMEOUT: Duration = Duration::from_secs(7 * 60);
pub const DEFAULT_FEATURE_TIMEOUT: Duration = Duration::from_secs(90);
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_FAILURE_THRESHOLD: f64 = 0.5;

/// One `(domainIndex, featureIndex)` task with its resolved test metadata.
struct FeatureTask {
    domain_index: usize,
    feature_index: usize,
    domain_name: String,
    feature_name: String,
    tests: Vec<NamedTest>,
}

/// Outcome of one feature task, written back at its original flatten index.
pub struct FeatureTaskResult {
    pub domain_index: usize,
    pub feature_index: usize,
    pub behaviors: Vec<BehaviorSpec>,
    pub failed: bool,
}

pub struct BehaviorPhaseOutput {
    pub results: Vec<FeatureTaskResult>,
    pub usage: TokenUsage,
    pub cache_stats: BehaviorCacheStats,
}

pub struct BehaviorPhase<P: AiProvider> {
    provider: Arc<P>,
    repository: Arc<dyn DocumentRepository>,
    backoff: BackoffPolicy,
    phase_timeout: Duration,
    feature_timeout: Duration,
    concurrency: usize,
    failure_threshold: f64,
}

impl<P: AiProvider + 'static> BehaviorPhase<P> {
    pub fn new(provider: Arc<P>, repository: Arc<dyn DocumentRepository>) -> Self {
        Self {
            provider,
            repository,
            backoff: BackoffPolicy::phase2_default(),
            phase_timeout: DEFAULT_PHASE2_TIMEOUT,
            feature_timeout: DEFAULT_FEATURE_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_feature_timeout(mut self, timeout: Duration) -> Self {
        self.feature_timeout = timeout;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: f64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// `test_lookup` resolves a test index to `(name, suitePath)` — the
    /// inventory's index map.
    pub async fn run(
        &self,
        phase1: &Phase1Output,
        test_lookup: &HashMap<u32, (String, Option<String>)>,
        language: Language,
        model_id: &str,
        force_regenerate: bool,
    ) -> Result<BehaviorPhaseOutput> {
        let tasks = self.flatten_tasks(phase1, test_lookup);
        let total_tasks = tasks.len();
        let span = crate::logging::behavior_phase_span(total_tasks);
        info!(parent: &span, "starting behavior phase");

        let run_fut = self.run_tasks(tasks, language, model_id, force_regenerate);
        let outcome = tokio::time::timeout(self.phase_timeout, run_fut.instrument(span.clone())).await;

        let output = match outcome {
            Ok(output) => output,
            Err(_) => return Err(SpecViewError::AiProcessingFailed("phase 2 timed out".into())),
        };

        let total = output.results.len();
        let failed = output.results.iter().filter(|r| r.failed).count();
        let failure_rate = if total == 0 { 0.0 } else { failed as f64 / total as f64 };

        if failure_rate > self.failure_threshold {
            return Err(SpecViewError::PartialFeatureFailure {
                failed,
                total,
                threshold: self.failure_threshold,
            });
        }

        info!(parent: &span, failed, total, "behavior phase complete");
        Ok(output)
    }

    fn flatten_tasks(
        &self,
        phase1: &Phase1Output,
        test_lookup: &HashMap<u32, (String, Option<String>)>,
    ) -> Vec<FeatureTask> {
        let mut tasks = Vec::new();
        for (domain_index, domain) in phase1.domains.iter().enumerate() {
            for (feature_index, feature) in domain.features.iter().enumerate() {
                if feature.test_indices.is_empty() {
                    continue;
                }
                let tests = feature
                    .test_indices
                    .iter()
                    .filter_map(|&idx| {
                        test_lookup.get(&idx).map(|(name, _)| NamedTest {
                            index: idx,
                            name: name.clone(),
                        })
                    })
                    .collect();
                tasks.push(FeatureTask {
                    domain_index,
                    feature_index,
                    domain_name: domain.name.clone(),
                    feature_name: feature.name.clone(),
                    tests,
                });
            }
        }
        tasks
    }

    async fn run_tasks(
        &self,
        tasks: Vec<FeatureTask>,
        language: Language,
        model_id: &str,
        force_regenerate: bool,
    ) -> BehaviorPhaseOutput {
        let total_tasks = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let completed = Arc::new(AtomicU32::new(0));
        let failed_counter = Arc::new(AtomicU32::new(0));
        let log_every = (total_tasks / 10).max(1);

        let cache_stats = Arc::new(std::sync::Mutex::new(BehaviorCacheStats::default()));

        let futures = tasks.into_iter().enumerate().map(|(position, task)| {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let failed_counter = failed_counter.clone();
            let cache_stats = cache_stats.clone();
            let model_id = model_id.to_string();

            async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let (result, task_usage) = self
                    .run_one_feature(&task, language, &model_id, force_regenerate, &cache_stats)
                    .await;

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if result.failed {
                    failed_counter.fetch_add(1, Ordering::SeqCst);
                }
                if done as usize % log_every == 0 || done as usize == total_tasks {
                    info!(
                        completed = done,
                        total = total_tasks,
                        failed = failed_counter.load(Ordering::SeqCst),
                        "behavior phase progress"
                    );
                }

                (position, result, task_usage)
            }
        });

        let mut positioned: Vec<Option<FeatureTaskResult>> = (0..total_tasks).map(|_| None).collect();
        let mut usage = TokenUsage::default();

        let mut stream = stream::iter(futures).buffer_unordered(self.concurrency.max(1));
        while let Some((position, result, task_usage)) = stream.next().await {
            usage = usage.combine(&task_usage);
            positioned[position] = Some(result);
        }

        let results: Vec<FeatureTaskResult> = positioned.into_iter().flatten().collect();
        let stats = *cache_stats.lock().unwrap();

        BehaviorPhaseOutput {
            results,
            usage,
            cache_stats: stats,
        }
    }

    async fn run_one_feature(
        &self,
        task: &FeatureTask,
        language: Language,
        model_id: &str,
        force_regenerate: bool,
        cache_stats: &Arc<std::sync::Mutex<BehaviorCacheStats>>,
    ) -> (FeatureTaskResult, TokenUsage) {
        let suite_path = Some(task.feature_name.as_str());

        let cached = if force_regenerate {
            HashMap::new()
        } else {
            match lookup_cached(self.repository.as_ref(), &task.tests, suite_path, language, model_id).await {
                Ok(cached) => cached,
                Err(err) => {
                    warn!(%err, feature = %task.feature_name, "behavior cache lookup failed, treating as all-miss");
                    HashMap::new()
                }
            }
        };

        {
            let mut stats = cache_stats.lock().unwrap();
            stats.total_behaviors += task.tests.len();
            stats.cached_behaviors += cached.len();
        }

        let uncached: Vec<NamedTest> = task
            .tests
            .iter()
            .filter(|t| !cached.contains_key(&t.index))
            .cloned()
            .collect();

        if uncached.is_empty() {
            let behaviors = task
                .tests
                .iter()
                .map(|t| BehaviorSpec {
                    test_index: t.index,
                    description: cached.get(&t.index).cloned().unwrap_or_default(),
                    confidence: 1.0,
                })
                .collect();
            return (
                FeatureTaskResult {
                    domain_index: task.domain_index,
                    feature_index: task.feature_index,
                    behaviors,
                    failed: false,
                },
                TokenUsage::default(),
            );
        }

        let convert = retry_with_backoff(
            &self.backoff,
            crate::reliability::classify_provider_error,
            || {
                let uncached = &uncached;
                let domain_name = &task.domain_name;
                let feature_name = &task.feature_name;
                async move {
                    self.provider
                        .convert_test_names(ConvertTestNamesInput {
                            domain_context: domain_name,
                            feature_name,
                            language,
                            tests: uncached,
                        })
                        .await
                }
            },
        );

        let outcome = tokio::time::timeout(self.feature_timeout, convert).await;

        match outcome {
            Ok(Ok((converted, usage))) if converted.len() == uncached.len() => {
                let generated: Vec<(NamedTest, String)> = uncached
                    .iter()
                    .cloned()
                    .zip(converted.iter().map(|c| c.description.clone()))
                    .collect();

                if let Err(err) = write_generated(self.repository.as_ref(), &generated, suite_path, language, model_id).await {
                    warn!(%err, feature = %task.feature_name, "failed to persist behavior cache entries");
                }

                {
                    let mut stats = cache_stats.lock().unwrap();
                    stats.generated_behaviors += converted.len();
                }

                let mut by_index: HashMap<u32, BehaviorSpec> = converted
                    .into_iter()
                    .map(|c| {
                        (
                            c.test_index,
                            BehaviorSpec {
                                test_index: c.test_index,
                                description: c.description,
                                confidence: c.confidence,
                            },
                        )
                    })
                    .collect();

                let behaviors = task
                    .tests
                    .iter()
                    .map(|t| {
                        by_index.remove(&t.index).unwrap_or_else(|| BehaviorSpec {
                            test_index: t.index,
                            description: cached.get(&t.index).cloned().unwrap_or_default(),
                            confidence: if cached.contains_key(&t.index) { 1.0 } else { 0.0 },
                        })
                    })
                    .collect();

                (
                    FeatureTaskResult {
                        domain_index: task.domain_index,
                        feature_index: task.feature_index,
                        behaviors,
                        failed: false,
                    },
                    usage,
                )
            }
            Ok(Ok(_)) => {
                warn!(feature = %task.feature_name, "provider returned mismatched behavior count, falling back");
                (self.fallback_result(task), TokenUsage::default())
            }
            Ok(Err(err)) => {
                warn!(%err, feature = %task.feature_name, "behavior conversion failed, falling back");
                (self.fallback_result(task), TokenUsage::default())
            }
            Err(_) => {
                warn!(feature = %task.feature_name, "behavior conversion timed out, falling back");
                (self.fallback_result(task), TokenUsage::default())
            }
        }
    }

    fn fallback_result(&self, task: &FeatureTask) -> FeatureTaskResult {
        let behaviors = task
            .tests
            .iter()
            .map(|t| BehaviorSpec::fallback(t.index, t.name.clone()))
            .collect();
        FeatureTaskResult {
            domain_index: task.domain_index,
            feature_index: task.feature_index,
            behaviors,
            failed: true,
        }
    }
}
