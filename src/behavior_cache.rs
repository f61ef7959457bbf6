//! Behavior cache coordinator: looks up cached descriptions before calling
//! the AI, and persists newly-generated ones after.

use crate::error::Result;
use crate::hashing::{behavior_cache_key, to_hex};
use crate::model::{BehaviorCacheEntry, Language};
use crate::provider::NamedTest;
use crate::repository::DocumentRepository;
use std::collections::HashMap;

/// Looks up cached behavior descriptions for a batch of tests sharing one
/// feature (and thus one suite path). Returns a sparse map from test index
/// to cached description; tests with no entry are cache misses.
pub async fn lookup_cached(
    repository: &dyn DocumentRepository,
    tests: &[NamedTest],
    suite_path: Option<&str>,
    language: Language,
    model_id: &str,
) -> Result<HashMap<u32, String>> {
    let hash_by_index: HashMap<String, u32> = tests
        .iter()
        .map(|t| (to_hex(&behavior_cache_key(&t.name, suite_path, language, model_id)), t.index))
        .collect();

    let key_hashes: Vec<String> = hash_by_index.keys().cloned().collect();
    let found = repository.find_cached_behaviors(&key_hashes).await?;

    Ok(found
        .into_iter()
        .filter_map(|(hash, description)| hash_by_index.get(&hash).map(|&idx| (idx, description)))
        .collect())
}

/// Persists newly AI-generated descriptions. `results` is `(test, description)`
/// for only the tests that were actually sent to the AI.
pub async fn write_generated(
    repository: &dyn DocumentRepository,
    results: &[(NamedTest, String)],
    suite_path: Option<&str>,
    language: Language,
    model_id: &str,
) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }

    let entries: Vec<BehaviorCacheEntry> = results
        .iter()
        .map(|(test, description)| BehaviorCacheEntry {
            key_hash_hex: to_hex(&behavior_cache_key(&test.name, suite_path, language, model_id)),
            description: description.clone(),
        })
        .collect();

    repository.save_behavior_cache(&entries).await
}
