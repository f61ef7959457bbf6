//! Content hashing for the document cache and the behavior cache.
//!
//! Both hashes are SHA-256 over a canonical, stable-ordered serialization of
//! their inputs so semantically-identical inventories (or tests) hash
//! identically regardless of incidental ordering differences upstream.

use crate::model::{FileInfo, Language, TestInfo};
use sha2::{Digest, Sha256};

/// Hash of the full test inventory plus the parameters that affect phase
/// output, used as the document cache key. Two runs with the same files,
/// model, and language produce the same hash and may reuse a cached
/// `SpecDocument` outright.
pub fn generate_content_hash(files: &[FileInfo], model_id: &str, language: Language) -> [u8; 32] {
    let mut hasher = Sha256::new();

    let mut sorted: Vec<&FileInfo> = files.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    for file in sorted {
        hasher.update(file.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(file.framework.as_bytes());
        hasher.update([0u8]);

        let mut tests: Vec<&TestInfo> = file.tests.iter().collect();
        tests.sort_by_key(|t| t.index);
        for test in tests {
            hasher.update(test.index.to_le_bytes());
            hasher.update(test.name.as_bytes());
            hasher.update([0u8]);
            if let Some(suite) = &test.suite_path {
                hasher.update(suite.as_bytes());
            }
            hasher.update([0u8]);
            hasher.update(test.test_case_id.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
    }

    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(language.to_string().as_bytes());

    hasher.finalize().into()
}

/// Hash a content digest to its hex string, as stored/compared in
/// `SpecDocument::content_hash` and cache lookups.
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}

/// Cache key for one test's behavior entry. Deliberately independent of
/// file path and analysis id: a test that moves files or gets reclassified
/// into a different domain/feature still hits the same cache entry as long
/// as its name, suite path, language, and model agree.
pub fn behavior_cache_key(name: &str, suite_path: Option<&str>, language: Language, model_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    if let Some(suite) = suite_path {
        hasher.update(suite.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(language.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(model_id.as_bytes());
    hasher.finalize().into()
}
