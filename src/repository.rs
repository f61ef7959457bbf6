//! Persistence contract. The core never opens a physical store itself; it
//! only depends on this trait, so callers can back it with whatever table
//! layout they like.

use crate::error::{Result, SpecViewError};
use crate::model::{AnalysisContext, BehaviorCacheEntry, FileInfo, Language, SpecDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get_test_data_by_analysis_id(&self, analysis_id: &str) -> Result<Vec<FileInfo>>;

    /// Fails with `SpecViewError::AnalysisNotFound` if absent.
    async fn get_analysis_context(&self, analysis_id: &str) -> Result<AnalysisContext>;

    async fn find_document_by_content_hash(
        &self,
        user_id: &str,
        content_hash: &[u8],
        language: Language,
        model_id: &str,
    ) -> Result<Option<SpecDocument>>;

    /// Assigns and returns the document's id. `user_id` scopes the document
    /// cache index so it agrees with `find_document_by_content_hash`'s key.
    async fn save_document(&self, user_id: &str, document: SpecDocument) -> Result<SpecDocument>;

    /// Sparse lookup: only hashes with a cached entry appear in the result.
    async fn find_cached_behaviors(&self, key_hashes: &[String]) -> Result<HashMap<String, String>>;

    /// Upsert on `(keyHashHex)`; idempotent under concurrent writers.
    async fn save_behavior_cache(&self, entries: &[BehaviorCacheEntry]) -> Result<()>;

    /// Side-channel: failures are logged by the caller, never escalated.
    async fn record_usage_event(&self, user_id: &str, document_id: &str, quota_amount: u64) -> Result<()>;

    /// Side-channel: failures are logged by the caller, never escalated.
    async fn record_user_history(&self, user_id: &str, document_id: &str) -> Result<()>;
}

/// In-memory backing store for tests and for embedding the pipeline
/// somewhere that doesn't yet have a real relational store wired up.
#[derive(Default)]
pub struct InMemoryRepository {
    inventories: RwLock<HashMap<String, Vec<FileInfo>>>,
    contexts: RwLock<HashMap<String, AnalysisContext>>,
    documents: RwLock<HashMap<String, SpecDocument>>,
    document_index: RwLock<HashMap<(String, Vec<u8>, String, String), String>>,
    behavior_cache: RwLock<HashMap<String, String>>,
    usage_events: RwLock<Vec<(String, String, u64)>>,
    history: RwLock<Vec<(String, String)>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_inventory(&self, analysis_id: impl Into<String>, files: Vec<FileInfo>) {
        self.inventories.write().await.insert(analysis_id.into(), files);
    }

    pub async fn seed_context(&self, analysis_id: impl Into<String>, context: AnalysisContext) {
        self.contexts.write().await.insert(analysis_id.into(), context);
    }

    pub async fn usage_event_count(&self) -> usize {
        self.usage_events.read().await.len()
    }

    pub async fn history_count(&self) -> usize {
        self.history.read().await.len()
    }
}

fn document_key(user_id: &str, content_hash: &[u8], language: Language, model_id: &str) -> (String, Vec<u8>, String, String) {
    (user_id.to_string(), content_hash.to_vec(), language.to_string(), model_id.to_string())
}

#[async_trait]
impl DocumentRepository for InMemoryRepository {
    async fn get_test_data_by_analysis_id(&self, analysis_id: &str) -> Result<Vec<FileInfo>> {
        Ok(self.inventories.read().await.get(analysis_id).cloned().unwrap_or_default())
    }

    async fn get_analysis_context(&self, analysis_id: &str) -> Result<AnalysisContext> {
        self.contexts
            .read()
            .await
            .get(analysis_id)
            .cloned()
            .ok_or_else(|| SpecViewError::AnalysisNotFound(analysis_id.to_string()))
    }

    async fn find_document_by_content_hash(
        &self,
        user_id: &str,
        content_hash: &[u8],
        language: Language,
        model_id: &str,
    ) -> Result<Option<SpecDocument>> {
        let key = document_key(user_id, content_hash, language, model_id);
        let index = self.document_index.read().await;
        match index.get(&key) {
            Some(doc_id) => Ok(self.documents.read().await.get(doc_id).cloned()),
            None => Ok(None),
        }
    }

    async fn save_document(&self, user_id: &str, mut document: SpecDocument) -> Result<SpecDocument> {
        if document.id.is_empty() {
            document.id = uuid::Uuid::new_v4().to_string();
        }

        let key = document_key(user_id, &document.content_hash, document.language, &document.model_id);

        self.documents.write().await.insert(document.id.clone(), document.clone());
        self.document_index.write().await.insert(key, document.id.clone());
        Ok(document)
    }

    async fn find_cached_behaviors(&self, key_hashes: &[String]) -> Result<HashMap<String, String>> {
        let cache = self.behavior_cache.read().await;
        Ok(key_hashes
            .iter()
            .filter_map(|hash| cache.get(hash).map(|desc| (hash.clone(), desc.clone())))
            .collect())
    }

    async fn save_behavior_cache(&self, entries: &[BehaviorCacheEntry]) -> Result<()> {
        let mut cache = self.behavior_cache.write().await;
        for entry in entries {
            cache.insert(entry.key_hash_hex.clone(), entry.description.clone());
        }
        Ok(())
    }

    async fn record_usage_event(&self, user_id: &str, document_id: &str, quota_amount: u64) -> Result<()> {
        self.usage_events
            .write()
            .await
            .push((user_id.to_string(), document_id.to_string(), quota_amount));
        Ok(())
    }

    async fn record_user_history(&self, user_id: &str, document_id: &str) -> Result<()> {
        self.history.write().await.push((user_id.to_string(), document_id.to_string()));
        Ok(())
    }
}

/// Convenience alias for the common `Arc<dyn DocumentRepository>` shape
/// used by the use case.
pub type SharedRepository = Arc<dyn DocumentRepository>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocumentDomain, TestInfo};

    fn sample_document() -> SpecDocument {
        SpecDocument {
            id: String::new(),
            analysis_id: "a-1".into(),
            language: Language::English,
            model_id: "gpt-4".into(),
            created_at: chrono::Utc::now(),
            content_hash: vec![1, 2, 3],
            domains: vec![],
        }
    }

    #[tokio::test]
    async fn save_document_assigns_id_and_is_retrievable_by_hash() {
        let repo = InMemoryRepository::new();
        let saved = repo.save_document("u-1", sample_document()).await.unwrap();
        assert!(!saved.id.is_empty());

        let found = repo
            .find_document_by_content_hash("u-1", &[1, 2, 3], Language::English, "gpt-4")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, saved.id);
    }

    #[tokio::test]
    async fn get_analysis_context_fails_when_absent() {
        let repo = InMemoryRepository::new();
        let err = repo.get_analysis_context("missing").await.unwrap_err();
        assert!(matches!(err, SpecViewError::AnalysisNotFound(_)));
    }

    #[tokio::test]
    async fn behavior_cache_lookup_is_sparse() {
        let repo = InMemoryRepository::new();
        repo.save_behavior_cache(&[BehaviorCacheEntry {
            key_hash_hex: "abc".into(),
            description: "does a thing".into(),
        }])
        .await
        .unwrap();

        let found = repo
            .find_cached_behaviors(&["abc".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("abc").unwrap(), "does a thing");
    }

    #[tokio::test]
    async fn inventory_round_trips() {
        let repo = InMemoryRepository::new();
        let files = vec![FileInfo {
            path: "a.test.ts".into(),
            framework: "jest".into(),
            tests: vec![TestInfo {
                index: 0,
                name: "t".into(),
                suite_path: None,
                test_case_id: "tc".into(),
            }],
        }];
        repo.seed_inventory("a-1", files.clone()).await;
        let loaded = repo.get_test_data_by_analysis_id("a-1").await.unwrap();
        assert_eq!(loaded, files);
    }

    #[test]
    fn document_domain_type_is_constructible() {
        let _ = DocumentDomain {
            name: "d".into(),
            description: "desc".into(),
            confidence: 0.5,
            features: vec![],
        };
    }
}
