//! Scenario 5: incremental reclassification -- a cached taxonomy loses one
//! test and gains another; the diff + placement path should produce the
//! same final shape a full reclassification would, without re-running
//! Phase 1.

use specview_core::model::{DomainGroup, FeatureGroup, TestIdentity, TestKey};
use specview_core::{
    AnalysisContext, FileInfo, GenerateRequest, GenerateUseCase, InMemoryRepository, Language,
    Phase1Output, PipelineConfig, TestInfo,
};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn diff_and_placement_replaces_logout_with_create_user() {
    let analysis_id = "a-1";
    let repo = Arc::new(InMemoryRepository::new());
    repo.seed_context(
        analysis_id,
        AnalysisContext { host: "github.com".into(), owner: "acme".into(), repo: "widgets".into() },
    )
    .await;

    // Current inventory: TestLogout is gone, TestCreateUser is new.
    let current_files = vec![
        FileInfo {
            path: "test/auth_test.go".into(),
            framework: "go-test".into(),
            tests: vec![TestInfo {
                index: 0,
                name: "TestLogin".into(),
                suite_path: Some("Login".into()),
                test_case_id: "tc-0".into(),
            }],
        },
        FileInfo {
            path: "test/user_test.go".into(),
            framework: "go-test".into(),
            tests: vec![TestInfo {
                index: 2,
                name: "TestCreateUser".into(),
                suite_path: Some("UserCreation".into()),
                test_case_id: "tc-2".into(),
            }],
        },
    ];
    repo.seed_inventory(analysis_id, current_files).await;

    let previous_phase1 = Phase1Output {
        domains: vec![DomainGroup {
            name: "Authentication".into(),
            description: "auth".into(),
            confidence: 0.9,
            features: vec![
                FeatureGroup { name: "Login".into(), description: "login".into(), confidence: 0.9, test_indices: vec![0] },
                FeatureGroup { name: "Logout".into(), description: "logout".into(), confidence: 0.9, test_indices: vec![1] },
            ],
        }],
    };

    let mut previous_keys = HashMap::new();
    previous_keys.insert(
        TestKey::new("test/auth_test.go", Some("Login".into()), "TestLogin"),
        TestIdentity { domain_index: 0, feature_index: 0, test_index: 0 },
    );
    previous_keys.insert(
        TestKey::new("test/auth_test.go", Some("Logout".into()), "TestLogout"),
        TestIdentity { domain_index: 0, feature_index: 1, test_index: 1 },
    );

    let provider = Arc::new(specview_core::MockProvider::new());
    let use_case = GenerateUseCase::new(provider, repo.clone(), PipelineConfig::new());

    let result = use_case
        .run_incremental(
            &previous_phase1,
            &previous_keys,
            GenerateRequest {
                analysis_id: analysis_id.into(),
                language: Language::English,
                model_id: None,
                user_id: "u-1".into(),
                force_regenerate: false,
            },
        )
        .await
        .unwrap();

    assert!(!result.cache_hit);
    let stats = result.behavior_cache_stats.unwrap();
    assert_eq!(stats.total_behaviors, 2);
}
