//! Incremental reclassification diff engine.
//!
//! Compares a prior taxonomy (indexed by stable `TestKey` identity) against
//! a current inventory to find tests that appeared or disappeared, and
//! compacts the taxonomy after deletions.

use crate::model::{DomainGroup, Phase1Output, TestDiff, TestIdentity, TestInfo, TestKey};
use std::collections::HashMap;

/// Computes the set of new and deleted tests between a previously-known
/// index (keyed by stable identity) and the current inventory.
///
/// `previous_keys` maps each test's stable identity to where it lived in
/// the prior taxonomy. `current_tests` is the full current inventory with
/// each entry's `(file_path, suite_path, name)` used to look it up.
pub fn calculate_test_diff(
    previous_keys: &HashMap<TestKey, TestIdentity>,
    current_tests: &[(String, TestInfo)],
) -> TestDiff {
    let mut seen = std::collections::HashSet::new();
    let mut new_tests = Vec::new();

    for (file_path, test) in current_tests {
        let key = TestKey::new(file_path.clone(), test.suite_path.clone(), test.name.clone());
        seen.insert(key.clone());
        if !previous_keys.contains_key(&key) {
            new_tests.push(test.clone());
        }
    }

    let mut deleted_tests: Vec<TestIdentity> = previous_keys
        .iter()
        .filter(|(key, _)| !seen.contains(*key))
        .map(|(_, identity)| *identity)
        .collect();
    deleted_tests.sort();

    TestDiff {
        new_tests,
        deleted_tests,
    }
}

/// Removes the given test identities from a taxonomy, then drops any
/// feature left with zero tests and any domain left with zero features —
/// an empty bucket carries no information and would otherwise accumulate
/// across repeated incremental runs.
pub fn remove_deleted_test_indices(phase1: &Phase1Output, deleted: &[TestIdentity]) -> Phase1Output {
    let deleted_indices: std::collections::HashSet<u32> = deleted.iter().map(|d| d.test_index).collect();

    let domains: Vec<DomainGroup> = phase1
        .domains
        .iter()
        .filter_map(|domain| {
            let features: Vec<_> = domain
                .features
                .iter()
                .filter_map(|feature| {
                    let test_indices: Vec<u32> = feature
                        .test_indices
                        .iter()
                        .copied()
                        .filter(|idx| !deleted_indices.contains(idx))
                        .collect();
                    if test_indices.is_empty() {
                        None
                    } else {
                        let mut feature = feature.clone();
                        feature.test_indices = test_indices;
                        Some(feature)
                    }
                })
                .collect();

            if features.is_empty() {
                None
            } else {
                let mut domain = domain.clone();
                domain.features = features;
                Some(domain)
            }
        })
        .collect();

    Phase1Output { domains }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureGroup;

    fn sample_phase1() -> Phase1Output {
        Phase1Output {
            domains: vec![DomainGroup {
                name: "Authentication".into(),
                description: "auth".into(),
                confidence: 0.9,
                features: vec![
                    FeatureGroup {
                        name: "Login".into(),
                        description: "login".into(),
                        confidence: 0.9,
                        test_indices: vec![0, 1],
                    },
                    FeatureGroup {
                        name: "Logout".into(),
                        description: "logout".into(),
                        confidence: 0.8,
                        test_indices: vec![2],
                    },
                ],
            }],
        }
    }

    #[test]
    fn finds_new_and_deleted_tests() {
        let mut previous = HashMap::new();
        previous.insert(
            TestKey::new("a.test.ts", Some("Login".into()), "rejects bad password"),
            TestIdentity {
                domain_index: 0,
                feature_index: 0,
                test_index: 0,
            },
        );
        previous.insert(
            TestKey::new("a.test.ts", Some("Login".into()), "accepts good password"),
            TestIdentity {
                domain_index: 0,
                feature_index: 0,
                test_index: 1,
            },
        );

        let current = vec![(
            "a.test.ts".to_string(),
            TestInfo {
                index: 0,
                name: "rejects bad password".into(),
                suite_path: Some("Login".into()),
                test_case_id: "tc-1".into(),
            },
        ), (
            "a.test.ts".to_string(),
            TestInfo {
                index: 5,
                name: "locks account after 5 attempts".into(),
                suite_path: Some("Login".into()),
                test_case_id: "tc-5".into(),
            },
        )];

        let diff = calculate_test_diff(&previous, &current);
        assert_eq!(diff.new_tests.len(), 1);
        assert_eq!(diff.new_tests[0].name, "locks account after 5 attempts");
        assert_eq!(diff.deleted_tests.len(), 1);
        assert_eq!(diff.deleted_tests[0].test_index, 1);
    }

    #[test]
    fn empty_diff_when_nothing_changed() {
        let mut previous = HashMap::new();
        previous.insert(
            TestKey::new("a.test.ts", None, "t"),
            TestIdentity {
                domain_index: 0,
                feature_index: 0,
                test_index: 0,
            },
        );
        let current = vec![(
            "a.test.ts".to_string(),
            TestInfo {
                index: 0,
                name: "t".into(),
                suite_path: None,
                test_case_id: "tc".into(),
            },
        )];

        let diff = calculate_test_diff(&previous, &current);
        assert!(diff.new_tests.is_empty());
        assert!(diff.deleted_tests.is_empty());
    }

    #[test]
    fn compacts_empty_feature_after_deletion() {
        let phase1 = sample_phase1();
        let deleted = vec![TestIdentity {
            domain_index: 0,
            feature_index: 1,
            test_index: 2,
        }];

        let result = remove_deleted_test_indices(&phase1, &deleted);
        assert_eq!(result.domains.len(), 1);
        assert_eq!(result.domains[0].features.len(), 1);
        assert_eq!(result.domains[0].features[0].name, "Login");
    }

    #[test]
    fn compacts_empty_domain_when_all_features_empty() {
        let phase1 = sample_phase1();
        let deleted = vec![
            TestIdentity {
                domain_index: 0,
                feature_index: 0,
                test_index: 0,
            },
            TestIdentity {
                domain_index: 0,
                feature_index: 0,
                test_index: 1,
            },
            TestIdentity {
                domain_index: 0,
                feature_index: 1,
                test_index: 2,
            },
        ];

        let result = remove_deleted_test_indices(&phase1, &deleted);
        assert!(result.domains.is_empty());
    }

    #[test]
    fn partial_deletion_leaves_remaining_indices_intact() {
        let phase1 = sample_phase1();
        let deleted = vec![TestIdentity {
            domain_index: 0,
            feature_index: 0,
            test_index: 0,
        }];

        let result = remove_deleted_test_indices(&phase1, &deleted);
        assert_eq!(result.domains[0].features[0].test_indices, vec![1]);
    }
}
