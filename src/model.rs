//! Core data model: test inventory, taxonomy tree, behaviors, and the
//! assembled spec document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recognized document languages (wire value matches the enum variant name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Korean,
    English,
    Japanese,
    Spanish,
    French,
    German,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Korean,
        Language::English,
        Language::Japanese,
        Language::Spanish,
        Language::French,
        Language::German,
    ];
}

impl Default for Language {
    fn default() -> Self {
        Language::English
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Korean => "Korean",
            Language::English => "English",
            Language::Japanese => "Japanese",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Korean" => Ok(Language::Korean),
            "English" => Ok(Language::English),
            "Japanese" => Ok(Language::Japanese),
            "Spanish" => Ok(Language::Spanish),
            "French" => Ok(Language::French),
            "German" => Ok(Language::German),
            other => Err(format!("unrecognized language: {other}")),
        }
    }
}

/// A single test case within one file. Immutable once emitted by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    /// Unique within one inventory.
    pub index: u32,
    pub name: String,
    /// Enclosing describe/class hierarchy, dotted.
    pub suite_path: Option<String>,
    /// Opaque external identifier.
    pub test_case_id: String,
}

/// A source file contributing tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub framework: String,
    pub tests: Vec<TestInfo>,
}

/// Canonical identity of a test under incremental reclassification:
/// `(filePath, suitePath, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestKey {
    pub file_path: String,
    pub suite_path: Option<String>,
    pub name: String,
}

impl TestKey {
    pub fn new(file_path: impl Into<String>, suite_path: Option<String>, name: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            suite_path,
            name: name.into(),
        }
    }
}

/// A second-level grouping under a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub test_indices: Vec<u32>,
}

/// A top-level classification bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainGroup {
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub features: Vec<FeatureGroup>,
}

/// The taxonomy tree produced by Phase 1, before behavior sentences attach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phase1Output {
    pub domains: Vec<DomainGroup>,
}

impl Phase1Output {
    /// All test indices covered by this taxonomy, in domain/feature order.
    pub fn all_test_indices(&self) -> Vec<u32> {
        self.domains
            .iter()
            .flat_map(|d| d.features.iter())
            .flat_map(|f| f.test_indices.iter().copied())
            .collect()
    }

    /// Coordinates of the given test index within this taxonomy, if present.
    pub fn locate(&self, test_index: u32) -> Option<TestIdentity> {
        for (domain_index, domain) in self.domains.iter().enumerate() {
            for (feature_index, feature) in domain.features.iter().enumerate() {
                if feature.test_indices.contains(&test_index) {
                    return Some(TestIdentity {
                        domain_index,
                        feature_index,
                        test_index,
                    });
                }
            }
        }
        None
    }
}

/// AI-generated rendering for one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSpec {
    pub test_index: u32,
    pub description: String,
    pub confidence: f64,
}

impl BehaviorSpec {
    /// A fallback entry: confidence 0, description equal to the raw test name.
    pub fn fallback(test_index: u32, raw_name: impl Into<String>) -> Self {
        Self {
            test_index,
            description: raw_name.into(),
            confidence: 0.0,
        }
    }
}

/// A behavior joined with its originating test's name and external id, as
/// it appears inline under a feature in the finished document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBehavior {
    pub test_index: u32,
    pub original_name: String,
    pub test_case_id: String,
    pub description: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFeature {
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub behaviors: Vec<DocumentBehavior>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentDomain {
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub features: Vec<DocumentFeature>,
}

/// The finished artifact. Immutable once saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDocument {
    pub id: String,
    pub analysis_id: String,
    pub language: Language,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: Vec<u8>,
    pub domains: Vec<DocumentDomain>,
}

/// `(cacheKeyHash, description)` — key derivation is independent of file
/// path and analysis id so a renamed/moved test reuses its description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorCacheEntry {
    pub key_hash_hex: String,
    pub description: String,
}

/// Coordinates of a test inside a prior `Phase1Output`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestIdentity {
    pub domain_index: usize,
    pub feature_index: usize,
    pub test_index: u32,
}

/// `(newTests, deletedTests)` produced by comparing a cached index map to a
/// current inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestDiff {
    pub new_tests: Vec<TestInfo>,
    pub deleted_tests: Vec<TestIdentity>,
}

/// `(host, owner, repo)` for logging and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

/// Token usage returned by one AI call, accumulated for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub candidates_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn combine(&self, other: &TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            candidates_tokens: self.candidates_tokens + other.candidates_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// Ambient observability roll-up: token usage and wall-clock duration per
/// phase, additive to the outbound result shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub phase1_usage: TokenUsage,
    pub phase2_usage: TokenUsage,
    pub phase1_duration_ms: u64,
    pub phase2_duration_ms: u64,
}

/// Hit-rate statistics returned by the behavior cache coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorCacheStats {
    pub total_behaviors: usize,
    pub cached_behaviors: usize,
    pub generated_behaviors: usize,
}

impl BehaviorCacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_behaviors == 0 {
            0.0
        } else {
            self.cached_behaviors as f64 / self.total_behaviors as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trips_through_display_and_fromstr() {
        for lang in Language::ALL {
            let s = lang.to_string();
            assert_eq!(Language::from_str(&s).unwrap(), lang);
        }
    }

    #[test]
    fn phase1_output_locates_test_indices() {
        let output = Phase1Output {
            domains: vec![DomainGroup {
                name: "Authentication".into(),
                description: "auth".into(),
                confidence: 0.9,
                features: vec![FeatureGroup {
                    name: "Login".into(),
                    description: "login".into(),
                    confidence: 0.9,
                    test_indices: vec![0, 1],
                }],
            }],
        };

        assert_eq!(
            output.locate(1),
            Some(TestIdentity {
                domain_index: 0,
                feature_index: 0,
                test_index: 1
            })
        );
        assert_eq!(output.locate(99), None);
        assert_eq!(output.all_test_indices(), vec![0, 1]);
    }

    #[test]
    fn behavior_cache_stats_hit_rate() {
        let stats = BehaviorCacheStats {
            total_behaviors: 4,
            cached_behaviors: 2,
            generated_behaviors: 2,
        };
        assert_eq!(stats.hit_rate(), 0.5);

        let empty = BehaviorCacheStats::default();
        assert_eq!(empty.hit_rate(), 0.0);
    }
}
