//! Two-phase AI-orchestrated pipeline that turns a flat test inventory into
//! a hierarchical Domain → Feature → Behavior specification document.
//!
//! The crate owns classification (Phase 1), behavior-sentence generation
//! (Phase 2), the document and behavior caches, the incremental
//! reclassification diff engine, and the reliability wrapper around every
//! AI provider call. It never opens a socket, a database connection, or a
//! queue consumer itself — callers provide an [`AiProvider`] and a
//! [`DocumentRepository`] and drive everything through [`GenerateUseCase`].

pub mod behavior_cache;
pub mod behavior_phase;
pub mod config;
pub mod diff;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod model;
pub mod provider;
pub mod reliability;
pub mod repository;
pub mod taxonomy_phase;
pub mod use_case;

pub use config::PipelineConfig;
pub use error::{Result, SpecViewError};
pub use model::{
    AnalysisContext, BehaviorCacheEntry, BehaviorCacheStats, BehaviorSpec, DomainGroup,
    FeatureGroup, FileInfo, Language, Phase1Output, PipelineStats, SpecDocument, TestDiff,
    TestIdentity, TestInfo, TestKey, TokenUsage,
};
pub use provider::{AiProvider, BatchedProvider, MockProvider};
pub use repository::{DocumentRepository, InMemoryRepository};
pub use use_case::{GenerateRequest, GenerateResult, GenerateUseCase};
