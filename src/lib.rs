// Sanctions Tracer - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod models;
pub mod config;
pub mod normalizer;  // Entity Normalizer - OFAC / EU / UK records
pub mod quality;     // Data-quality checks on raw records
pub mod aggregator;  // Multi-source merge + conflict resolution
pub mod index;       // Designated-Set Index (atomic snapshots)
pub mod graph;       // Graph accessor + counterparty tags
pub mod classifier;  // Evasion-pattern rules
pub mod scorer;      // Risk scores + tiers
pub mod tracer;      // Bounded BFS network tracer

// Re-export commonly used types
pub use error::TraceError;
pub use models::{
    Chain, CounterpartyTag, CryptoAddress, DesignatedAddress, DesignationStatus,
    SanctionedEntity, SanctionsSource, SourceDesignation, Transaction,
    normalize_address, validate_address,
};
pub use config::{Settings, TracerConfig, ScoringConfig, AggregatorConfig, PatternWeights};
pub use normalizer::{
    RawRecord, SourceNormalizer,
    OfacNormalizer, OfacEntry, EuNormalizer, EuEntry, UkNormalizer,
};
pub use quality::{DataQualityEngine, QualityReport, QualityIssue, Severity, BatchSummary};
pub use aggregator::{
    SanctionsAggregator, AggregationReport, CrossReference, SanctionsFeed, StaticFeed,
};
pub use index::{DesignatedSetIndex, DesignatedSetHandle};
pub use graph::{GraphAccessor, TagLookup, TagRegistry, InMemoryGraph, GraphSnapshot};
pub use classifier::{
    PatternClassifier, ClassificationRule, ClassificationContext, EvasionPattern, RuleCondition,
};
pub use scorer::{RiskScorer, RiskTier};
pub use tracer::{
    NetworkTracer, TraceRequest, TraceResult, TraceNode, TraceEdge, NodeStatus, Coverage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
