//! Type definitions for the scoring pipeline

pub mod risk;
pub mod transaction;

pub use risk::{RiskLevel, RiskLevelThresholds};
pub use transaction::{
    CanonicalTransaction, DerivedFeatures, DropCounts, EnrichedTransaction, Provenance,
    ScoredTransaction,
};
