//! Fraud Risk Pipeline Library
//!
//! Batch fraud-risk scoring over heterogeneous transaction tables: schema
//! unification, behavioral features, an isolation forest anomaly model and
//! three-tier risk classification.

pub mod config;
pub mod error;
pub mod feature_extractor;
pub mod metrics;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod source;
pub mod types;
pub mod unifier;

pub use config::AppConfig;
pub use error::{PipelineError, Result};
pub use feature_extractor::FeatureExtractor;
pub use models::{AnomalyModel, IsolationForestModel, ModelStore};
pub use output::ResultWriter;
pub use pipeline::{Pipeline, PipelineOutput, RunSummary};
pub use source::SourceTable;
pub use types::{risk::RiskLevel, transaction::ScoredTransaction};
pub use unifier::SchemaUnifier;
