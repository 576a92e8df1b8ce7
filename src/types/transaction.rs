//! Transaction records as they move through the pipeline

use crate::types::risk::RiskLevel;
use serde::{Deserialize, Serialize};

/// Names of the model input columns, in matrix order.
pub const MODEL_FEATURES: [&str; 4] = ["amount", "vendor_txn_count", "amount_deviation", "time"];

/// Flag value for rows the model considers anomalous.
pub const FLAG_ANOMALOUS: i8 = -1;
/// Flag value for rows the model considers normal.
pub const FLAG_NORMAL: i8 = 1;

/// Marks canonical fields that were filled in rather than read from the source.
///
/// Synthesized values carry no signal about the transaction itself, so consumers
/// must be able to tell them apart from real data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub vendor_synthesized: bool,
    pub time_synthesized: bool,
    pub location_synthesized: bool,
}

/// A transaction mapped onto the canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    /// Dense identifier, unique across all unified sources
    pub transaction_id: u64,
    /// Name of the source the row came from
    pub source: String,
    /// Organizational or category grouping
    pub department: String,
    /// Counterparty label
    pub vendor: String,
    /// Transaction amount, always > 0 after unification
    pub amount: f64,
    /// Ordering key; semantics depend on the source
    pub time: f64,
    /// Bounded location category
    pub location: u32,
    /// Which of the fields above were synthesized
    pub provenance: Provenance,
}

/// Group-statistic features derived over the whole unified dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    /// Number of rows sharing this row's vendor
    pub vendor_txn_count: u64,
    /// Mean amount within this row's department
    pub dept_avg_amount: f64,
    /// `amount / dept_avg_amount`
    pub amount_deviation: f64,
}

/// A canonical record with its derived features attached
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTransaction {
    pub record: CanonicalTransaction,
    pub features: DerivedFeatures,
}

impl EnrichedTransaction {
    /// Model input vector, ordered as [`MODEL_FEATURES`].
    pub fn model_input(&self) -> [f64; 4] {
        [
            self.record.amount,
            self.features.vendor_txn_count as f64,
            self.features.amount_deviation,
            self.record.time,
        ]
    }
}

/// Final per-row output of a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTransaction {
    pub record: CanonicalTransaction,
    pub features: DerivedFeatures,
    /// Decision score; lower is more anomalous
    pub anomaly_score: f64,
    /// [`FLAG_ANOMALOUS`] or [`FLAG_NORMAL`]
    pub anomaly_flag: i8,
    pub fraud_risk: RiskLevel,
}

impl ScoredTransaction {
    pub fn is_flagged(&self) -> bool {
        self.anomaly_flag == FLAG_ANOMALOUS
    }
}

/// Rows discarded during a run, by reason
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    /// A canonical field was null or an empty label
    pub missing_field: u64,
    /// Amount was zero, negative or non-finite
    pub non_positive_amount: u64,
    /// `amount / dept_avg_amount` was not finite
    pub non_finite_deviation: u64,
}

impl DropCounts {
    pub fn total(&self) -> u64 {
        self.missing_field + self.non_positive_amount + self.non_finite_deviation
    }

    pub fn merge(&mut self, other: &DropCounts) {
        self.missing_field += other.missing_field;
        self.non_positive_amount += other.non_positive_amount;
        self.non_finite_deviation += other.non_finite_deviation;
    }
}
