//! Behavioral feature extraction over the unified dataset.
//!
//! Every feature is a population statistic (group count or group mean) broadcast back
//! to the member rows, so features are always computed over the whole table at once.

use crate::types::transaction::{
    CanonicalTransaction, DerivedFeatures, EnrichedTransaction, MODEL_FEATURES,
};
use ndarray::Array2;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Enriched rows plus the rows that had to be discarded
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub rows: Vec<EnrichedTransaction>,
    /// Rows whose amount deviation was not finite
    pub dropped_non_finite: u64,
}

/// Derives `vendor_txn_count`, `dept_avg_amount` and `amount_deviation`.
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Create a new feature extractor.
    pub fn new() -> Self {
        Self
    }

    /// Attach group-statistic features to every record.
    ///
    /// Rows with a non-finite deviation are dropped. Dropping changes the population,
    /// so statistics are recomputed until every remaining row is consistent with them.
    pub fn extract(&self, mut records: Vec<CanonicalTransaction>) -> FeatureSet {
        let mut dropped_non_finite = 0u64;

        loop {
            let features = compute_features(&records);
            let (finite, non_finite): (Vec<_>, Vec<_>) = records
                .into_iter()
                .zip(features)
                .partition(|(_, f)| f.dept_avg_amount.is_finite() && f.amount_deviation.is_finite());

            if non_finite.is_empty() {
                debug!(
                    rows = finite.len(),
                    dropped = dropped_non_finite,
                    "Features extracted"
                );
                return FeatureSet {
                    rows: finite
                        .into_iter()
                        .map(|(record, features)| EnrichedTransaction { record, features })
                        .collect(),
                    dropped_non_finite,
                };
            }

            warn!(
                rows = non_finite.len(),
                "Dropping rows with non-finite amount deviation"
            );
            dropped_non_finite += non_finite.len() as u64;
            records = finite.into_iter().map(|(record, _)| record).collect();
        }
    }

    /// Model input matrix, one row per transaction, columns ordered as [`MODEL_FEATURES`].
    pub fn matrix(&self, rows: &[EnrichedTransaction]) -> Array2<f64> {
        let mut matrix = Array2::zeros((rows.len(), MODEL_FEATURES.len()));
        for (mut out, row) in matrix.rows_mut().into_iter().zip(rows) {
            for (cell, value) in out.iter_mut().zip(row.model_input()) {
                *cell = value;
            }
        }
        matrix
    }

    /// Get the number of model input features.
    pub fn feature_count(&self) -> usize {
        MODEL_FEATURES.len()
    }

    /// Get model input feature names, in matrix order.
    pub fn feature_names(&self) -> Vec<&'static str> {
        MODEL_FEATURES.to_vec()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn compute_features(records: &[CanonicalTransaction]) -> Vec<DerivedFeatures> {
    let mut vendor_counts: HashMap<&str, u64> = HashMap::new();
    let mut dept_totals: HashMap<&str, (f64, u64)> = HashMap::new();

    for record in records {
        *vendor_counts.entry(record.vendor.as_str()).or_insert(0) += 1;
        let total = dept_totals
            .entry(record.department.as_str())
            .or_insert((0.0, 0));
        total.0 += record.amount;
        total.1 += 1;
    }

    let dept_means: HashMap<&str, f64> = dept_totals
        .into_iter()
        .map(|(dept, (sum, count))| (dept, sum / count as f64))
        .collect();

    records
        .iter()
        .map(|record| {
            let dept_avg_amount = dept_means[record.department.as_str()];
            DerivedFeatures {
                vendor_txn_count: vendor_counts[record.vendor.as_str()],
                dept_avg_amount,
                amount_deviation: record.amount / dept_avg_amount,
            }
        })
        .collect()
}
