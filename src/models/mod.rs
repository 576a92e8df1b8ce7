//! Anomaly model components

pub mod forest;
pub mod inference;
pub mod loader;
pub mod scaler;

pub use forest::IsolationForest;
pub use inference::{FittedModel, IsolationForestModel, ModelScores};
pub use loader::ModelStore;
pub use scaler::StandardScaler;

use crate::error::Result;
use ndarray::Array2;

/// Unsupervised detector over a numeric feature matrix.
///
/// `fit` replaces all fitted state atomically: on error the previous state, if any,
/// is still usable. `score` never refits.
pub trait AnomalyModel: Send + Sync {
    /// Fit on every row of `data`.
    fn fit(&mut self, data: &Array2<f64>) -> Result<()>;

    /// Decision scores (lower = more anomalous) and -1/+1 flags per row.
    fn score(&self, data: &Array2<f64>) -> Result<ModelScores>;

    /// Check if model is fitted
    fn is_fitted(&self) -> bool;

    /// Get model name
    fn name(&self) -> &str;
}
