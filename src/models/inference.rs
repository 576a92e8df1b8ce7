//! Fit-once, score-many anomaly model handle

use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use crate::models::forest::IsolationForest;
use crate::models::scaler::StandardScaler;
use crate::models::AnomalyModel;
use crate::types::transaction::{FLAG_ANOMALOUS, FLAG_NORMAL};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Output of scoring a matrix
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScores {
    /// Decision scores; negative below the contamination threshold
    pub scores: Array1<f64>,
    /// -1 anomalous, +1 normal
    pub flags: Array1<i8>,
}

impl ModelScores {
    pub fn n_anomalies(&self) -> usize {
        self.flags.iter().filter(|&&f| f == FLAG_ANOMALOUS).count()
    }
}

/// Complete fitted state: scaling statistics, ensemble and threshold offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    scaler: StandardScaler,
    forest: IsolationForest,
    /// Contamination percentile of the raw training scores
    offset: f64,
    params: ModelConfig,
    training_rows: usize,
    fitted_at: DateTime<Utc>,
}

impl FittedModel {
    fn fit(data: &Array2<f64>, params: &ModelConfig) -> Result<Self> {
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(PipelineError::fit(format!(
                "contamination {} outside (0, 0.5]",
                params.contamination
            )));
        }

        let scaler = StandardScaler::fit(data)?;
        let scaled = scaler.transform(data)?;
        let forest = IsolationForest::fit(
            &scaled,
            params.n_estimators,
            params.max_samples,
            params.random_seed,
        )?;
        let raw = forest.score_samples(&scaled)?;
        let offset = percentile(raw.to_vec(), params.contamination);

        Ok(Self {
            scaler,
            forest,
            offset,
            params: params.clone(),
            training_rows: data.nrows(),
            fitted_at: Utc::now(),
        })
    }

    fn score(&self, data: &Array2<f64>) -> Result<ModelScores> {
        let scaled = self.scaler.transform(data)?;
        let scores = self.forest.score_samples(&scaled)? - self.offset;
        let flags = scores.mapv(|s| if s < 0.0 { FLAG_ANOMALOUS } else { FLAG_NORMAL });
        Ok(ModelScores { scores, flags })
    }

    pub fn n_features(&self) -> usize {
        self.scaler.n_features()
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn params(&self) -> &ModelConfig {
        &self.params
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    pub fn fitted_at(&self) -> DateTime<Utc> {
        self.fitted_at
    }
}

/// `q`-quantile with linear interpolation between closest ranks.
fn percentile(mut values: Vec<f64>, q: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let position = q * (values.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    values[lower] + (values[upper] - values[lower]) * (position - lower as f64)
}

/// Isolation forest with standardized inputs and a contamination-calibrated flag.
pub struct IsolationForestModel {
    config: ModelConfig,
    fitted: Option<FittedModel>,
}

impl IsolationForestModel {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    /// Wrap previously fitted state, e.g. one loaded from disk.
    pub fn from_fitted(fitted: FittedModel) -> Self {
        Self {
            config: fitted.params.clone(),
            fitted: Some(fitted),
        }
    }

    pub fn fitted(&self) -> Option<&FittedModel> {
        self.fitted.as_ref()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

impl AnomalyModel for IsolationForestModel {
    fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        info!(
            rows = data.nrows(),
            features = data.ncols(),
            n_estimators = self.config.n_estimators,
            contamination = self.config.contamination,
            seed = self.config.random_seed,
            "Fitting isolation forest"
        );

        // Built off to the side; the previous state stays in place if this fails.
        let fitted = FittedModel::fit(data, &self.config)?;

        info!(
            trees = fitted.forest.n_estimators(),
            sample_size = fitted.forest.sample_size(),
            offset = fitted.offset,
            "Isolation forest fitted"
        );
        self.fitted = Some(fitted);
        Ok(())
    }

    fn score(&self, data: &Array2<f64>) -> Result<ModelScores> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| PipelineError::contract("model has not been fitted"))?;
        let scores = fitted.score(data)?;

        debug!(
            rows = data.nrows(),
            anomalies = scores.n_anomalies(),
            "Scored feature matrix"
        );
        Ok(scores)
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn name(&self) -> &str {
        "isolation_forest"
    }
}
