//! Per-feature standardization

use crate::error::{PipelineError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Zero-mean, unit-variance scaling fitted on the training matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    /// Population standard deviation; zero-variance features are stored as 1.0
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit on a matrix with at least one row.
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(PipelineError::fit("cannot fit scaler on an empty matrix"));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::fit("feature matrix contains non-finite values"));
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::fit("cannot fit scaler on an empty matrix"))?;
        let std = data.std_axis(Axis(0), 0.0);
        if mean.iter().chain(std.iter()).any(|v| !v.is_finite()) {
            return Err(PipelineError::fit(
                "degenerate feature variance: mean or standard deviation overflows",
            ));
        }
        let scale = std.mapv(|s| if s > 0.0 { s } else { 1.0 });

        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.n_features() {
            return Err(PipelineError::contract(format!(
                "expected {} features, got {}",
                self.n_features(),
                data.ncols()
            )));
        }
        Ok((data - &self.mean) / &self.scale)
    }
}
