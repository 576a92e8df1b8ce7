//! Risk tier classification

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal fraud-risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Determine risk level from an anomaly score and thresholds.
    ///
    /// Lower scores are more anomalous, so the comparison runs the other way
    /// round from a probability-style score.
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score < thresholds.high {
            RiskLevel::High
        } else if score < thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }

    pub fn all() -> [RiskLevel; 3] {
        [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High]
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configurable score cut-offs.
///
/// `score < high` is High, `high <= score < medium` is Medium, anything else Low.
/// The defaults are inherited values, not calibrated against labeled outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
}

fn default_high() -> f64 {
    -0.20
}

fn default_medium() -> f64 {
    0.0
}

impl RiskLevelThresholds {
    pub fn validate(&self) -> Result<()> {
        if !self.high.is_finite() || !self.medium.is_finite() {
            return Err(PipelineError::config("risk thresholds must be finite"));
        }
        if self.high > self.medium {
            return Err(PipelineError::config(format!(
                "high threshold {} is above medium threshold {}",
                self.high, self.medium
            )));
        }
        Ok(())
    }
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            high: default_high(),
            medium: default_medium(),
        }
    }
}
