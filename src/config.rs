//! Configuration management for the scoring pipeline

use crate::error::{PipelineError, Result};
use crate::types::risk::RiskLevelThresholds;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// How a label field (department or vendor) is filled for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelRule {
    /// Read a named column
    Column(String),
    /// Read the column at this position
    Position(usize),
    /// Same label on every row
    Constant(String),
    /// `<prefix><row index>`, a stable per-row synthetic tag
    IdTag(String),
}

/// How the amount field is filled for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountRule {
    Column(String),
    Position(usize),
    /// Most monetary-looking numeric column, else the first numeric column
    FirstNumeric,
}

/// How the time field is filled for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRule {
    Column(String),
    /// Ingestion order within the source
    RowIndex,
}

/// How the location field is filled for a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRule {
    /// Read a numeric column, rounded to the nearest integer. Negative or unreadable
    /// values drop the row; the synthetic range does not bound real locations.
    Column(String),
    /// Uniform draw from the configured location range
    Synthetic,
}

/// Declarative column mapping for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMapping {
    /// Source identifier, used in logs and errors
    pub name: String,
    /// CSV file to load (command-line binary only)
    #[serde(default)]
    pub path: Option<String>,
    /// Business domain label used when no department rule is given
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub department: Option<LabelRule>,
    #[serde(default = "default_vendor_rule")]
    pub vendor: LabelRule,
    #[serde(default = "default_amount_rule")]
    pub amount: AmountRule,
    #[serde(default = "default_time_rule")]
    pub time: TimeRule,
    #[serde(default = "default_location_rule")]
    pub location: LocationRule,
}

fn default_vendor_rule() -> LabelRule {
    LabelRule::IdTag("Vendor_".to_string())
}

fn default_amount_rule() -> AmountRule {
    AmountRule::FirstNumeric
}

fn default_time_rule() -> TimeRule {
    TimeRule::RowIndex
}

fn default_location_rule() -> LocationRule {
    LocationRule::Synthetic
}

impl SourceMapping {
    /// Mapping with every field on its fallback rule.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            domain: None,
            department: None,
            vendor: default_vendor_rule(),
            amount: default_amount_rule(),
            time: default_time_rule(),
            location: default_location_rule(),
        }
    }

    /// Department rule after applying the domain-label fallback.
    pub fn department_rule(&self) -> LabelRule {
        self.department.clone().unwrap_or_else(|| {
            LabelRule::Constant(self.domain.clone().unwrap_or_else(|| self.name.clone()))
        })
    }
}

/// Anomaly model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of isolation trees
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    /// Expected share of anomalies; calibrates the binary flag only
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    /// Seed for tree construction
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    /// Upper bound on rows drawn per tree
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_n_estimators() -> usize {
    200
}

fn default_contamination() -> f64 {
    0.05
}

fn default_random_seed() -> u64 {
    42
}

fn default_max_samples() -> usize {
    256
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: default_n_estimators(),
            contamination: default_contamination(),
            random_seed: default_random_seed(),
            max_samples: default_max_samples(),
        }
    }
}

/// Unification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Inclusive lower bound of synthetic locations
    #[serde(default = "default_location_min")]
    pub location_min: u32,
    /// Exclusive upper bound of synthetic locations
    #[serde(default = "default_location_max")]
    pub location_max: u32,
    /// Seed for synthetic location draws
    #[serde(default = "default_random_seed")]
    pub synthesis_seed: u64,
}

fn default_location_min() -> u32 {
    1
}

fn default_location_max() -> u32 {
    250
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            location_min: default_location_min(),
            location_max: default_location_max(),
            synthesis_seed: default_random_seed(),
        }
    }
}

/// Output artifact locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_results_path")]
    pub results_path: String,
    #[serde(default = "default_summary_path")]
    pub summary_path: String,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// Append the synthesized-field flags after the contract columns
    #[serde(default)]
    pub include_provenance: bool,
}

fn default_results_path() -> String {
    "output/fraud_results.csv".to_string()
}

fn default_summary_path() -> String {
    "output/run_summary.json".to_string()
}

fn default_model_path() -> String {
    "model/isolation_forest.json".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_path: default_results_path(),
            summary_path: default_summary_path(),
            model_path: default_model_path(),
            include_provenance: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceMapping>,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub risk: RiskLevelThresholds,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The four source layouts the pipeline was first built around.
fn default_sources() -> Vec<SourceMapping> {
    vec![
        SourceMapping {
            path: Some("data/creditcard.csv".to_string()),
            domain: Some("Finance".to_string()),
            amount: AmountRule::Column("Amount".to_string()),
            time: TimeRule::Column("Time".to_string()),
            ..SourceMapping::new("credit")
        },
        SourceMapping {
            path: Some("data/fraud_train_preproccessed.csv".to_string()),
            domain: Some("Digital Payments".to_string()),
            ..SourceMapping::new("ieee")
        },
        SourceMapping {
            path: Some("data/paysim.csv".to_string()),
            department: Some(LabelRule::Column("type".to_string())),
            vendor: LabelRule::Column("nameDest".to_string()),
            amount: AmountRule::Column("amount".to_string()),
            time: TimeRule::Column("step".to_string()),
            ..SourceMapping::new("paysim")
        },
        SourceMapping {
            path: Some("data/receiver_general.csv".to_string()),
            department: Some(LabelRule::Position(0)),
            vendor: LabelRule::Position(1),
            ..SourceMapping::new("receiver")
        },
    ]
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app.validate()?;
        Ok(app)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::config("at least one source is required"));
        }

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(PipelineError::config("source name must not be empty"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }

        if self.model.n_estimators == 0 {
            return Err(PipelineError::config("n_estimators must be positive"));
        }
        if !(self.model.contamination > 0.0 && self.model.contamination <= 0.5) {
            return Err(PipelineError::config(format!(
                "contamination {} outside (0, 0.5]",
                self.model.contamination
            )));
        }
        if self.model.max_samples < 2 {
            return Err(PipelineError::config("max_samples must be at least 2"));
        }
        if self.pipeline.location_min >= self.pipeline.location_max {
            return Err(PipelineError::config(format!(
                "empty location range [{}, {})",
                self.pipeline.location_min, self.pipeline.location_max
            )));
        }

        self.risk.validate()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            model: ModelConfig::default(),
            risk: RiskLevelThresholds::default(),
            pipeline: PipelineConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.model.n_estimators, 200);
        assert_eq!(config.model.contamination, 0.05);
        assert_eq!(config.model.random_seed, 42);
        assert_eq!(config.risk.high, -0.20);
        assert_eq!(config.pipeline.location_max, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_department_falls_back_to_domain() {
        let config = AppConfig::default();
        assert_eq!(
            config.sources[0].department_rule(),
            LabelRule::Constant("Finance".to_string())
        );
        assert_eq!(
            SourceMapping::new("ledger").department_rule(),
            LabelRule::Constant("ledger".to_string())
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.model.contamination = 0.7;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pipeline.location_min = 250;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.sources.push(SourceMapping::new("credit"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[sources]]
name = "ledger"
domain = "Procurement"
vendor = {{ column = "supplier" }}
amount = {{ column = "total" }}
time = "row_index"
location = {{ column = "site" }}

[model]
n_estimators = 50

[risk]
high = -0.3
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        let source = &config.sources[0];

        assert_eq!(source.vendor, LabelRule::Column("supplier".to_string()));
        assert_eq!(source.amount, AmountRule::Column("total".to_string()));
        assert_eq!(source.time, TimeRule::RowIndex);
        assert_eq!(source.location, LocationRule::Column("site".to_string()));
        assert_eq!(config.model.n_estimators, 50);
        assert_eq!(config.model.contamination, 0.05);
        assert_eq!(config.risk.high, -0.3);
        assert_eq!(config.risk.medium, 0.0);
    }
}
