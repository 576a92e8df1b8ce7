//! Pipeline orchestration: unify → features → fit/score → classify.
//!
//! [`Pipeline`] is the run context. It owns the configuration, the model handle and the
//! metrics collector; stage outputs are passed explicitly from one stage to the next.

use crate::config::{AppConfig, ModelConfig};
use crate::error::Result;
use crate::feature_extractor::{FeatureExtractor, FeatureSet};
use crate::metrics::PipelineMetrics;
use crate::models::{AnomalyModel, FittedModel, IsolationForestModel, ModelScores};
use crate::source::SourceTable;
use crate::types::risk::{RiskLevel, RiskLevelThresholds};
use crate::types::transaction::{DropCounts, EnrichedTransaction, ScoredTransaction};
use crate::unifier::SchemaUnifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether a run fitted the model or reused an existing fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Fit,
    Score,
}

/// Machine-readable account of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw rows per source, in source order
    pub rows_ingested: Vec<(String, usize)>,
    pub rows_scored: usize,
    pub rows_dropped: DropCounts,
    pub anomalies_flagged: usize,
    pub tiers: BTreeMap<RiskLevel, usize>,
    pub model: ModelConfig,
    pub risk_thresholds: RiskLevelThresholds,
}

impl RunSummary {
    pub fn total_ingested(&self) -> usize {
        self.rows_ingested.iter().map(|(_, rows)| rows).sum()
    }
}

/// Scored rows plus the run summary
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub rows: Vec<ScoredTransaction>,
    pub summary: RunSummary,
}

/// Rows ready for the model, with bookkeeping from the earlier stages.
struct Prepared {
    features: FeatureSet,
    drops: DropCounts,
    ingested: Vec<(String, usize)>,
}

/// Batch fraud-risk pipeline
pub struct Pipeline {
    config: AppConfig,
    unifier: SchemaUnifier,
    extractor: FeatureExtractor,
    model: IsolationForestModel,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Create a pipeline with an unfitted model.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let extractor = FeatureExtractor::new();
        debug!(
            sources = config.sources.len(),
            features = extractor.feature_count(),
            names = ?extractor.feature_names(),
            "Pipeline initialized"
        );
        Ok(Self {
            unifier: SchemaUnifier::new(&config),
            extractor,
            model: IsolationForestModel::new(config.model.clone()),
            metrics: Arc::new(PipelineMetrics::new()),
            config,
        })
    }

    /// Create a pipeline around an already fitted model.
    pub fn with_fitted(config: AppConfig, fitted: FittedModel) -> Result<Self> {
        let mut pipeline = Self::new(config)?;
        pipeline.model = IsolationForestModel::from_fitted(fitted);
        Ok(pipeline)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn model(&self) -> &IsolationForestModel {
        &self.model
    }

    /// Metrics accumulated across every `run` and `score` call on this pipeline.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Unify, derive features, fit the model on every row and score it.
    pub fn run(&mut self, sources: &[SourceTable]) -> Result<PipelineOutput> {
        let started_at = Utc::now();
        let prepared = self.prepare(sources)?;
        let matrix = self.extractor.matrix(&prepared.features.rows);

        let start = Instant::now();
        self.model.fit(&matrix)?;
        self.metrics.record_stage("fit", start.elapsed());

        self.finish(prepared, &matrix, RunMode::Fit, started_at)
    }

    /// Score new sources with the current fit, without refitting.
    pub fn score(&self, sources: &[SourceTable]) -> Result<PipelineOutput> {
        let started_at = Utc::now();
        let prepared = self.prepare(sources)?;
        let matrix = self.extractor.matrix(&prepared.features.rows);
        self.finish(prepared, &matrix, RunMode::Score, started_at)
    }

    fn prepare(&self, sources: &[SourceTable]) -> Result<Prepared> {
        let start = Instant::now();
        let unified = self.unifier.unify(sources)?;
        self.metrics.record_stage("unify", start.elapsed());
        for (source, rows) in &unified.ingested {
            self.metrics.record_ingested(source, *rows);
        }

        let start = Instant::now();
        let features = self.extractor.extract(unified.records);
        self.metrics.record_stage("features", start.elapsed());

        let mut drops = unified.drops;
        drops.non_finite_deviation += features.dropped_non_finite;
        self.metrics.record_drops(&drops);

        if drops.total() > 0 {
            warn!(
                dropped = drops.total(),
                missing_field = drops.missing_field,
                non_positive_amount = drops.non_positive_amount,
                non_finite_deviation = drops.non_finite_deviation,
                "Rows dropped during preparation"
            );
        }

        Ok(Prepared {
            features,
            drops,
            ingested: unified.ingested,
        })
    }

    fn finish(
        &self,
        prepared: Prepared,
        matrix: &ndarray::Array2<f64>,
        mode: RunMode,
        started_at: DateTime<Utc>,
    ) -> Result<PipelineOutput> {
        let start = Instant::now();
        let scores = self.model.score(matrix)?;
        self.metrics.record_stage("score", start.elapsed());

        let rows = classify(prepared.features.rows, &scores, &self.config.risk);
        for row in &rows {
            self.metrics.record_scored(row);
        }

        let mut tiers: BTreeMap<RiskLevel, usize> =
            RiskLevel::all().into_iter().map(|level| (level, 0)).collect();
        for row in &rows {
            *tiers.entry(row.fraud_risk).or_insert(0) += 1;
        }

        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            mode,
            started_at,
            finished_at: Utc::now(),
            rows_ingested: prepared.ingested,
            rows_scored: rows.len(),
            rows_dropped: prepared.drops,
            anomalies_flagged: scores.n_anomalies(),
            tiers,
            model: self.model.config().clone(),
            risk_thresholds: self.config.risk,
        };

        info!(
            run_id = %summary.run_id,
            mode = ?summary.mode,
            rows_scored = summary.rows_scored,
            high = summary.tiers[&RiskLevel::High],
            medium = summary.tiers[&RiskLevel::Medium],
            low = summary.tiers[&RiskLevel::Low],
            "Pipeline run complete"
        );

        Ok(PipelineOutput { rows, summary })
    }
}

/// Attach scores, flags and tiers to enriched rows, preserving order.
fn classify(
    rows: Vec<EnrichedTransaction>,
    scores: &ModelScores,
    thresholds: &RiskLevelThresholds,
) -> Vec<ScoredTransaction> {
    rows.into_iter()
        .zip(scores.scores.iter().zip(scores.flags.iter()))
        .map(|(row, (&anomaly_score, &anomaly_flag))| ScoredTransaction {
            record: row.record,
            features: row.features,
            anomaly_score,
            anomaly_flag,
            fraud_risk: RiskLevel::from_score(anomaly_score, thresholds),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AmountRule, LabelRule, SourceMapping, TimeRule};
    use crate::error::PipelineError;
    use crate::source::Column;

    fn config() -> AppConfig {
        AppConfig {
            sources: vec![SourceMapping {
                department: Some(LabelRule::Column("dept".to_string())),
                vendor: LabelRule::Column("vendor".to_string()),
                amount: AmountRule::Column("amount".to_string()),
                time: TimeRule::Column("step".to_string()),
                ..SourceMapping::new("ledger")
            }],
            model: ModelConfig {
                n_estimators: 50,
                ..ModelConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn ledger(rows: usize) -> SourceTable {
        let depts = ["Finance", "Ops", "IT"];
        SourceTable::new(
            "ledger",
            vec![
                Column::text(
                    "dept",
                    (0..rows).map(|i| Some(depts[i % 3].to_string())).collect(),
                ),
                Column::text(
                    "vendor",
                    (0..rows).map(|i| Some(format!("V{}", i % 8))).collect(),
                ),
                Column::numeric(
                    "amount",
                    (0..rows)
                        .map(|i| match i {
                            i if i == rows - 1 => Some(50_000.0),
                            i => Some(90.0 + (i % 11) as f64),
                        })
                        .collect(),
                ),
                Column::numeric("step", (0..rows).map(|i| Some(i as f64)).collect()),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_run_scores_every_row() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let output = pipeline.run(&[ledger(60)]).unwrap();

        assert_eq!(output.rows.len(), 60);
        assert_eq!(output.summary.rows_scored, 60);
        assert_eq!(output.summary.total_ingested(), 60);
        assert_eq!(output.summary.mode, RunMode::Fit);
        assert_eq!(output.summary.tiers.values().sum::<usize>(), 60);
        assert!(pipeline.model().is_fitted());

        let outlier = output.rows.last().unwrap();
        assert!(output.rows[..59]
            .iter()
            .all(|r| r.anomaly_score > outlier.anomaly_score));
        assert!(outlier.is_flagged());
    }

    #[test]
    fn test_score_reuses_fit() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let fitted = pipeline.run(&[ledger(60)]).unwrap();
        let rescored = pipeline.score(&[ledger(60)]).unwrap();

        assert_eq!(rescored.summary.mode, RunMode::Score);
        let a: Vec<f64> = fitted.rows.iter().map(|r| r.anomaly_score).collect();
        let b: Vec<f64> = rescored.rows.iter().map(|r| r.anomaly_score).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_score_without_fit_is_contract_error() {
        let pipeline = Pipeline::new(config()).unwrap();
        assert!(matches!(
            pipeline.score(&[ledger(10)]),
            Err(PipelineError::Contract { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.risk.high = 0.5;
        assert!(matches!(
            Pipeline::new(bad),
            Err(PipelineError::Config { .. })
        ));
    }

    #[test]
    fn test_metrics_track_run() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        pipeline.run(&[ledger(30)]).unwrap();
        let metrics = pipeline.metrics();

        assert_eq!(metrics.get_rows_by_source()["ledger"], 30);
        let stages: Vec<String> = metrics
            .get_stage_times()
            .into_iter()
            .map(|(stage, _)| stage)
            .collect();
        assert_eq!(stages, vec!["unify", "features", "fit", "score"]);
    }

    #[test]
    fn test_metrics_accumulate_across_runs() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let fitted = pipeline.run(&[ledger(30)]).unwrap();
        let rescored = pipeline.score(&[ledger(30)]).unwrap();
        let metrics = pipeline.metrics();

        assert_eq!(fitted.summary.total_ingested(), 30);
        assert_eq!(rescored.summary.total_ingested(), 30);
        assert_eq!(metrics.get_rows_by_source()["ledger"], 60);
        assert_eq!(
            metrics
                .rows_scored
                .load(std::sync::atomic::Ordering::Relaxed),
            60
        );
        assert_eq!(metrics.get_stage_times().len(), 7);
    }
}
