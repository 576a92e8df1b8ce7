//! Fraud Risk Pipeline - Main Entry Point
//!
//! Reads the configured source tables, scores every transaction and writes the
//! result table, run summary and fitted model.

use anyhow::{Context, Result};
use clap::Parser;
use fraud_risk_pipeline::{
    config::{AppConfig, LoggingConfig},
    models::ModelStore,
    output::ResultWriter,
    pipeline::Pipeline,
    source::SourceTable,
};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Batch fraud-risk scoring over the configured source tables
#[derive(Parser, Debug)]
#[command(name = "fraud-risk-pipeline")]
#[command(about = "Score transactions from heterogeneous sources into fraud-risk tiers")]
struct Args {
    /// Path to the TOML configuration
    #[arg(long, default_value = "config/config.toml")]
    config: String,
    /// Load the saved model and score without refitting
    #[arg(long)]
    score_only: bool,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_sources(config: &AppConfig) -> Result<Vec<SourceTable>> {
    config
        .sources
        .iter()
        .map(|mapping| {
            let path = mapping
                .path
                .as_deref()
                .with_context(|| format!("Source '{}' has no path configured", mapping.name))?;
            SourceTable::from_csv_path(&mapping.name, path)
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::load_from_path(&args.config)?;
    init_logging(&config.logging)?;

    info!("Starting Fraud Risk Pipeline");
    info!(
        config = %args.config,
        sources = config.sources.len(),
        n_estimators = config.model.n_estimators,
        contamination = config.model.contamination,
        high_below = config.risk.high,
        medium_below = config.risk.medium,
        "Configuration loaded"
    );

    let start = Instant::now();
    let sources = load_sources(&config)?;
    let store = ModelStore::new(&config.output.model_path);
    let writer = ResultWriter::new(&config.output);

    let (pipeline, output) = if args.score_only {
        let fitted = store.load()?;
        let pipeline = Pipeline::with_fitted(config, fitted)?;
        let output = pipeline.score(&sources)?;
        (pipeline, output)
    } else {
        let mut pipeline = Pipeline::new(config)?;
        let output = pipeline.run(&sources)?;
        (pipeline, output)
    };

    writer.write(&output)?;
    if !args.score_only {
        if let Some(fitted) = pipeline.model().fitted() {
            store.save(fitted)?;
        }
    }

    let metrics = pipeline.metrics();
    metrics.print_summary();
    info!(
        run_id = %output.summary.run_id,
        results = %writer.results_path().display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        throughput = format!("{:.1} rows/s", metrics.get_throughput()),
        "Pipeline finished"
    );

    Ok(())
}
