//! Synthetic Source Generator
//!
//! Writes four demo CSV sources in the layouts the default configuration maps:
//! card transactions, a preprocessed payments table, a mobile-money log and a
//! departmental ledger. A small share of rows in each is an injected outlier.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::info;

const DEPARTMENTS: [&str; 5] = ["Finance", "Operations", "IT", "Marketing", "Facilities"];
const PAYSIM_TYPES: [&str; 5] = ["PAYMENT", "TRANSFER", "CASH_OUT", "DEBIT", "CASH_IN"];

/// Generates rows for one source with a fixed outlier rate.
struct SourceGenerator {
    rng: StdRng,
    outlier_rate: f64,
    outliers: usize,
}

impl SourceGenerator {
    fn new(seed: u64, outlier_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            outlier_rate,
            outliers: 0,
        }
    }

    /// A typical amount, or a much larger one for an injected outlier.
    fn amount(&mut self, typical: f64) -> f64 {
        let base = typical * self.rng.gen_range(0.2..1.8);
        let value = if self.rng.gen_bool(self.outlier_rate) {
            self.outliers += 1;
            base * self.rng.gen_range(40.0..120.0)
        } else {
            base
        };
        (value * 100.0).round() / 100.0
    }

    fn choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }

    fn noise(&mut self) -> f64 {
        self.rng.gen_range(-3.0..3.0)
    }
}

/// Card data: `Time`, anonymized components, `Amount`.
fn write_creditcard(path: &Path, rows: usize, generator: &mut SourceGenerator) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Time", "V1", "V2", "V3", "V4", "Amount"])?;

    let mut time = 0.0_f64;
    for _ in 0..rows {
        time += generator.rng.gen_range(0.0..4.0_f64).floor();
        let amount = generator.amount(88.0);
        writer.write_record(&[
            time.to_string(),
            format!("{:.6}", generator.noise()),
            format!("{:.6}", generator.noise()),
            format!("{:.6}", generator.noise()),
            format!("{:.6}", generator.noise()),
            amount.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Preprocessed payments: numbered features only, the first one carries the value.
fn write_preprocessed(path: &Path, rows: usize, generator: &mut SourceGenerator) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["feat_0", "feat_1", "feat_2", "feat_3"])?;

    for _ in 0..rows {
        let value = generator.amount(135.0);
        writer.write_record(&[
            value.to_string(),
            generator.rng.gen_range(1000..18000).to_string(),
            generator.rng.gen_range(0..12).to_string(),
            format!("{:.4}", generator.noise()),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Mobile money: `step`, `type`, `amount`, `nameOrig`, `nameDest`.
fn write_paysim(path: &Path, rows: usize, generator: &mut SourceGenerator) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["step", "type", "amount", "nameOrig", "nameDest"])?;

    let destinations = (rows / 4).max(1);
    for i in 0..rows {
        let step = 1 + i / 50;
        let kind = generator.choice(&PAYSIM_TYPES);
        let amount = generator.amount(1800.0);
        writer.write_record(&[
            step.to_string(),
            kind.to_string(),
            amount.to_string(),
            format!("C{}", generator.rng.gen_range(1_000_000_000_u64..2_000_000_000)),
            format!("M{:09}", generator.rng.gen_range(0..destinations)),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Ledger: department and vendor text columns followed by the invoice total.
fn write_ledger(path: &Path, rows: usize, generator: &mut SourceGenerator) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Department", "Vendor Name", "Invoice Total"])?;

    let vendors = (rows / 10).max(1);
    for _ in 0..rows {
        let department = generator.choice(&DEPARTMENTS);
        let vendor = format!("Vendor {:03}", generator.rng.gen_range(0..vendors));
        let total = generator.amount(620.0);
        writer.write_record(&[department.to_string(), vendor, total.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

type Writer = fn(&Path, usize, &mut SourceGenerator) -> Result<()>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("synth_sources=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let out_dir = args.get(1).map(|s| s.as_str()).unwrap_or("data");
    let rows: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(2000);
    let outlier_rate: f64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0.01);
    let seed: u64 = args.get(4).and_then(|s| s.parse().ok()).unwrap_or(7);

    if !(0.0..=1.0).contains(&outlier_rate) {
        anyhow::bail!("outlier rate {} must be within [0, 1]", outlier_rate);
    }

    info!(
        out_dir = %out_dir,
        rows = rows,
        outlier_rate = outlier_rate,
        seed = seed,
        "Generating synthetic sources"
    );

    let out_dir = Path::new(out_dir);
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let sources: [(&str, Writer); 4] = [
        ("creditcard.csv", write_creditcard),
        ("fraud_train_preproccessed.csv", write_preprocessed),
        ("paysim.csv", write_paysim),
        ("receiver_general.csv", write_ledger),
    ];

    for (i, (file_name, write)) in sources.iter().enumerate() {
        let path = out_dir.join(file_name);
        let mut generator = SourceGenerator::new(seed.wrapping_add(i as u64), outlier_rate);
        write(&path, rows, &mut generator)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(
            path = %path.display(),
            rows = rows,
            outliers = generator.outliers,
            "Source written"
        );
    }

    Ok(())
}
