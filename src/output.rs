//! Result table and run summary writers

use crate::config::OutputConfig;
use crate::pipeline::PipelineOutput;
use crate::types::transaction::ScoredTransaction;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Result table columns, in contract order.
pub const RESULT_COLUMNS: [&str; 12] = [
    "transaction_id",
    "department",
    "vendor",
    "amount",
    "time",
    "location",
    "vendor_txn_count",
    "dept_avg_amount",
    "amount_deviation",
    "anomaly_score",
    "anomaly_flag",
    "fraud_risk",
];

/// Optional trailing columns marking synthesized fields.
pub const PROVENANCE_COLUMNS: [&str; 3] = [
    "vendor_synthesized",
    "time_synthesized",
    "location_synthesized",
];

/// Writes the scored table as CSV and the run summary as JSON.
pub struct ResultWriter {
    results_path: PathBuf,
    summary_path: PathBuf,
    include_provenance: bool,
}

impl ResultWriter {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            results_path: PathBuf::from(&config.results_path),
            summary_path: PathBuf::from(&config.summary_path),
            include_provenance: config.include_provenance,
        }
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    /// Write both artifacts, creating parent directories as needed.
    pub fn write(&self, output: &PipelineOutput) -> Result<()> {
        create_parent(&self.results_path)?;
        let file = File::create(&self.results_path)
            .with_context(|| format!("Failed to create {}", self.results_path.display()))?;
        self.write_csv(&output.rows, file)
            .with_context(|| format!("Failed to write {}", self.results_path.display()))?;

        create_parent(&self.summary_path)?;
        let file = File::create(&self.summary_path)
            .with_context(|| format!("Failed to create {}", self.summary_path.display()))?;
        serde_json::to_writer_pretty(file, &output.summary)
            .with_context(|| format!("Failed to write {}", self.summary_path.display()))?;

        info!(
            results = %self.results_path.display(),
            summary = %self.summary_path.display(),
            rows = output.rows.len(),
            "Results written"
        );
        Ok(())
    }

    /// Write the result table to any sink.
    pub fn write_csv<W: Write>(&self, rows: &[ScoredTransaction], sink: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(sink);

        let mut header: Vec<&str> = RESULT_COLUMNS.to_vec();
        if self.include_provenance {
            header.extend(PROVENANCE_COLUMNS);
        }
        writer.write_record(&header)?;

        for row in rows {
            let record = &row.record;
            let mut fields = vec![
                record.transaction_id.to_string(),
                record.department.clone(),
                record.vendor.clone(),
                record.amount.to_string(),
                record.time.to_string(),
                record.location.to_string(),
                row.features.vendor_txn_count.to_string(),
                row.features.dept_avg_amount.to_string(),
                row.features.amount_deviation.to_string(),
                row.anomaly_score.to_string(),
                row.anomaly_flag.to_string(),
                row.fraud_risk.to_string(),
            ];
            if self.include_provenance {
                let provenance = &record.provenance;
                fields.push(provenance.vendor_synthesized.to_string());
                fields.push(provenance.time_synthesized.to_string());
                fields.push(provenance.location_synthesized.to_string());
            }
            writer.write_record(&fields)?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::risk::RiskLevel;
    use crate::types::transaction::{CanonicalTransaction, DerivedFeatures, Provenance};

    fn row() -> ScoredTransaction {
        ScoredTransaction {
            record: CanonicalTransaction {
                transaction_id: 3,
                source: "paysim".to_string(),
                department: "TRANSFER".to_string(),
                vendor: "C553264065".to_string(),
                amount: 181.0,
                time: 1.0,
                location: 77,
                provenance: Provenance {
                    location_synthesized: true,
                    ..Provenance::default()
                },
            },
            features: DerivedFeatures {
                vendor_txn_count: 2,
                dept_avg_amount: 90.5,
                amount_deviation: 2.0,
            },
            anomaly_score: -0.25,
            anomaly_flag: -1,
            fraud_risk: RiskLevel::High,
        }
    }

    fn writer(include_provenance: bool) -> ResultWriter {
        ResultWriter::new(&OutputConfig {
            include_provenance,
            ..OutputConfig::default()
        })
    }

    #[test]
    fn test_csv_contract_columns() {
        let mut buffer = Vec::new();
        writer(false).write_csv(&[row()], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();

        assert_eq!(lines.next().unwrap(), RESULT_COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "3,TRANSFER,C553264065,181,1,77,2,90.5,2,-0.25,-1,High"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_provenance_columns_trail() {
        let mut buffer = Vec::new();
        writer(true).write_csv(&[row()], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let header: Vec<&str> = text.lines().next().unwrap().split(',').collect();

        assert_eq!(header.len(), 15);
        assert_eq!(&header[..12], &RESULT_COLUMNS[..]);
        assert!(text.lines().nth(1).unwrap().ends_with("false,false,true"));
    }
}
