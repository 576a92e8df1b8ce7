//! Run metrics and summary reporting for the scoring pipeline.

use crate::types::risk::RiskLevel;
use crate::types::transaction::{DropCounts, ScoredTransaction};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::info;

/// Lowest decision score with its own histogram bucket; lower scores share bucket 0.
const SCORE_FLOOR: f64 = -0.5;
const BUCKET_WIDTH: f64 = 0.1;
const BUCKETS: usize = 10;

/// Metrics collector for pipeline runs.
///
/// Counters accumulate over every run of the owning pipeline; per-run figures live in
/// [`RunSummary`](crate::pipeline::RunSummary).
pub struct PipelineMetrics {
    /// Raw rows read across all sources
    pub rows_ingested: AtomicU64,
    /// Rows that received a score
    pub rows_scored: AtomicU64,
    /// Rows flagged anomalous by the model
    pub rows_flagged: AtomicU64,
    /// Rows ingested per source
    rows_by_source: RwLock<BTreeMap<String, u64>>,
    /// Dropped rows by reason
    drops: RwLock<DropCounts>,
    /// Scored rows by risk tier
    rows_by_tier: RwLock<BTreeMap<RiskLevel, u64>>,
    /// Wall time per stage, in execution order
    stage_times: RwLock<Vec<(String, Duration)>>,
    /// Decision score distribution buckets
    score_buckets: RwLock<[u64; BUCKETS]>,
    start_time: Instant,
}

impl PipelineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            rows_ingested: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            rows_flagged: AtomicU64::new(0),
            rows_by_source: RwLock::new(BTreeMap::new()),
            drops: RwLock::new(DropCounts::default()),
            rows_by_tier: RwLock::new(BTreeMap::new()),
            stage_times: RwLock::new(Vec::new()),
            score_buckets: RwLock::new([0; BUCKETS]),
            start_time: Instant::now(),
        }
    }

    /// Record rows read from one source
    pub fn record_ingested(&self, source: &str, rows: usize) {
        self.rows_ingested.fetch_add(rows as u64, Ordering::Relaxed);
        if let Ok(mut by_source) = self.rows_by_source.write() {
            *by_source.entry(source.to_string()).or_insert(0) += rows as u64;
        }
    }

    /// Record dropped rows
    pub fn record_drops(&self, drops: &DropCounts) {
        if let Ok(mut total) = self.drops.write() {
            total.merge(drops);
        }
    }

    /// Record how long a stage took
    pub fn record_stage(&self, stage: &str, duration: Duration) {
        if let Ok(mut times) = self.stage_times.write() {
            times.push((stage.to_string(), duration));
        }
    }

    /// Record a scored row
    pub fn record_scored(&self, row: &ScoredTransaction) {
        self.rows_scored.fetch_add(1, Ordering::Relaxed);
        if row.is_flagged() {
            self.rows_flagged.fetch_add(1, Ordering::Relaxed);
        }

        if let Ok(mut by_tier) = self.rows_by_tier.write() {
            *by_tier.entry(row.fraud_risk).or_insert(0) += 1;
        }

        let bucket = ((row.anomaly_score - SCORE_FLOOR) / BUCKET_WIDTH)
            .floor()
            .clamp(0.0, (BUCKETS - 1) as f64) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Get dropped-row counts
    pub fn get_drops(&self) -> DropCounts {
        self.drops.read().map(|d| *d).unwrap_or_default()
    }

    /// Get scored rows by tier; tiers with no rows report zero
    pub fn get_tier_counts(&self) -> BTreeMap<RiskLevel, u64> {
        let mut counts: BTreeMap<RiskLevel, u64> =
            RiskLevel::all().into_iter().map(|level| (level, 0)).collect();
        if let Ok(by_tier) = self.rows_by_tier.read() {
            counts.extend(by_tier.iter().map(|(level, count)| (*level, *count)));
        }
        counts
    }

    /// Get rows ingested per source
    pub fn get_rows_by_source(&self) -> BTreeMap<String, u64> {
        self.rows_by_source
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Get stage durations in execution order
    pub fn get_stage_times(&self) -> Vec<(String, Duration)> {
        self.stage_times
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Get score distribution
    pub fn get_score_distribution(&self) -> [u64; BUCKETS] {
        self.score_buckets.read().map(|b| *b).unwrap_or_default()
    }

    /// Get current throughput (rows scored per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rows_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let ingested = self.rows_ingested.load(Ordering::Relaxed);
        let scored = self.rows_scored.load(Ordering::Relaxed);
        let flagged = self.rows_flagged.load(Ordering::Relaxed);
        let drops = self.get_drops();
        let pct = |count: u64, total: u64| {
            if total > 0 {
                (count as f64 / total as f64) * 100.0
            } else {
                0.0
            }
        };

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║            FRAUD RISK PIPELINE - RUN SUMMARY                 ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Rows Ingested: {:>10}  │  Rows Scored: {:>10}         ║",
            ingested, scored
        );
        info!(
            "║ Rows Dropped:  {:>10}  │  Flagged: {:>8} ({:>5.1}%)     ║",
            drops.total(),
            flagged,
            pct(flagged, scored)
        );
        info!(
            "║   missing field={} non-positive amount={} non-finite deviation={}",
            drops.missing_field, drops.non_positive_amount, drops.non_finite_deviation
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        for (source, rows) in self.get_rows_by_source() {
            info!("║   source {:12}: {:>10} rows", source, rows);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Rows by Risk Tier:                                           ║");
        for (level, count) in self.get_tier_counts().iter().rev() {
            info!(
                "║   {:8}: {:>10} ({:>5.1}%)                               ║",
                level.as_str(),
                count,
                pct(*count, scored)
            );
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Anomaly Score Distribution:                                  ║");
        let distribution = self.get_score_distribution();
        for (i, &count) in distribution.iter().enumerate() {
            let share = pct(count, scored);
            let bar: String = "█".repeat(((share / 2.0) as usize).min(20));
            let low = SCORE_FLOOR + i as f64 * BUCKET_WIDTH;
            info!(
                "║   {:>+.1}..{:>+.1}: {:>8} ({:>5.1}%) {}",
                low,
                low + BUCKET_WIDTH,
                count,
                share,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");

        let stages = self.get_stage_times();
        if !stages.is_empty() {
            info!("Stage Times (ms):");
            for (stage, duration) in &stages {
                info!("  {}: {:.1}", stage, duration.as_secs_f64() * 1000.0);
            }
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
