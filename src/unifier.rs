//! Schema unification: maps heterogeneous sources onto the canonical record.
//!
//! Every source is resolved against its [`SourceMapping`] before any row is read,
//! so a source that cannot be mapped fails the whole run with a schema error.
//! Row-level problems (nulls, non-positive amounts) only drop the row.

use crate::config::{AmountRule, AppConfig, LabelRule, LocationRule, SourceMapping, TimeRule};
use crate::error::{PipelineError, Result};
use crate::source::{Column, SourceTable};
use crate::types::transaction::{CanonicalTransaction, DropCounts, Provenance};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Column-name fragments that mark a numeric column as monetary.
const MONETARY_HINTS: [&str; 5] = ["amount", "amt", "value", "price", "total"];

/// Result of unifying all sources
#[derive(Debug, Clone, Default)]
pub struct UnifiedTable {
    /// Surviving records in source order
    pub records: Vec<CanonicalTransaction>,
    /// Rows dropped during cleaning
    pub drops: DropCounts,
    /// Raw row count per source, in source order
    pub ingested: Vec<(String, usize)>,
}

impl UnifiedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows_ingested(&self) -> usize {
        self.ingested.iter().map(|(_, rows)| rows).sum()
    }
}

/// Maps source tables onto the canonical schema using per-source mappings.
pub struct SchemaUnifier {
    mappings: Vec<SourceMapping>,
    location_range: Range<u32>,
    seed: u64,
}

enum LabelSource<'t> {
    Column(&'t Column),
    Constant(String),
    IdTag(String),
}

impl LabelSource<'_> {
    fn value(&self, row: usize) -> Option<String> {
        match self {
            LabelSource::Column(column) => column.label_at(row),
            LabelSource::Constant(label) => Some(label.clone()),
            LabelSource::IdTag(prefix) => Some(format!("{}{}", prefix, row)),
        }
    }

    fn is_synthetic(&self) -> bool {
        matches!(self, LabelSource::IdTag(_))
    }
}

/// One source with every canonical field resolved to a concrete column or fallback.
struct ResolvedSource<'t> {
    table: &'t SourceTable,
    department: LabelSource<'t>,
    vendor: LabelSource<'t>,
    amount: &'t Column,
    time: Option<&'t Column>,
    location: Option<&'t Column>,
}

/// Rows from one source that survived cleaning, before ids are assigned.
struct SourceRows {
    records: Vec<(usize, CanonicalTransaction)>,
    drops: DropCounts,
}

impl SchemaUnifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            mappings: config.sources.clone(),
            location_range: config.pipeline.location_min..config.pipeline.location_max,
            seed: config.pipeline.synthesis_seed,
        }
    }

    /// Unify all sources, preserving source order.
    ///
    /// Transaction ids are the row's position in the concatenated input, so they are
    /// unique across sources; rows dropped during cleaning leave gaps.
    pub fn unify(&self, sources: &[SourceTable]) -> Result<UnifiedTable> {
        let resolved = sources
            .iter()
            .map(|table| self.resolve(table))
            .collect::<Result<Vec<_>>>()?;

        let per_source: Vec<SourceRows> = resolved
            .par_iter()
            .enumerate()
            .map(|(index, source)| self.map_rows(index, source))
            .collect();

        let mut unified = UnifiedTable::default();
        let mut offset = 0u64;

        for (table, rows) in sources.iter().zip(per_source) {
            info!(
                source = %table.name(),
                rows_in = table.row_count(),
                rows_kept = rows.records.len(),
                rows_dropped = rows.drops.total(),
                "Source unified"
            );

            unified.drops.merge(&rows.drops);
            unified
                .ingested
                .push((table.name().to_string(), table.row_count()));
            unified
                .records
                .extend(rows.records.into_iter().map(|(row, mut record)| {
                    record.transaction_id = offset + row as u64;
                    record
                }));
            offset += table.row_count() as u64;
        }

        info!(
            sources = sources.len(),
            rows_in = unified.rows_ingested(),
            rows_kept = unified.len(),
            missing_field = unified.drops.missing_field,
            non_positive_amount = unified.drops.non_positive_amount,
            "Unification complete"
        );

        Ok(unified)
    }

    fn mapping_for(&self, table: &SourceTable) -> Result<&SourceMapping> {
        self.mappings
            .iter()
            .find(|m| m.name == table.name())
            .ok_or_else(|| PipelineError::schema(table.name(), "no column mapping configured"))
    }

    fn resolve<'t>(&'t self, table: &'t SourceTable) -> Result<ResolvedSource<'t>> {
        let mapping = self.mapping_for(table)?;

        let department = resolve_label(table, "department", mapping.department_rule())?;
        let vendor = resolve_label(table, "vendor", mapping.vendor.clone())?;
        let amount = resolve_amount(table, &mapping.amount)?;

        let time = match &mapping.time {
            TimeRule::Column(name) => Some(named_column(table, "time", name)?),
            TimeRule::RowIndex => None,
        };
        let location = match &mapping.location {
            LocationRule::Column(name) => Some(named_column(table, "location", name)?),
            LocationRule::Synthetic => None,
        };

        debug!(
            source = %table.name(),
            amount = %amount.name,
            time = time.map(|c| c.name.as_str()).unwrap_or("<row index>"),
            location = location.map(|c| c.name.as_str()).unwrap_or("<synthetic>"),
            "Source mapping resolved"
        );

        Ok(ResolvedSource {
            table,
            department,
            vendor,
            amount,
            time,
            location,
        })
    }

    fn map_rows(&self, source_index: usize, source: &ResolvedSource<'_>) -> SourceRows {
        let source_name = source.table.name();
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(source_index as u64));
        let mut rows = SourceRows {
            records: Vec::with_capacity(source.table.row_count()),
            drops: DropCounts::default(),
        };

        for row in 0..source.table.row_count() {
            // Drawn for every row so synthetic locations do not depend on which rows drop.
            let synthetic_location = rng.gen_range(self.location_range.clone());

            let department = source.department.value(row);
            let vendor = source.vendor.value(row);
            let amount = source.amount.number_at(row);
            let time = match source.time {
                Some(column) => column.number_at(row),
                None => Some(row as f64),
            };
            let location = match source.location {
                Some(column) => column.number_at(row).and_then(to_location),
                None => Some(synthetic_location),
            };

            let (Some(department), Some(vendor), Some(amount), Some(time), Some(location)) =
                (department, vendor, amount, time, location)
            else {
                rows.drops.missing_field += 1;
                continue;
            };

            if !(amount.is_finite() && amount > 0.0) {
                rows.drops.non_positive_amount += 1;
                continue;
            }

            rows.records.push((
                row,
                CanonicalTransaction {
                    transaction_id: 0,
                    source: source_name.to_string(),
                    department,
                    vendor,
                    amount,
                    time,
                    location,
                    provenance: Provenance {
                        vendor_synthesized: source.vendor.is_synthetic(),
                        time_synthesized: source.time.is_none(),
                        location_synthesized: source.location.is_none(),
                    },
                },
            ));
        }

        rows
    }
}

fn to_location(value: f64) -> Option<u32> {
    if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 {
        Some(value.round() as u32)
    } else {
        None
    }
}

fn named_column<'t>(table: &'t SourceTable, field: &str, name: &str) -> Result<&'t Column> {
    table.column(name).ok_or_else(|| {
        PipelineError::schema(
            table.name(),
            format!("{} column '{}' not found", field, name),
        )
    })
}

fn positional_column<'t>(table: &'t SourceTable, field: &str, position: usize) -> Result<&'t Column> {
    table.column_at(position).ok_or_else(|| {
        PipelineError::schema(
            table.name(),
            format!(
                "{} column position {} out of range ({} columns)",
                field,
                position,
                table.columns().len()
            ),
        )
    })
}

fn resolve_label<'t>(
    table: &'t SourceTable,
    field: &str,
    rule: LabelRule,
) -> Result<LabelSource<'t>> {
    match rule {
        LabelRule::Column(name) => Ok(LabelSource::Column(named_column(table, field, &name)?)),
        LabelRule::Position(position) => Ok(LabelSource::Column(positional_column(
            table, field, position,
        )?)),
        LabelRule::Constant(label) => {
            let label = label.trim();
            if label.is_empty() {
                return Err(PipelineError::schema(
                    table.name(),
                    format!("constant {} label is empty", field),
                ));
            }
            Ok(LabelSource::Constant(label.to_string()))
        }
        LabelRule::IdTag(prefix) => Ok(LabelSource::IdTag(prefix)),
    }
}

fn resolve_amount<'t>(table: &'t SourceTable, rule: &AmountRule) -> Result<&'t Column> {
    match rule {
        AmountRule::Column(name) => named_column(table, "amount", name),
        AmountRule::Position(position) => positional_column(table, "amount", *position),
        AmountRule::FirstNumeric => {
            let monetary = table.numeric_columns().find(|column| {
                let name = column.name.to_lowercase();
                MONETARY_HINTS.iter().any(|hint| name.contains(hint))
            });
            let column = monetary
                .or_else(|| table.numeric_columns().next())
                .ok_or_else(|| {
                    PipelineError::schema(table.name(), "no numeric column to use as amount")
                })?;

            warn!(
                source = %table.name(),
                column = %column.name,
                monetary_name = monetary.is_some(),
                "Amount column picked by heuristic; declare it in the source mapping"
            );
            Ok(column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ledger() -> SourceTable {
        SourceTable::new(
            "ledger",
            vec![
                Column::text(
                    "dept",
                    vec![
                        Some("Finance".to_string()),
                        None,
                        Some("Ops".to_string()),
                        Some("Ops".to_string()),
                    ],
                ),
                Column::text(
                    "supplier",
                    vec![
                        Some("Acme".to_string()),
                        Some("Acme".to_string()),
                        Some("Globex".to_string()),
                        Some("Initech".to_string()),
                    ],
                ),
                Column::numeric("invoice_no", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]),
                Column::numeric(
                    "total_due",
                    vec![Some(120.0), Some(80.0), Some(0.0), Some(45.5)],
                ),
            ],
        )
        .unwrap()
    }

    fn ledger_mapping() -> SourceMapping {
        SourceMapping {
            department: Some(LabelRule::Column("dept".to_string())),
            vendor: LabelRule::Column("supplier".to_string()),
            ..SourceMapping::new("ledger")
        }
    }

    fn config_with(mappings: Vec<SourceMapping>) -> AppConfig {
        AppConfig {
            sources: mappings,
            ..AppConfig::default()
        }
    }

    fn card_source() -> SourceTable {
        SourceTable::new(
            "card",
            vec![
                Column::numeric("Time", vec![Some(0.0), Some(5.0), Some(9.0)]),
                Column::numeric("Amount", vec![Some(10.0), Some(-3.0), Some(25.0)]),
            ],
        )
        .unwrap()
    }

    fn card_mapping() -> SourceMapping {
        SourceMapping {
            domain: Some("Finance".to_string()),
            amount: AmountRule::Column("Amount".to_string()),
            time: TimeRule::Column("Time".to_string()),
            ..SourceMapping::new("card")
        }
    }

    #[test]
    fn test_cleaning_drops_and_counts() {
        let unifier = SchemaUnifier::new(&config_with(vec![ledger_mapping()]));
        let unified = unifier.unify(&[ledger()]).unwrap();

        // Row 1 has no department, row 2 has a zero amount.
        assert_eq!(unified.len(), 2);
        assert_eq!(unified.drops.missing_field, 1);
        assert_eq!(unified.drops.non_positive_amount, 1);
        assert!(unified.records.iter().all(|r| r.amount > 0.0));
        assert!(unified.records.iter().all(|r| !r.department.is_empty()));
    }

    #[test]
    fn test_first_numeric_prefers_monetary_name() {
        let unifier = SchemaUnifier::new(&config_with(vec![ledger_mapping()]));
        let unified = unifier.unify(&[ledger()]).unwrap();

        assert_eq!(unified.records[0].amount, 120.0);
        assert_eq!(unified.records[1].amount, 45.5);
    }

    #[test]
    fn test_first_numeric_falls_back_to_position() {
        let table = SourceTable::new(
            "ieee",
            vec![
                Column::text("card_type", vec![Some("visa".to_string())]),
                Column::numeric("V1", vec![Some(3.5)]),
                Column::numeric("V2", vec![Some(99.0)]),
            ],
        )
        .unwrap();
        let unifier = SchemaUnifier::new(&config_with(vec![SourceMapping::new("ieee")]));
        let unified = unifier.unify(&[table]).unwrap();

        assert_eq!(unified.records[0].amount, 3.5);
        assert_eq!(unified.records[0].department, "ieee");
    }

    #[test]
    fn test_no_numeric_column_is_schema_error() {
        let table = SourceTable::new(
            "notes",
            vec![Column::text("memo", vec![Some("hello".to_string())])],
        )
        .unwrap();
        let unifier = SchemaUnifier::new(&config_with(vec![SourceMapping::new("notes")]));

        match unifier.unify(&[table]) {
            Err(PipelineError::Schema { source_name, .. }) => assert_eq!(source_name, "notes"),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_named_column_is_schema_error() {
        let mapping = SourceMapping {
            amount: AmountRule::Column("Amount".to_string()),
            ..SourceMapping::new("ledger")
        };
        let unifier = SchemaUnifier::new(&config_with(vec![mapping]));
        assert!(matches!(
            unifier.unify(&[ledger()]),
            Err(PipelineError::Schema { .. })
        ));
    }

    #[test]
    fn test_unmapped_source_is_schema_error() {
        let unifier = SchemaUnifier::new(&config_with(vec![card_mapping()]));
        assert!(matches!(
            unifier.unify(&[ledger()]),
            Err(PipelineError::Schema { .. })
        ));
    }

    #[test]
    fn test_ids_unique_across_sources() {
        let unifier = SchemaUnifier::new(&config_with(vec![card_mapping(), ledger_mapping()]));
        let unified = unifier.unify(&[card_source(), ledger()]).unwrap();

        let ids: HashSet<u64> = unified.records.iter().map(|r| r.transaction_id).collect();
        assert_eq!(ids.len(), unified.len());
        assert_eq!(unified.records[0].source, "card");
        assert_eq!(unified.records.last().unwrap().source, "ledger");
        assert_eq!(unified.rows_ingested(), 7);
    }

    #[test]
    fn test_synthesized_fields_are_flagged() {
        let unifier = SchemaUnifier::new(&config_with(vec![card_mapping()]));
        let unified = unifier.unify(&[card_source()]).unwrap();
        let first = &unified.records[0];

        assert_eq!(first.vendor, "Vendor_0");
        assert_eq!(first.department, "Finance");
        assert_eq!(first.time, 0.0);
        assert!(first.provenance.vendor_synthesized);
        assert!(!first.provenance.time_synthesized);
        assert!(first.provenance.location_synthesized);
        assert!((1..250).contains(&first.location));
    }

    #[test]
    fn test_synthetic_locations_are_seeded() {
        let unifier = SchemaUnifier::new(&config_with(vec![card_mapping()]));
        let a = unifier.unify(&[card_source()]).unwrap();
        let b = unifier.unify(&[card_source()]).unwrap();

        assert_eq!(a.records, b.records);
    }

    #[test]
    fn test_positional_labels_on_numeric_columns() {
        let table = SourceTable::new(
            "receiver",
            vec![
                Column::numeric("dept_code", vec![Some(10.0), Some(30.5), Some(10.0)]),
                Column::numeric("payee", vec![Some(7001.0), Some(7002.0), Some(7001.0)]),
                Column::numeric("paid", vec![Some(12.0), Some(8.0), Some(3.0)]),
            ],
        )
        .unwrap();
        let mapping = SourceMapping {
            department: Some(LabelRule::Position(0)),
            vendor: LabelRule::Position(1),
            amount: AmountRule::Position(2),
            ..SourceMapping::new("receiver")
        };
        let unifier = SchemaUnifier::new(&config_with(vec![mapping]));
        let unified = unifier.unify(&[table]).unwrap();

        assert_eq!(unified.records[0].department, "10");
        assert_eq!(unified.records[1].department, "30.5");
        assert_eq!(unified.records[0].vendor, "7001");
        assert!(!unified.records[0].provenance.vendor_synthesized);
        assert_eq!(unified.records[2].amount, 3.0);
    }

    #[test]
    fn test_position_out_of_range_is_schema_error() {
        let label = SourceMapping {
            department: Some(LabelRule::Position(9)),
            ..SourceMapping::new("card")
        };
        let amount = SourceMapping {
            amount: AmountRule::Position(2),
            ..SourceMapping::new("card")
        };

        for mapping in [label, amount] {
            let unifier = SchemaUnifier::new(&config_with(vec![mapping]));
            match unifier.unify(&[card_source()]) {
                Err(PipelineError::Schema { source_name, reason }) => {
                    assert_eq!(source_name, "card");
                    assert!(reason.contains("out of range"), "{}", reason);
                }
                other => panic!("expected schema error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_location_column_is_rounded_and_kept_as_is() {
        let table = SourceTable::new(
            "branches",
            vec![
                Column::numeric("Amount", vec![Some(5.0), Some(6.0), Some(7.0), Some(8.0)]),
                Column::numeric(
                    "branch",
                    vec![Some(3.4), Some(7.6), Some(-2.0), Some(9_000.0)],
                ),
            ],
        )
        .unwrap();
        let mapping = SourceMapping {
            amount: AmountRule::Column("Amount".to_string()),
            location: LocationRule::Column("branch".to_string()),
            ..SourceMapping::new("branches")
        };
        let unifier = SchemaUnifier::new(&config_with(vec![mapping]));
        let unified = unifier.unify(&[table]).unwrap();

        let locations: Vec<u32> = unified.records.iter().map(|r| r.location).collect();
        // Negative values are not a location; values past the synthetic range are kept.
        assert_eq!(locations, vec![3, 8, 9_000]);
        assert_eq!(unified.drops.missing_field, 1);
        assert!(unified
            .records
            .iter()
            .all(|r| !r.provenance.location_synthesized));
    }

    #[test]
    fn test_row_index_time_fallback() {
        let unifier = SchemaUnifier::new(&config_with(vec![ledger_mapping()]));
        let unified = unifier.unify(&[ledger()]).unwrap();

        assert_eq!(unified.records[1].time, 3.0);
        assert!(unified.records[1].provenance.time_synthesized);
        assert_eq!(unified.records[1].transaction_id, 3);
    }
}
