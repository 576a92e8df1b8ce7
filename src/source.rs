//! Tabular source inputs.
//!
//! A [`SourceTable`] is an already-parsed table: named columns with a dtype and
//! nullable cells. The unifier only relies on this shape; [`SourceTable::from_csv_path`]
//! is a convenience adapter for the command-line binary.

use crate::error::{PipelineError, Result};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// Column storage type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Numeric,
    Text,
}

/// Cell values of one column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: &str, values: Vec<Option<f64>>) -> Self {
        // NaN is how most tabular tools spell a missing number
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| !x.is_nan()))
            .collect();
        Self {
            name: name.to_string(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text(name: &str, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.to_string(),
            data: ColumnData::Text(values),
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self.data {
            ColumnData::Numeric(_) => Dtype::Numeric,
            ColumnData::Text(_) => Dtype::Text,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.dtype() == Dtype::Numeric
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell as a number. Text cells are parsed leniently; anything unparseable is null.
    pub fn number_at(&self, row: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).copied().flatten(),
            ColumnData::Text(v) => v
                .get(row)
                .and_then(|cell| cell.as_deref())
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|x| !x.is_nan()),
        }
    }

    /// Cell as a label. Numeric cells are rendered without a trailing `.0` when integral.
    pub fn label_at(&self, row: usize) -> Option<String> {
        match &self.data {
            ColumnData::Numeric(v) => v.get(row).copied().flatten().map(format_number),
            ColumnData::Text(v) => v
                .get(row)
                .and_then(|cell| cell.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// One heterogeneous input table
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTable {
    name: String,
    columns: Vec<Column>,
    rows: usize,
}

impl SourceTable {
    /// Build a table, checking that every column has the same length and a unique name.
    pub fn new(name: &str, columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map(Column::len).unwrap_or(0);

        let mut seen = HashSet::new();
        for column in &columns {
            if column.len() != rows {
                return Err(PipelineError::schema(
                    name,
                    format!(
                        "column '{}' has {} rows, expected {}",
                        column.name,
                        column.len(),
                        rows
                    ),
                ));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(PipelineError::schema(
                    name,
                    format!("duplicate column '{}'", column.name),
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            columns,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_at(&self, position: usize) -> Option<&Column> {
        self.columns.get(position)
    }

    /// Numeric columns in positional order.
    pub fn numeric_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_numeric())
    }

    /// Load a headered CSV file, inferring each column's dtype.
    pub fn from_csv_path<P: AsRef<Path>>(name: &str, path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open source '{}' at {}", name, path.display()))?;
        Self::from_csv_reader(name, file)
            .with_context(|| format!("Failed to read source '{}' from {}", name, path.display()))
    }

    /// Read a headered CSV stream. A column is numeric when every non-empty cell parses as f64.
    pub fn from_csv_reader<R: Read>(name: &str, reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        for record in rdr.records() {
            let record = record?;
            for (i, cell) in record.iter().enumerate() {
                let cell = cell.trim();
                cells[i].push(if cell.is_empty() {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
        }

        let columns = headers
            .iter()
            .zip(cells)
            .map(|(header, values)| infer_column(header, values))
            .collect();

        Ok(Self::new(name, columns)?)
    }
}

fn infer_column(name: &str, values: Vec<Option<String>>) -> Column {
    let parsed: Option<Vec<Option<f64>>> = values
        .iter()
        .map(|cell| match cell {
            None => Some(None),
            Some(s) => s.parse::<f64>().ok().map(Some),
        })
        .collect();

    match parsed {
        Some(numbers) if numbers.iter().any(Option::is_some) => Column::numeric(name, numbers),
        _ => Column::text(name, values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_dtype_inference() {
        let csv = "step,type,amount,nameDest\n1,PAYMENT,9839.64,M1979787155\n1,TRANSFER,,C553264065\n";
        let table = SourceTable::from_csv_reader("paysim", csv.as_bytes()).unwrap();

        assert_eq!(table.row_count(), 2);
        assert!(table.column("step").unwrap().is_numeric());
        assert!(!table.column("type").unwrap().is_numeric());
        assert!(table.column("amount").unwrap().is_numeric());
        assert_eq!(table.column("amount").unwrap().number_at(1), None);
        assert_eq!(
            table.column("nameDest").unwrap().label_at(0).as_deref(),
            Some("M1979787155")
        );
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let result = SourceTable::new(
            "bad",
            vec![
                Column::numeric("a", vec![Some(1.0), Some(2.0)]),
                Column::numeric("b", vec![Some(1.0)]),
            ],
        );
        assert!(matches!(result, Err(PipelineError::Schema { .. })));
    }

    #[test]
    fn test_numeric_label_formatting() {
        let column = Column::numeric("code", vec![Some(42.0), Some(1.5), Some(f64::NAN)]);
        assert_eq!(column.label_at(0).as_deref(), Some("42"));
        assert_eq!(column.label_at(1).as_deref(), Some("1.5"));
        assert_eq!(column.label_at(2), None);
    }

    #[test]
    fn test_text_number_parsing_is_lenient() {
        let column = Column::text(
            "amount",
            vec![Some(" 12.5 ".to_string()), Some("n/a".to_string()), None],
        );
        assert_eq!(column.number_at(0), Some(12.5));
        assert_eq!(column.number_at(1), None);
        assert_eq!(column.number_at(2), None);
    }
}
