//! # Data Loading and Validation
//!
//! Reads delimited tables (comma separated, or tab separated for `.tsv`/`.tab`
//! files) with polars, keeps only the requested columns, and converts them to
//! `ndarray` columns after checking that every value is present, numeric and
//! finite. Failures are treated as user-input errors and reported through
//! [`DataError`] with the offending column named.

use crate::steps::ColumnSource;
use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Fewest rows accepted when a table is used to fit transforms and a model.
pub const MINIMUM_TRAINING_ROWS: usize = 10;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Input contains only {found} data rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
    #[error("Column '{column_name}' has {found} rows, but other columns have {expected}.")]
    ColumnLengthMismatch {
        column_name: String,
        found: usize,
        expected: usize,
    },
}

/// A set of named, equally long, finite numeric columns.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    columns: HashMap<String, Array1<f64>>,
    n_rows: usize,
}

impl Dataset {
    /// Builds a dataset from in-memory columns, e.g. a prediction grid.
    pub fn from_columns(
        columns: impl IntoIterator<Item = (String, Array1<f64>)>,
    ) -> Result<Self, DataError> {
        let mut dataset = Dataset::default();
        for (name, values) in columns {
            dataset.insert(name, values)?;
        }
        Ok(dataset)
    }

    fn insert(&mut self, name: String, values: Array1<f64>) -> Result<(), DataError> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(name));
        }
        if self.columns.is_empty() {
            self.n_rows = values.len();
        } else if values.len() != self.n_rows {
            return Err(DataError::ColumnLengthMismatch {
                column_name: name,
                found: values.len(),
                expected: self.n_rows,
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// The named column, or `ColumnNotFound`.
    pub fn get(&self, name: &str) -> Result<ArrayView1<'_, f64>, DataError> {
        self.columns
            .get(name)
            .map(|c| c.view())
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }
}

impl ColumnSource for Dataset {
    fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.columns.get(name).map(|c| c.view())
    }
}

/// Column separator implied by the file extension.
pub fn separator_for(path: &Path) -> u8 {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("tab") => b'\t',
        _ => b',',
    }
}

/// Loads `required` columns from a delimited file.
///
/// # Errors
/// Any required column that is absent, non-numeric, null-containing or
/// non-finite is reported by name. Tables with fewer than `min_rows` rows are
/// rejected.
pub fn load_table(
    path: &Path,
    required: &[&str],
    min_rows: usize,
) -> Result<Dataset, DataError> {
    log::info!("Loading data from '{}'", path.display());

    let mut df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(
                    CsvParseOptions::default().with_separator(separator_for(path)),
                ),
        )
        .finish()?;

    if df.height() < min_rows {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: min_rows,
        });
    }

    let available: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for &name in required {
        if !available.contains(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let mut projection: Vec<&str> = required.to_vec();
    projection.sort_unstable();
    projection.dedup();
    df = df.select(projection.iter().copied())?;

    let mut dataset = Dataset::default();
    for &name in &projection {
        let values = extract_numeric_column(&df, name)?;
        dataset.insert(name.to_string(), Array1::from_vec(values))?;
    }

    log::info!(
        "Loaded {} rows with columns {:?}",
        dataset.n_rows(),
        projection
    );
    Ok(dataset)
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let values: Vec<f64> = casted.f64()?.rechunk().into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

/// Indicator response: 1 where `values` exceed `threshold`, otherwise 0.
pub fn above_threshold(values: ArrayView1<f64>, threshold: f64) -> Array1<f64> {
    values.mapv(|v| if v > threshold { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::Builder;

    fn create_table(content: &str, suffix: &str) -> io::Result<tempfile::NamedTempFile> {
        let mut file = Builder::new().suffix(suffix).tempfile()?;
        writeln!(file, "{content}")?;
        file.flush()?;
        Ok(file)
    }

    fn wage_rows(separator: &str, n: usize) -> String {
        let mut rows = vec![["age", "wage", "region"].join(separator)];
        for i in 0..n {
            rows.push(
                [
                    format!("{}", 18 + i),
                    format!("{:.1}", 50.0 + 10.0 * i as f64),
                    "north".to_string(),
                ]
                .join(separator),
            );
        }
        rows.join("\n")
    }

    #[test]
    fn test_load_csv_keeps_requested_columns() {
        let file = create_table(&wage_rows(",", 12), ".csv").unwrap();
        let data = load_table(file.path(), &["age", "wage"], MINIMUM_TRAINING_ROWS).unwrap();
        assert_eq!(data.n_rows(), 12);
        assert_abs_diff_eq!(data.get("age").unwrap()[0], 18.0);
        assert_abs_diff_eq!(data.get("wage").unwrap()[11], 160.0);
        assert!(matches!(
            data.get("region"),
            Err(DataError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_tsv_extension_selects_tab_separator() {
        let file = create_table(&wage_rows("\t", 12), ".tsv").unwrap();
        let data = load_table(file.path(), &["age"], 1).unwrap();
        assert_eq!(data.get("age").unwrap().len(), 12);
        assert_eq!(separator_for(Path::new("x.TAB")), b'\t');
        assert_eq!(separator_for(Path::new("x.csv")), b',');
    }

    #[test]
    fn test_missing_and_non_numeric_columns_are_named() {
        let file = create_table(&wage_rows(",", 12), ".csv").unwrap();
        match load_table(file.path(), &["age", "income"], 1).unwrap_err() {
            DataError::ColumnNotFound(name) => assert_eq!(name, "income"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
        match load_table(file.path(), &["region"], 1).unwrap_err() {
            DataError::ColumnWrongType { column_name, .. } => assert_eq!(column_name, "region"),
            other => panic!("Expected ColumnWrongType, got {other:?}"),
        }
    }

    #[test]
    fn test_too_few_rows_rejected() {
        let file = create_table(&wage_rows(",", 3), ".csv").unwrap();
        assert!(matches!(
            load_table(file.path(), &["age"], MINIMUM_TRAINING_ROWS),
            Err(DataError::InsufficientRows { found: 3, .. })
        ));
    }

    #[test]
    fn test_null_values_rejected() {
        let file = create_table("age,wage\n20,1.0\n,2.0\n30,3.0", ".csv").unwrap();
        match load_table(file.path(), &["age"], 1).unwrap_err() {
            DataError::MissingValuesFound(name) => assert_eq!(name, "age"),
            other => panic!("Expected MissingValuesFound, got {other:?}"),
        }
    }

    #[test]
    fn test_from_columns_checks_lengths() {
        let ok = Dataset::from_columns([("age".to_string(), array![20.0, 30.0])]).unwrap();
        assert_eq!(ok.n_rows(), 2);
        assert!(ok.column("age").is_some());

        let ragged = Dataset::from_columns([
            ("age".to_string(), array![20.0, 30.0]),
            ("year".to_string(), array![2005.0]),
        ]);
        assert!(matches!(
            ragged,
            Err(DataError::ColumnLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_above_threshold_indicator() {
        let wage = array![100.0, 250.0, 250.5, 300.0];
        assert_eq!(above_threshold(wage.view(), 250.0), array![0.0, 0.0, 1.0, 1.0]);
    }
}
