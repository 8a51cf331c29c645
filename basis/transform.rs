//! Shared vocabulary of the transform layer: the error taxonomy, the design
//! matrix type, and the fit/apply traits every basis implements.

use ndarray::{Array2, ArrayView1};
use thiserror::Error;

/// The numeric matrix of derived features handed to a model-fitting routine.
/// Row `i` always corresponds to row `i` of the column it was derived from.
pub type DesignMatrix = Array2<f64>;

/// A comprehensive error type for every transform in this crate.
///
/// Configuration and data problems surface when a transform is fitted. Applying a
/// fitted transform can only fail on malformed input (empty or non-finite column).
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Invalid configuration for '{parameter}': {reason}")]
    InvalidConfiguration {
        parameter: &'static str,
        reason: String,
    },

    #[error("Insufficient training data for '{parameter}': {reason}")]
    InsufficientData {
        parameter: &'static str,
        reason: String,
    },

    #[error("Input column does not have the expected shape: {reason}")]
    DimensionMismatch { reason: String },

    #[error("Linear algebra failure while building a constrained basis: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

impl TransformError {
    pub(crate) fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        TransformError::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }

    pub(crate) fn insufficient(parameter: &'static str, reason: impl Into<String>) -> Self {
        TransformError::InsufficientData {
            parameter,
            reason: reason.into(),
        }
    }
}

/// An unfitted transform: a configuration that learns its parameters from a
/// training column.
pub trait Transform {
    /// The immutable, fitted form of this transform.
    type Fitted: FittedTransform;

    /// Learns the transform's parameters from `column`.
    ///
    /// # Errors
    /// Returns [`TransformError::InvalidConfiguration`] for malformed parameters and
    /// [`TransformError::InsufficientData`] when the training column cannot support
    /// the requested configuration.
    fn fit(&self, column: ArrayView1<f64>) -> Result<Self::Fitted, TransformError>;
}

/// A fitted transform. Applying it never re-derives parameters.
pub trait FittedTransform {
    /// Expands `column` into a design matrix with [`Self::n_columns`] columns.
    fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError>;

    /// Number of columns produced by [`Self::apply`].
    fn n_columns(&self) -> usize;

    /// Human-readable names for the produced columns, e.g. `age_poly1`.
    fn column_names(&self, prefix: &str) -> Vec<String>;

    /// True when the produced columns sum to a constant, so a model intercept
    /// would make the design rank deficient.
    fn spans_intercept(&self) -> bool {
        false
    }
}

/// Rejects columns a fitted transform cannot be applied to.
pub(crate) fn validate_column(column: ArrayView1<f64>) -> Result<(), TransformError> {
    if column.is_empty() {
        return Err(TransformError::DimensionMismatch {
            reason: "the column is empty".to_string(),
        });
    }
    ensure_finite(column)
}

pub(crate) fn ensure_finite(column: ArrayView1<f64>) -> Result<(), TransformError> {
    match column.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(TransformError::DimensionMismatch {
            reason: format!("row {} holds a non-finite value ({})", row, column[row]),
        }),
        None => Ok(()),
    }
}

/// Number of distinct values in a finite column.
pub(crate) fn distinct_count(column: ArrayView1<f64>) -> usize {
    let mut sorted = column.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Smallest and largest value of a non-empty finite column.
pub(crate) fn column_range(column: ArrayView1<f64>) -> Option<(f64, f64)> {
    if column.is_empty() {
        return None;
    }
    let min_val = column.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_val = column.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    Some((min_val, max_val))
}

/// Checks that `values` are finite and strictly increasing.
pub(crate) fn ensure_strictly_increasing(
    parameter: &'static str,
    values: &[f64],
) -> Result<(), TransformError> {
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(TransformError::invalid(
            parameter,
            format!("all values must be finite, found {v}"),
        ));
    }
    if let Some(pair) = values.windows(2).find(|w| w[1] <= w[0]) {
        return Err(TransformError::invalid(
            parameter,
            format!(
                "values must be strictly increasing, but {} is followed by {}",
                pair[0], pair[1]
            ),
        ));
    }
    Ok(())
}

/// Type-7 (linear interpolation) empirical quantile of pre-sorted data.
pub(crate) fn sorted_quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let float_idx = (n as f64 - 1.0) * p;
    let lower_idx = float_idx.floor() as usize;
    let upper_idx = float_idx.ceil() as usize;

    if lower_idx == upper_idx {
        sorted[lower_idx]
    } else {
        let fraction = float_idx - lower_idx as f64;
        sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction
    }
}
