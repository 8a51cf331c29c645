//! Step functions: cutting a numeric column into ordered, right-closed bins.
//!
//! Bins are `(-inf, c_1], (c_1, c_2], ..., (c_{K-1}, inf)`. A value equal to a cut
//! point belongs to the lower bin. Cut points either come from the caller or from
//! the training column's quantiles; duplicate quantile cuts (caused by ties) are
//! collapsed, so heavily tied data can produce fewer bins than requested.

use crate::transform::{
    DesignMatrix, FittedTransform, Transform, TransformError, ensure_finite,
    ensure_strictly_increasing, sorted_quantile, validate_column,
};
use itertools::Itertools;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Quantile-based binning with approximately equal counts per bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscretizeSpec {
    pub num_breaks: usize,
}

impl Transform for DiscretizeSpec {
    type Fitted = BinSpec;

    fn fit(&self, column: ArrayView1<f64>) -> Result<BinSpec, TransformError> {
        BinSpec::discretize(column, self.num_breaks)
    }
}

/// Binning at caller-supplied cut points. Fitting ignores the training column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CutSpec {
    pub breaks: Vec<f64>,
}

impl Transform for CutSpec {
    type Fitted = BinSpec;

    fn fit(&self, _column: ArrayView1<f64>) -> Result<BinSpec, TransformError> {
        BinSpec::cut(&self.breaks)
    }
}

/// Fixed cut points and the labels of the bins they delimit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredBins")]
pub struct BinSpec {
    cuts: Vec<f64>,
    levels: Vec<String>,
}

/// On-disk form of a [`BinSpec`]. Labels are derived from the cuts on load.
#[derive(Deserialize)]
struct StoredBins {
    cuts: Vec<f64>,
}

impl TryFrom<StoredBins> for BinSpec {
    type Error = TransformError;

    fn try_from(stored: StoredBins) -> Result<Self, Self::Error> {
        BinSpec::cut(&stored.cuts)
    }
}

impl BinSpec {
    /// Places `num_breaks - 1` cut points at the type-7 quantiles `k / num_breaks`
    /// of the training column so each bin holds roughly `N / num_breaks` values.
    ///
    /// # Errors
    /// * `InvalidConfiguration` if `num_breaks < 2`.
    /// * `InsufficientData` if the column is empty or constant.
    pub fn discretize(column: ArrayView1<f64>, num_breaks: usize) -> Result<Self, TransformError> {
        if num_breaks < 2 {
            return Err(TransformError::invalid(
                "num_breaks",
                format!("at least 2 bins are required, got {num_breaks}"),
            ));
        }
        ensure_finite(column)?;
        if column.is_empty() {
            return Err(TransformError::insufficient(
                "column",
                "cannot derive quantile cut points from an empty column",
            ));
        }

        let mut sorted = column.to_vec();
        sorted.sort_by(f64::total_cmp);

        let (min_val, max_val) = (sorted[0], sorted[sorted.len() - 1]);
        let mut cuts: Vec<f64> = (1..num_breaks)
            .map(|k| sorted_quantile(&sorted, k as f64 / num_breaks as f64))
            .collect();
        cuts.dedup();
        // A cut at the maximum leaves its upper bin empty on the training data.
        cuts.retain(|&c| c < max_val);

        if cuts.is_empty() {
            return Err(TransformError::insufficient(
                "num_breaks",
                format!("all training values lie in [{min_val}, {max_val}]; no cut point separates them"),
            ));
        }
        if cuts.len() + 1 < num_breaks {
            log::warn!(
                "Requested {} bins but ties in the training data leave only {}",
                num_breaks,
                cuts.len() + 1
            );
        }

        Ok(Self::from_sorted_cuts(cuts))
    }

    /// Builds bins from caller-supplied cut points.
    ///
    /// # Errors
    /// `InvalidConfiguration` if `breaks` is empty, non-finite, or not strictly
    /// increasing.
    pub fn cut(breaks: &[f64]) -> Result<Self, TransformError> {
        if breaks.is_empty() {
            return Err(TransformError::invalid(
                "breaks",
                "at least one cut point is required",
            ));
        }
        ensure_strictly_increasing("breaks", breaks)?;
        Ok(Self::from_sorted_cuts(breaks.to_vec()))
    }

    fn from_sorted_cuts(cuts: Vec<f64>) -> Self {
        let edges: Vec<String> = std::iter::once("-inf".to_string())
            .chain(cuts.iter().map(|c| c.to_string()))
            .chain(std::iter::once("inf".to_string()))
            .collect();
        let levels = edges
            .iter()
            .tuple_windows()
            .map(|(lo, hi)| {
                if hi == "inf" {
                    format!("({lo},{hi})")
                } else {
                    format!("({lo},{hi}]")
                }
            })
            .collect();
        Self { cuts, levels }
    }

    /// Interior cut points, strictly increasing.
    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    /// Interval labels, one per bin, in order.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn num_bins(&self) -> usize {
        self.cuts.len() + 1
    }

    /// Bin index of a single value, found by binary search over the cut points.
    pub fn bin_of(&self, x: f64) -> usize {
        self.cuts.partition_point(|&c| c < x)
    }

    /// Assigns every value of `column` to its bin.
    pub fn assign(&self, column: ArrayView1<f64>) -> Result<Vec<usize>, TransformError> {
        validate_column(column)?;
        Ok(column.iter().map(|&x| self.bin_of(x)).collect())
    }

    /// Labels of the bins the values of `column` fall into.
    pub fn assign_labels(&self, column: ArrayView1<f64>) -> Result<Vec<&str>, TransformError> {
        Ok(self
            .assign(column)?
            .into_iter()
            .map(|code| self.levels[code].as_str())
            .collect())
    }

    /// Treatment-coded indicators: one column per bin except the first, which is
    /// the reference level.
    pub fn indicators(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        let codes = self.assign(column)?;
        let mut out = Array2::zeros((codes.len(), self.num_bins() - 1));
        for (row, &code) in codes.iter().enumerate() {
            if code > 0 {
                out[[row, code - 1]] = 1.0;
            }
        }
        Ok(out)
    }
}

impl FittedTransform for BinSpec {
    fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        self.indicators(column)
    }

    fn n_columns(&self) -> usize {
        self.num_bins() - 1
    }

    fn column_names(&self, prefix: &str) -> Vec<String> {
        self.levels
            .iter()
            .skip(1)
            .map(|level| format!("{prefix}{level}"))
            .collect()
    }
}
