use crate::transform::{
    DesignMatrix, FittedTransform, Transform, TransformError, column_range, ensure_finite,
    ensure_strictly_increasing, sorted_quantile, validate_column,
};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Defines how the interior knots of a spline are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "placement", content = "value", rename_all = "snake_case")]
pub enum KnotPlacement {
    /// Knots supplied directly by the caller.
    Explicit(Vec<f64>),
    /// Place this many knots at evenly spaced quantiles of the training column.
    /// This adapts to the data's distribution.
    Quantiles(usize),
}

impl KnotPlacement {
    /// Resolves the placement to concrete interior knots for a training column.
    pub fn resolve(&self, column: ArrayView1<f64>) -> Result<Vec<f64>, TransformError> {
        match self {
            KnotPlacement::Explicit(knots) => Ok(knots.clone()),
            KnotPlacement::Quantiles(count) => quantile_knots(column, *count),
        }
    }
}

/// Unfitted B-spline expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BSplineSpec {
    pub knots: KnotPlacement,
    pub degree: usize,
    /// Boundary knots. When absent, the range of the training column is used.
    /// Crucially, the same boundary must be used for prediction as for training,
    /// which is why it is frozen into the fitted basis.
    pub boundary: Option<(f64, f64)>,
}

impl BSplineSpec {
    /// A cubic spline with the given interior knots.
    pub fn cubic(knots: Vec<f64>) -> Self {
        Self {
            knots: KnotPlacement::Explicit(knots),
            degree: 3,
            boundary: None,
        }
    }
}

impl Transform for BSplineSpec {
    type Fitted = SplineBasis;

    fn fit(&self, column: ArrayView1<f64>) -> Result<SplineBasis, TransformError> {
        ensure_finite(column)?;
        let interior = self.knots.resolve(column)?;
        let boundary = resolve_boundary(self.boundary, column)?;
        SplineBasis::new(&interior, self.degree, boundary)
    }
}

/// Picks explicit boundary knots, or the training range when none were given.
pub(crate) fn resolve_boundary(
    explicit: Option<(f64, f64)>,
    column: ArrayView1<f64>,
) -> Result<(f64, f64), TransformError> {
    match explicit {
        Some(boundary) => Ok(boundary),
        None => column_range(column).ok_or_else(|| {
            TransformError::insufficient(
                "boundary",
                "boundary knots default to the training range, but the column is empty",
            )
        }),
    }
}

/// A fitted B-spline basis: interior knots, boundary knots and degree, frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredSplineBasis")]
pub struct SplineBasis {
    interior_knots: Vec<f64>,
    boundary: (f64, f64),
    degree: usize,
    /// Boundary knots repeated `degree + 1` times around the interior knots.
    knot_vector: Vec<f64>,
}

/// On-disk form of a [`SplineBasis`]. The knot vector is rebuilt on load.
#[derive(Deserialize)]
struct StoredSplineBasis {
    interior_knots: Vec<f64>,
    boundary: (f64, f64),
    degree: usize,
}

impl TryFrom<StoredSplineBasis> for SplineBasis {
    type Error = TransformError;

    fn try_from(stored: StoredSplineBasis) -> Result<Self, Self::Error> {
        SplineBasis::new(&stored.interior_knots, stored.degree, stored.boundary)
    }
}

impl SplineBasis {
    /// Creates a B-spline basis from interior knots, a degree and boundary knots.
    ///
    /// The basis has `knots.len() + degree + 1` functions.
    ///
    /// # Errors
    /// `InvalidConfiguration` if there are no interior knots, if the knots are not
    /// finite and strictly increasing, or if the boundary does not strictly enclose
    /// them.
    pub fn new(knots: &[f64], degree: usize, boundary: (f64, f64)) -> Result<Self, TransformError> {
        if knots.is_empty() {
            return Err(TransformError::invalid(
                "knots",
                "at least one interior knot is required",
            ));
        }
        ensure_strictly_increasing("knots", knots)?;

        let (lo, hi) = boundary;
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return Err(TransformError::invalid(
                "boundary",
                format!("boundary knots must be finite with start < end, got ({lo}, {hi})"),
            ));
        }
        let (first, last) = (knots[0], knots[knots.len() - 1]);
        if first <= lo || last >= hi {
            return Err(TransformError::invalid(
                "knots",
                format!(
                    "interior knots [{first}, {last}] must lie strictly inside the boundary ({lo}, {hi})"
                ),
            ));
        }

        let mut knot_vector = Vec::with_capacity(knots.len() + 2 * (degree + 1));
        knot_vector.extend(std::iter::repeat_n(lo, degree + 1));
        knot_vector.extend_from_slice(knots);
        knot_vector.extend(std::iter::repeat_n(hi, degree + 1));

        Ok(Self {
            interior_knots: knots.to_vec(),
            boundary,
            degree,
            knot_vector,
        })
    }

    pub fn interior_knots(&self) -> &[f64] {
        &self.interior_knots
    }

    pub fn boundary(&self) -> (f64, f64) {
        self.boundary
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn knot_vector(&self) -> &[f64] {
        &self.knot_vector
    }

    /// The number of B-spline basis functions for a knot vector of length `k` and
    /// degree `d` is `k - d - 1`, i.e. `interior + d + 1` here.
    pub fn num_basis(&self) -> usize {
        self.knot_vector.len() - self.degree - 1
    }

    /// Evaluates every basis function at every value of `column`.
    ///
    /// Outside the boundary knots each function continues linearly from the
    /// nearest boundary, using its value and slope there.
    pub fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        validate_column(column)?;

        let mut basis_matrix = Array2::zeros((column.len(), self.num_basis()));
        let mut outside = 0_usize;
        for (i, &x) in column.iter().enumerate() {
            let row = self.evaluate(x);
            if x < self.boundary.0 || x > self.boundary.1 {
                outside += 1;
            }
            basis_matrix.row_mut(i).assign(&row);
        }
        if outside > 0 {
            log::debug!(
                "{} of {} values lie beyond the boundary knots ({}, {}); using linear extension",
                outside,
                column.len(),
                self.boundary.0,
                self.boundary.1
            );
        }
        Ok(basis_matrix)
    }

    /// Values of all basis functions at a single point.
    pub fn evaluate(&self, x: f64) -> Array1<f64> {
        let (lo, hi) = self.boundary;
        let knots = self.knot_vector.as_slice();
        let values = if x < lo {
            internal::linear_extension(x, lo, knots, self.degree)
        } else if x > hi {
            internal::linear_extension(x, hi, knots, self.degree)
        } else {
            internal::basis_values(x, knots, self.degree)
        };
        Array1::from_vec(values)
    }

    /// `order`-th derivatives of all basis functions at a point inside the
    /// boundary knots. At the right boundary this is the left-hand derivative.
    pub fn derivative(&self, x: f64, order: usize) -> Array1<f64> {
        let clamped = x.clamp(self.boundary.0, self.boundary.1);
        Array1::from_vec(internal::basis_derivatives(
            clamped,
            &self.knot_vector,
            self.degree,
            order,
        ))
    }
}

impl FittedTransform for SplineBasis {
    fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        SplineBasis::apply(self, column)
    }

    fn n_columns(&self) -> usize {
        self.num_basis()
    }

    fn column_names(&self, prefix: &str) -> Vec<String> {
        (1..=self.num_basis())
            .map(|j| format!("{prefix}_bs{j}"))
            .collect()
    }

    fn spans_intercept(&self) -> bool {
        true
    }
}

/// Places `count` interior knots at the quantiles `k / (count + 1)` of the
/// training column using linear interpolation (Type 7 in R).
pub(crate) fn quantile_knots(
    column: ArrayView1<f64>,
    count: usize,
) -> Result<Vec<f64>, TransformError> {
    if count == 0 {
        return Err(TransformError::invalid(
            "knots",
            "at least one interior knot is required",
        ));
    }
    ensure_finite(column)?;
    if column.len() < count + 2 {
        return Err(TransformError::insufficient(
            "knots",
            format!(
                "cannot place {count} quantile knots using only {} data points",
                column.len()
            ),
        ));
    }

    let mut sorted = column.to_vec();
    sorted.sort_by(f64::total_cmp);
    let knots: Vec<f64> = (1..=count)
        .map(|k| sorted_quantile(&sorted, k as f64 / (count as f64 + 1.0)))
        .collect();

    let (lo, hi) = (sorted[0], sorted[sorted.len() - 1]);
    let distinct = knots.windows(2).all(|w| w[0] < w[1]);
    if !distinct || knots[0] <= lo || knots[count - 1] >= hi {
        return Err(TransformError::insufficient(
            "knots",
            format!("ties in the training data leave no room for {count} distinct interior knots"),
        ));
    }
    Ok(knots)
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    /// Index `i` of the knot interval `[t_i, t_{i+1})` holding `x`, located by binary
    /// search. The right boundary belongs to the last non-degenerate interval.
    pub(super) fn locate_span(x: f64, knots: &[f64]) -> usize {
        let mut span = knots
            .partition_point(|&t| t <= x)
            .saturating_sub(1)
            .min(knots.len() - 2);
        while span > 0 && knots[span + 1] <= knots[span] {
            span -= 1;
        }
        span
    }

    /// Values of all degree-`degree` B-splines over `knots` at `x`, by the Cox-de
    /// Boor recursion. Each level is computed in place: entry `i` only reads
    /// entries `i` and `i + 1` of the previous level. 0/0 is taken as 0.
    pub(super) fn basis_values(x: f64, knots: &[f64], degree: usize) -> Vec<f64> {
        let m = knots.len();
        let mut b = vec![0.0; m - 1];
        b[locate_span(x, knots)] = 1.0;

        for d in 1..=degree {
            for i in 0..(m - 1 - d) {
                let left_den = knots[i + d] - knots[i];
                let right_den = knots[i + d + 1] - knots[i + 1];
                let left = if left_den > 0.0 {
                    (x - knots[i]) / left_den * b[i]
                } else {
                    0.0
                };
                let right = if right_den > 0.0 {
                    (knots[i + d + 1] - x) / right_den * b[i + 1]
                } else {
                    0.0
                };
                b[i] = left + right;
            }
        }
        b.truncate(m - degree - 1);
        b
    }

    /// `order`-th derivatives of all degree-`degree` B-splines at `x`, from
    /// `B'_{i,d} = d * (B_{i,d-1} / (t_{i+d} - t_i) - B_{i+1,d-1} / (t_{i+d+1} - t_{i+1}))`
    /// applied `order` times on top of the degree `degree - order` values.
    pub(super) fn basis_derivatives(
        x: f64,
        knots: &[f64],
        degree: usize,
        order: usize,
    ) -> Vec<f64> {
        let m = knots.len();
        if order > degree {
            return vec![0.0; m - degree - 1];
        }

        let mut values = basis_values(x, knots, degree - order);
        for d in (degree - order + 1)..=degree {
            let count = m - d - 1;
            for i in 0..count {
                let left_den = knots[i + d] - knots[i];
                let right_den = knots[i + d + 1] - knots[i + 1];
                let left = if left_den > 0.0 { values[i] / left_den } else { 0.0 };
                let right = if right_den > 0.0 {
                    values[i + 1] / right_den
                } else {
                    0.0
                };
                values[i] = d as f64 * (left - right);
            }
            values.truncate(count);
        }
        values
    }

    /// First-order Taylor extension of every basis function from `anchor`.
    pub(super) fn linear_extension(x: f64, anchor: f64, knots: &[f64], degree: usize) -> Vec<f64> {
        let values = basis_values(anchor, knots, degree);
        let slopes = basis_derivatives(anchor, knots, degree, 1);
        values
            .iter()
            .zip(slopes.iter())
            .map(|(&v, &s)| v + s * (x - anchor))
            .collect()
    }
}
