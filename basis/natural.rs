//! Natural cubic splines: cubic B-splines constrained to have zero second
//! derivative at both boundary knots, and therefore linear beyond them.

use crate::spline::{KnotPlacement, SplineBasis, resolve_boundary};
use crate::transform::{DesignMatrix, FittedTransform, Transform, TransformError, ensure_finite};
use ndarray::{Array2, ArrayView1, s};
use ndarray_linalg::SVD;
use serde::{Deserialize, Serialize};

/// Unfitted natural cubic spline expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalSplineSpec {
    pub knots: KnotPlacement,
    /// Boundary knots. When absent, the range of the training column is used.
    pub boundary: Option<(f64, f64)>,
}

impl Transform for NaturalSplineSpec {
    type Fitted = NaturalSplineBasis;

    fn fit(&self, column: ArrayView1<f64>) -> Result<NaturalSplineBasis, TransformError> {
        ensure_finite(column)?;
        let interior = self.knots.resolve(column)?;
        let boundary = resolve_boundary(self.boundary, column)?;
        NaturalSplineBasis::new(&interior, boundary)
    }
}

/// A fitted natural cubic spline basis.
///
/// Columns are `B Z`, where `B` is the cubic B-spline basis and `Z` is an
/// orthonormal basis of the null space of the boundary second-derivative
/// constraints. The basis has `knots.len() + 2` functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredNaturalSpline")]
pub struct NaturalSplineBasis {
    spline: SplineBasis,
    z_transform: Array2<f64>,
}

#[derive(Deserialize)]
struct StoredNaturalSpline {
    spline: SplineBasis,
    z_transform: Array2<f64>,
}

impl TryFrom<StoredNaturalSpline> for NaturalSplineBasis {
    type Error = TransformError;

    fn try_from(stored: StoredNaturalSpline) -> Result<Self, Self::Error> {
        let StoredNaturalSpline {
            spline,
            z_transform,
        } = stored;
        if spline.degree() != 3 {
            return Err(TransformError::invalid(
                "degree",
                format!("natural splines are cubic, got degree {}", spline.degree()),
            ));
        }
        let expected = (spline.num_basis(), spline.interior_knots().len() + 2);
        if z_transform.dim() != expected {
            return Err(TransformError::invalid(
                "z_transform",
                format!(
                    "constraint transform has shape {:?}, expected {:?}",
                    z_transform.dim(),
                    expected
                ),
            ));
        }
        if z_transform.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::invalid(
                "z_transform",
                "constraint transform contains non-finite values",
            ));
        }
        Ok(Self {
            spline,
            z_transform,
        })
    }
}

impl NaturalSplineBasis {
    pub fn new(knots: &[f64], boundary: (f64, f64)) -> Result<Self, TransformError> {
        let spline = SplineBasis::new(knots, 3, boundary)?;
        let n_basis = spline.num_basis();

        // Rows are the second derivatives of every basis function at each boundary.
        let mut constraints = Array2::<f64>::zeros((2, n_basis));
        constraints
            .row_mut(0)
            .assign(&spline.derivative(boundary.0, 2));
        constraints
            .row_mut(1)
            .assign(&spline.derivative(boundary.1, 2));

        // The trailing right singular vectors after the numerical rank span the
        // null space of the constraints.
        let (_, singular_values, vt_opt) = constraints.svd(false, true)?;
        let vt = vt_opt.ok_or_else(|| {
            TransformError::invalid("knots", "SVD did not return right singular vectors")
        })?;
        let max_sigma = singular_values.iter().fold(0.0_f64, |acc, &v| acc.max(v));
        let tol = n_basis as f64 * 1e-12 * max_sigma.max(1.0);
        let rank = singular_values.iter().filter(|&&sigma| sigma > tol).count();
        if rank != 2 {
            return Err(TransformError::invalid(
                "knots",
                format!("boundary constraints have rank {rank}, expected 2"),
            ));
        }
        let z_transform = vt.slice(s![rank.., ..]).t().to_owned();

        log::debug!(
            "Natural spline with {} interior knots: {} B-splines constrained to {} columns",
            knots.len(),
            n_basis,
            z_transform.ncols()
        );

        Ok(Self {
            spline,
            z_transform,
        })
    }

    pub fn spline(&self) -> &SplineBasis {
        &self.spline
    }

    pub fn z_transform(&self) -> &Array2<f64> {
        &self.z_transform
    }

    pub fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        let unconstrained = self.spline.apply(column)?;
        Ok(unconstrained.dot(&self.z_transform))
    }
}

impl FittedTransform for NaturalSplineBasis {
    fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        NaturalSplineBasis::apply(self, column)
    }

    fn n_columns(&self) -> usize {
        self.z_transform.ncols()
    }

    fn column_names(&self, prefix: &str) -> Vec<String> {
        (1..=self.n_columns())
            .map(|j| format!("{prefix}_ns{j}"))
            .collect()
    }

    fn spans_intercept(&self) -> bool {
        true
    }
}
