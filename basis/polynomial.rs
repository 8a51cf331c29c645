//! Polynomial expansion of a single column, either in raw monomials or in a basis
//! of polynomials that are orthogonal over the training sample.

use crate::transform::{
    DesignMatrix, FittedTransform, Transform, TransformError, column_range, distinct_count,
    ensure_finite, validate_column,
};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Unfitted polynomial expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolynomialSpec {
    pub degree: usize,
    /// Orthogonal polynomials are the default; raw monomials are easier to read
    /// coefficient by coefficient but are strongly collinear.
    pub orthogonal: bool,
}

impl PolynomialSpec {
    pub fn orthogonal(degree: usize) -> Self {
        Self {
            degree,
            orthogonal: true,
        }
    }

    pub fn raw(degree: usize) -> Self {
        Self {
            degree,
            orthogonal: false,
        }
    }
}

impl Transform for PolynomialSpec {
    type Fitted = PolynomialBasis;

    fn fit(&self, column: ArrayView1<f64>) -> Result<PolynomialBasis, TransformError> {
        PolynomialBasis::fit(column, self.degree, self.orthogonal)
    }
}

/// The learned polynomial form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolynomialForm {
    /// Column `j` is `x^j`.
    Raw,
    /// Three-term recurrence coefficients of the orthogonal family:
    /// `p_0 = 1`, `p_1 = x - alpha[0]`,
    /// `p_{k+1} = (x - alpha[k]) p_k - (norm2[k+1] / norm2[k]) p_{k-1}`,
    /// where `norm2[k+1]` is the squared norm of `p_k` over the training sample
    /// (`norm2[0] = 1` is a placeholder). Column `k` is `p_k / sqrt(norm2[k+1])`.
    Orthogonal { alpha: Vec<f64>, norm2: Vec<f64> },
}

/// A fitted polynomial basis. Applying it evaluates stored coefficients and never
/// re-orthogonalizes, so extrapolated values are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredPolynomial")]
pub struct PolynomialBasis {
    pub degree: usize,
    pub form: PolynomialForm,
    /// Range of the training column, kept to flag extrapolation.
    pub domain: (f64, f64),
}

#[derive(Deserialize)]
struct StoredPolynomial {
    degree: usize,
    form: PolynomialForm,
    domain: (f64, f64),
}

impl TryFrom<StoredPolynomial> for PolynomialBasis {
    type Error = TransformError;

    fn try_from(stored: StoredPolynomial) -> Result<Self, Self::Error> {
        let StoredPolynomial {
            degree,
            form,
            domain,
        } = stored;
        if degree == 0 {
            return Err(TransformError::invalid(
                "degree",
                "polynomial degree must be at least 1",
            ));
        }
        if let PolynomialForm::Orthogonal { alpha, norm2 } = &form {
            if alpha.len() != degree || norm2.len() != degree + 2 {
                return Err(TransformError::invalid(
                    "form",
                    format!(
                        "degree {degree} needs {degree} alpha and {} norm2 coefficients, got {} and {}",
                        degree + 2,
                        alpha.len(),
                        norm2.len()
                    ),
                ));
            }
            if alpha.iter().any(|a| !a.is_finite())
                || norm2.iter().any(|&n| !n.is_finite() || n <= 0.0)
            {
                return Err(TransformError::invalid(
                    "form",
                    "recurrence coefficients must be finite with positive norms",
                ));
            }
        }
        Ok(Self {
            degree,
            form,
            domain,
        })
    }
}

impl PolynomialBasis {
    /// Fits a polynomial basis of the given degree to the training column.
    ///
    /// # Errors
    /// * `InvalidConfiguration` if `degree == 0`.
    /// * `InsufficientData` if the column is empty, or, for orthogonal polynomials,
    ///   if `degree` is not smaller than the number of distinct training values.
    pub fn fit(
        column: ArrayView1<f64>,
        degree: usize,
        orthogonal: bool,
    ) -> Result<Self, TransformError> {
        if degree == 0 {
            return Err(TransformError::invalid(
                "degree",
                "polynomial degree must be at least 1",
            ));
        }
        ensure_finite(column)?;
        let domain = column_range(column).ok_or_else(|| {
            TransformError::insufficient("column", "cannot fit a polynomial to an empty column")
        })?;

        let form = if orthogonal {
            let distinct = distinct_count(column);
            if degree >= distinct {
                return Err(TransformError::insufficient(
                    "degree",
                    format!(
                        "degree {degree} must be less than the number of distinct training values ({distinct})"
                    ),
                ));
            }
            let (alpha, norm2) = orthogonal_recurrence(column, degree, domain.1 - domain.0)?;
            PolynomialForm::Orthogonal { alpha, norm2 }
        } else {
            PolynomialForm::Raw
        };

        log::debug!(
            "Fitted degree-{} {} polynomial on {} values in [{:.4}, {:.4}]",
            degree,
            if orthogonal { "orthogonal" } else { "raw" },
            column.len(),
            domain.0,
            domain.1
        );

        Ok(Self {
            degree,
            form,
            domain,
        })
    }

    /// Evaluates the basis at every value of `column`.
    pub fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        validate_column(column)?;

        let outside = column
            .iter()
            .filter(|&&x| x < self.domain.0 || x > self.domain.1)
            .count();
        if outside > 0 {
            log::debug!(
                "{} of {} values fall outside the training range [{}, {}]; polynomial values are extrapolated",
                outside,
                column.len(),
                self.domain.0,
                self.domain.1
            );
        }

        let mut out = Array2::zeros((column.len(), self.degree));
        match &self.form {
            PolynomialForm::Raw => {
                for (mut row, &x) in out.axis_iter_mut(Axis(0)).zip(column.iter()) {
                    let mut power = 1.0;
                    for value in row.iter_mut() {
                        power *= x;
                        *value = power;
                    }
                }
            }
            PolynomialForm::Orthogonal { alpha, norm2 } => {
                let x = column.to_owned();
                let mut p_prev = Array1::<f64>::zeros(x.len());
                let mut p_curr = Array1::<f64>::ones(x.len());
                for k in 0..self.degree {
                    let ratio = norm2[k + 1] / norm2[k];
                    let p_next = (&x - alpha[k]) * &p_curr - &p_prev * ratio;
                    out.column_mut(k).assign(&(&p_next / norm2[k + 2].sqrt()));
                    p_prev = p_curr;
                    p_curr = p_next;
                }
            }
        }
        Ok(out)
    }

    pub fn is_orthogonal(&self) -> bool {
        matches!(self.form, PolynomialForm::Orthogonal { .. })
    }
}

impl FittedTransform for PolynomialBasis {
    fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        PolynomialBasis::apply(self, column)
    }

    fn n_columns(&self) -> usize {
        self.degree
    }

    fn column_names(&self, prefix: &str) -> Vec<String> {
        let tag = if self.is_orthogonal() { "poly" } else { "raw" };
        (1..=self.degree)
            .map(|j| format!("{prefix}_{tag}{j}"))
            .collect()
    }
}

/// Stieltjes orthogonalization of `{1, x, ..., x^degree}` under the empirical inner
/// product of `column`. This is Gram-Schmidt carried out through the three-term
/// recurrence, which yields coefficients that can be re-evaluated on new data.
///
/// `spread` is the width of the training range. Each step multiplies by `x`, so the
/// degeneracy threshold is scaled by `spread^2` to stay independent of the units.
fn orthogonal_recurrence(
    column: ArrayView1<f64>,
    degree: usize,
    spread: f64,
) -> Result<(Vec<f64>, Vec<f64>), TransformError> {
    let x = column.to_owned();
    let n = x.len() as f64;

    let mut alpha = Vec::with_capacity(degree);
    let mut norm2 = Vec::with_capacity(degree + 2);
    norm2.push(1.0);
    norm2.push(n);

    let mut p_prev = Array1::<f64>::zeros(x.len());
    let mut p_curr = Array1::<f64>::ones(x.len());

    for k in 0..degree {
        let a = (&x * &p_curr * &p_curr).sum() / norm2[k + 1];
        let ratio = norm2[k + 1] / norm2[k];
        let p_next = (&x - a) * &p_curr - &p_prev * ratio;
        let squared_norm = p_next.dot(&p_next);

        // Distinct-value count guarantees a non-degenerate family in exact
        // arithmetic; this catches the cases where rounding wipes it out.
        let threshold = f64::EPSILON * n * norm2[k + 1] * spread * spread;
        if !squared_norm.is_finite() || squared_norm <= threshold {
            return Err(TransformError::insufficient(
                "degree",
                format!(
                    "orthogonal polynomial of degree {} is numerically degenerate on this column",
                    k + 1
                ),
            ));
        }

        alpha.push(a);
        norm2.push(squared_norm);
        p_prev = p_curr;
        p_curr = p_next;
    }

    Ok((alpha, norm2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    fn ages() -> Array1<f64> {
        Array::linspace(18.0, 80.0, 63)
    }

    #[test]
    fn test_raw_columns_are_powers() {
        let x = array![-2.0, 0.5, 3.0];
        let basis = PolynomialBasis::fit(x.view(), 3, false).unwrap();
        let out = basis.apply(x.view()).unwrap();
        assert_eq!(out.shape(), &[3, 3]);
        for (i, &xi) in x.iter().enumerate() {
            assert_abs_diff_eq!(out[[i, 0]], xi, epsilon = 1e-12);
            assert_abs_diff_eq!(out[[i, 1]], xi * xi, epsilon = 1e-12);
            assert_abs_diff_eq!(out[[i, 2]], xi * xi * xi, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_orthogonal_columns_have_zero_mean_and_unit_norm() {
        let x = ages();
        let basis = PolynomialBasis::fit(x.view(), 4, true).unwrap();
        let out = basis.apply(x.view()).unwrap();

        for j in 0..4 {
            let col = out.column(j);
            assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-9);
            for k in (j + 1)..4 {
                assert_abs_diff_eq!(col.dot(&out.column(k)), 0.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_orthogonal_fit_does_not_depend_on_units() {
        for scale in [1e-8, 1.0, 1e9] {
            let x = Array::linspace(0.0, scale, 100);
            let basis = PolynomialBasis::fit(x.view(), 3, true)
                .unwrap_or_else(|e| panic!("scale {scale}: {e}"));
            let out = basis.apply(x.view()).unwrap();
            for j in 0..3 {
                let col = out.column(j);
                assert_abs_diff_eq!(col.sum(), 0.0, epsilon = 1e-9);
                assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-9);
                for k in (j + 1)..3 {
                    assert_abs_diff_eq!(col.dot(&out.column(k)), 0.0, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_degree_one_orthogonal_is_scaled_centered_x() {
        let x = array![1.0, 2.0, 3.0];
        let basis = PolynomialBasis::fit(x.view(), 1, true).unwrap();
        let out = basis.apply(x.view()).unwrap();
        let s = 2.0_f64.sqrt();
        assert_abs_diff_eq!(out[[0, 0]], -1.0 / s, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[1, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(out[[2, 0]], 1.0 / s, epsilon = 1e-12);
    }

    #[test]
    fn test_new_data_reuses_training_coefficients() {
        let train = ages();
        let basis = PolynomialBasis::fit(train.view(), 3, true).unwrap();

        let new_data = array![25.0, 47.5, 90.0];
        let on_new = basis.apply(new_data.view()).unwrap();
        let on_train = basis.apply(train.view()).unwrap();

        // 25.0 is training row 7; the same x must give the same row.
        assert_eq!(train[7], 25.0);
        assert_eq!(on_new.row(0), on_train.row(7));

        // A new column of its own would orthogonalize differently; we must not.
        let refit = PolynomialBasis::fit(new_data.view(), 2, true).unwrap();
        assert_ne!(refit.form, basis.form);
    }

    #[test]
    fn test_extrapolation_is_finite_and_deterministic() {
        let x = ages();
        let basis = PolynomialBasis::fit(x.view(), 4, true).unwrap();
        let far = array![100.0];
        let first = basis.apply(far.view()).unwrap();
        let second = basis.apply(far.view()).unwrap();
        assert!(first.iter().all(|v| v.is_finite()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_degree_must_be_below_distinct_count() {
        let x = array![1.0, 1.0, 2.0, 2.0, 3.0];
        match PolynomialBasis::fit(x.view(), 3, true).unwrap_err() {
            TransformError::InsufficientData { parameter, .. } => assert_eq!(parameter, "degree"),
            other => panic!("Expected InsufficientData, got {other:?}"),
        }
        assert!(PolynomialBasis::fit(x.view(), 2, true).is_ok());
        // Raw monomials do not orthogonalize and accept any degree.
        assert!(PolynomialBasis::fit(x.view(), 3, false).is_ok());
    }

    #[test]
    fn test_error_conditions() {
        let x = array![1.0, 2.0, 3.0];
        match PolynomialBasis::fit(x.view(), 0, true).unwrap_err() {
            TransformError::InvalidConfiguration { parameter, .. } => {
                assert_eq!(parameter, "degree")
            }
            other => panic!("Expected InvalidConfiguration, got {other:?}"),
        }

        let basis = PolynomialBasis::fit(x.view(), 2, true).unwrap();
        let empty = Array1::<f64>::zeros(0);
        assert!(matches!(
            basis.apply(empty.view()),
            Err(TransformError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_column_names() {
        let x = ages();
        let ortho = PolynomialSpec::orthogonal(2).fit(x.view()).unwrap();
        assert_eq!(ortho.column_names("age"), vec!["age_poly1", "age_poly2"]);
        let raw = PolynomialSpec::raw(2).fit(x.view()).unwrap();
        assert_eq!(raw.column_names("age"), vec!["age_raw1", "age_raw2"]);
        assert!(!raw.spans_intercept());
    }

    #[test]
    fn test_loading_checks_recurrence_lengths() {
        let basis = PolynomialBasis::fit(ages().view(), 3, true).unwrap();
        let text = toml::to_string(&basis).unwrap();
        assert_eq!(toml::from_str::<PolynomialBasis>(&text).unwrap(), basis);

        let mut truncated = basis.clone();
        if let PolynomialForm::Orthogonal { alpha, .. } = &mut truncated.form {
            alpha.pop();
        }
        let text = toml::to_string(&truncated).unwrap();
        assert!(toml::from_str::<PolynomialBasis>(&text).is_err());
    }
}
