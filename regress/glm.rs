//! Unpenalized generalized linear models on a prebuilt design matrix.
//!
//! Two families are supported: Gaussian with the identity link (ordinary least
//! squares) and binomial with the logit link (logistic regression by
//! iteratively reweighted least squares). Every weighted least-squares solve goes
//! through a thin SVD of `sqrt(W) X`, which also gives the numerical rank check
//! and the unscaled coefficient covariance.

use crate::artifact::{ArtifactError, load_toml, save_toml};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip, s};
use ndarray_linalg::{JobSvd, SVDDC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    /// The logit link, for binary outcomes (logistic regression).
    Logit,
    /// The identity link, for continuous outcomes (Gaussian regression).
    Identity,
}

impl fmt::Display for LinkFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFunction::Logit => write!(f, "logit"),
            LinkFunction::Identity => write!(f, "identity"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(
        "The design matrix is rank deficient: numerical rank {rank} with {columns} columns. Remove redundant features or use fewer basis functions."
    )]
    RankDeficient { rank: usize, columns: usize },
    #[error(
        "Logistic regression did not converge after {iterations} iterations (last deviance {deviance:.6})."
    )]
    DidNotConverge { iterations: usize, deviance: f64 },
    #[error("The response for a logit model must be 0 or 1, found {value} at row {row}.")]
    NonBinaryResponse { row: usize, value: f64 },
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("Prediction mode '{mode}' is not available for the {link} link.")]
    UnsupportedPrediction {
        mode: &'static str,
        link: LinkFunction,
    },
    #[error("Confidence level must lie strictly between 0 and 1, got {0}.")]
    InvalidConfidenceLevel(f64),
    #[error("Non-finite values were found in the {0}.")]
    NonFiniteInput(&'static str),
    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// How a model is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub link: LinkFunction,
    /// Prepend a column of ones to the design. Should be false when the design
    /// already spans the constant, as spline bases do.
    pub intercept: bool,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
}

impl ModelSpec {
    pub fn linear() -> Self {
        Self {
            link: LinkFunction::Identity,
            intercept: true,
            max_iterations: 25,
            convergence_tolerance: 1e-8,
        }
    }

    pub fn logistic() -> Self {
        Self {
            link: LinkFunction::Logit,
            ..Self::linear()
        }
    }

    pub fn with_intercept(mut self, intercept: bool) -> Self {
        self.intercept = intercept;
        self
    }
}

/// Requested form of [`FittedModel::predict`] output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredictionMode {
    /// Mean response (identity) or predicted class at p >= 0.5 (logit).
    Point,
    /// Probability of the positive class. Logit only.
    Probability,
    /// Estimate with a pointwise confidence band at the given level.
    ConfidenceInterval { level: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub estimate: Array1<f64>,
    pub lower: Option<Array1<f64>>,
    pub upper: Option<Array1<f64>>,
}

/// A fitted model, serialized to TOML as its own artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub link: LinkFunction,
    pub intercept: bool,
    /// Intercept first when `intercept` is set, then one entry per design column.
    pub coefficients: Array1<f64>,
    /// Covariance of the coefficients, already scaled by the dispersion.
    pub covariance: Array2<f64>,
    pub dispersion: f64,
    pub deviance: f64,
    pub df_residual: usize,
    pub iterations: usize,
}

/// Fits `response ~ design` with the family implied by `spec.link`.
///
/// # Errors
/// * `DimensionMismatch` if the design is empty or its rows differ from the response.
/// * `NonBinaryResponse` for a logit model with responses outside {0, 1}.
/// * `RankDeficient` if the (intercept-augmented) design is not of full column rank.
/// * `DidNotConverge` if IRLS exhausts `spec.max_iterations`.
pub fn fit(
    spec: &ModelSpec,
    design: ArrayView2<f64>,
    response: ArrayView1<f64>,
) -> Result<FittedModel, ModelError> {
    if design.nrows() != response.len() {
        return Err(ModelError::DimensionMismatch(format!(
            "design has {} rows but the response has {}",
            design.nrows(),
            response.len()
        )));
    }
    if design.nrows() == 0 {
        return Err(ModelError::DimensionMismatch(
            "cannot fit a model to zero rows".to_string(),
        ));
    }
    if design.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput("design matrix"));
    }
    if response.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput("response"));
    }

    let x = internal::full_design(design, spec.intercept);
    if x.ncols() == 0 {
        return Err(ModelError::DimensionMismatch(
            "the design has no columns and no intercept was requested".to_string(),
        ));
    }

    let model = match spec.link {
        LinkFunction::Identity => internal::fit_gaussian(spec, x.view(), response)?,
        LinkFunction::Logit => internal::fit_logistic(spec, x.view(), response)?,
    };

    log::info!(
        "Fitted {} model: {} coefficients, deviance {:.4}, {} residual df, {} iterations",
        model.link,
        model.coefficients.len(),
        model.deviance,
        model.df_residual,
        model.iterations
    );
    Ok(model)
}

impl FittedModel {
    /// Number of design columns expected by [`Self::predict`].
    pub fn n_features(&self) -> usize {
        self.coefficients.len() - usize::from(self.intercept)
    }

    /// Linear predictor and its standard error for every row of `design`.
    fn linear_predictor(
        &self,
        design: ArrayView2<f64>,
    ) -> Result<(Array1<f64>, Array1<f64>), ModelError> {
        if design.ncols() != self.n_features() {
            return Err(ModelError::DimensionMismatch(format!(
                "the model expects {} design columns, got {}",
                self.n_features(),
                design.ncols()
            )));
        }
        if design.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput("design matrix"));
        }
        let x = internal::full_design(design, self.intercept);
        let eta = x.dot(&self.coefficients);
        // se_i^2 = x_i' C x_i
        let xc = x.dot(&self.covariance);
        let se = (&xc * &x)
            .sum_axis(Axis(1))
            .mapv(|v| v.max(0.0).sqrt());
        Ok((eta, se))
    }

    pub fn predict(
        &self,
        design: ArrayView2<f64>,
        mode: PredictionMode,
    ) -> Result<Predictions, ModelError> {
        let (eta, se) = self.linear_predictor(design)?;
        match (mode, self.link) {
            (PredictionMode::Point, LinkFunction::Identity) => Ok(Predictions {
                estimate: eta,
                lower: None,
                upper: None,
            }),
            (PredictionMode::Point, LinkFunction::Logit) => Ok(Predictions {
                estimate: eta.mapv(|e| if internal::logistic(e) >= 0.5 { 1.0 } else { 0.0 }),
                lower: None,
                upper: None,
            }),
            (PredictionMode::Probability, LinkFunction::Identity) => {
                Err(ModelError::UnsupportedPrediction {
                    mode: "probability",
                    link: self.link,
                })
            }
            (PredictionMode::Probability, LinkFunction::Logit) => Ok(Predictions {
                estimate: eta.mapv(internal::logistic),
                lower: None,
                upper: None,
            }),
            (PredictionMode::ConfidenceInterval { level }, link) => {
                if !(level > 0.0 && level < 1.0) {
                    return Err(ModelError::InvalidConfidenceLevel(level));
                }
                let z = normal_quantile(0.5 + level / 2.0);
                let lower = &eta - &(&se * z);
                let upper = &eta + &(&se * z);
                // Logit bands are built on the link scale and mapped back, so they
                // stay inside (0, 1).
                let inverse = |values: Array1<f64>| match link {
                    LinkFunction::Identity => values,
                    LinkFunction::Logit => values.mapv(internal::logistic),
                };
                Ok(Predictions {
                    estimate: inverse(eta),
                    lower: Some(inverse(lower)),
                    upper: Some(inverse(upper)),
                })
            }
        }
    }

    /// Coefficient standard errors, in coefficient order.
    pub fn standard_errors(&self) -> Array1<f64> {
        self.covariance.diag().mapv(|v| v.max(0.0).sqrt())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        save_toml(self, path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        load_toml(path)
    }
}

/// Inverse of the standard normal CDF by Acklam's rational approximation
/// (relative error below 1.2e-9 over the open unit interval).
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239e0,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838e0,
        -2.549_732_539_343_734e0,
        4.374_664_141_464_968e0,
        2.938_163_982_698_783e0,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996e0,
        3.754_408_661_907_416e0,
    ];
    const P_LOW: f64 = 0.02425;

    let tail = |q: f64| {
        let num = ((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5];
        let den = (((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0;
        num / den
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - P_LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        let num = (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q;
        let den = ((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0;
        num / den
    }
}

mod internal {
    use super::*;

    const PROB_EPS: f64 = 1e-8;
    const MIN_WEIGHT: f64 = 1e-10;
    const MAX_STEP_HALVINGS: usize = 30;

    pub(super) fn logistic(eta: f64) -> f64 {
        1.0 / (1.0 + (-eta.clamp(-700.0, 700.0)).exp())
    }

    pub(super) fn full_design(design: ArrayView2<f64>, intercept: bool) -> Array2<f64> {
        if intercept {
            let mut x = Array2::<f64>::ones((design.nrows(), design.ncols() + 1));
            x.slice_mut(s![.., 1..]).assign(&design);
            x
        } else {
            design.to_owned()
        }
    }

    pub(super) struct WeightedSolution {
        pub beta: Array1<f64>,
        /// (X' W X)^-1
        pub unscaled_covariance: Array2<f64>,
    }

    /// Minimizes `sum_i w_i (z_i - x_i' beta)^2` through the thin SVD of
    /// `sqrt(W) X`, rejecting numerically rank-deficient designs.
    pub(super) fn weighted_least_squares(
        x: ArrayView2<f64>,
        z: ArrayView1<f64>,
        weights: ArrayView1<f64>,
    ) -> Result<WeightedSolution, ModelError> {
        let (n, p) = x.dim();
        let sqrt_w = weights.mapv(f64::sqrt);
        let xw = &x * &sqrt_w.view().insert_axis(Axis(1));
        let zw = &z * &sqrt_w;

        let (u_opt, singular_values, vt_opt) = xw.svddc(JobSvd::Some)?;
        let (u, vt) = match (u_opt, vt_opt) {
            (Some(u), Some(vt)) => (u, vt),
            _ => {
                return Err(ModelError::DimensionMismatch(
                    "SVD did not return singular vectors".to_string(),
                ));
            }
        };

        let s_max = singular_values.iter().fold(0.0_f64, |acc, &v| acc.max(v));
        let tolerance = s_max * n.max(p) as f64 * f64::EPSILON;
        let rank = singular_values.iter().filter(|&&s| s > tolerance).count();
        if rank < p {
            return Err(ModelError::RankDeficient { rank, columns: p });
        }

        let uz = u.t().dot(&zw) / &singular_values;
        let beta = vt.t().dot(&uz);

        let inv_s2 = singular_values.mapv(|s| 1.0 / (s * s));
        let v_scaled = &vt.t() * &inv_s2.view().insert_axis(Axis(0));
        let unscaled_covariance = v_scaled.dot(&vt);

        Ok(WeightedSolution {
            beta,
            unscaled_covariance,
        })
    }

    pub(super) fn fit_gaussian(
        spec: &ModelSpec,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<FittedModel, ModelError> {
        let (n, p) = x.dim();
        let ones = Array1::<f64>::ones(n);
        let solution = weighted_least_squares(x, y, ones.view())?;
        let mu = x.dot(&solution.beta);
        let deviance = calculate_deviance(y, &mu, LinkFunction::Identity);

        let df_residual = n - p;
        let dispersion = if df_residual > 0 {
            deviance / df_residual as f64
        } else {
            log::warn!("Model is saturated ({n} rows, {p} coefficients); standard errors are zero");
            0.0
        };

        Ok(FittedModel {
            link: LinkFunction::Identity,
            intercept: spec.intercept,
            coefficients: solution.beta,
            covariance: solution.unscaled_covariance * dispersion,
            dispersion,
            deviance,
            df_residual,
            iterations: 1,
        })
    }

    pub(super) fn fit_logistic(
        spec: &ModelSpec,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<FittedModel, ModelError> {
        if let Some((row, &value)) = y
            .iter()
            .enumerate()
            .find(|&(_, &v)| v != 0.0 && v != 1.0)
        {
            return Err(ModelError::NonBinaryResponse { row, value });
        }

        let (n, p) = x.dim();
        let mut beta = Array1::<f64>::zeros(p);
        let mut eta = Array1::<f64>::zeros(n);
        let mut deviance = calculate_deviance(y, &eta.mapv(logistic), LinkFunction::Logit);

        for iteration in 1..=spec.max_iterations {
            let (_, weights, z) = update_glm_vectors(y, &eta);
            let proposal = weighted_least_squares(x, z.view(), weights.view())?.beta;

            let mut candidate = proposal;
            let mut candidate_eta = x.dot(&candidate);
            let mut candidate_deviance =
                calculate_deviance(y, &candidate_eta.mapv(logistic), LinkFunction::Logit);

            let mut halvings = 0;
            while (!candidate_deviance.is_finite() || candidate_deviance > deviance + 1e-12)
                && halvings < MAX_STEP_HALVINGS
            {
                candidate = (&beta + &candidate) * 0.5;
                candidate_eta = x.dot(&candidate);
                candidate_deviance =
                    calculate_deviance(y, &candidate_eta.mapv(logistic), LinkFunction::Logit);
                halvings += 1;
            }
            if halvings > 0 {
                log::debug!("Iteration {iteration}: step halved {halvings} times");
            }

            let change = (deviance - candidate_deviance).abs() / (candidate_deviance.abs() + 0.1);
            log::debug!(
                "Iteration {iteration}: deviance {candidate_deviance:.8}, relative change {change:.3e}"
            );
            beta = candidate;
            eta = candidate_eta;
            deviance = candidate_deviance;

            if change < spec.convergence_tolerance {
                let (mu, weights, z) = update_glm_vectors(y, &eta);
                if mu.iter().any(|&m| m <= PROB_EPS || m >= 1.0 - PROB_EPS) {
                    log::warn!("Fitted probabilities numerically 0 or 1 occurred");
                }
                let covariance =
                    weighted_least_squares(x, z.view(), weights.view())?.unscaled_covariance;
                return Ok(FittedModel {
                    link: LinkFunction::Logit,
                    intercept: spec.intercept,
                    coefficients: beta,
                    covariance,
                    dispersion: 1.0,
                    deviance,
                    df_residual: n.saturating_sub(p),
                    iterations: iteration,
                });
            }
        }

        Err(ModelError::DidNotConverge {
            iterations: spec.max_iterations,
            deviance,
        })
    }

    /// Mean, working weights and working response for a logit IRLS step.
    pub(super) fn update_glm_vectors(
        y: ArrayView1<f64>,
        eta: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let mu = eta.mapv(|e| logistic(e).clamp(PROB_EPS, 1.0 - PROB_EPS));
        let weights = (&mu * &(1.0 - &mu)).mapv(|v| v.max(MIN_WEIGHT));
        let z = eta + &((&y - &mu) / &weights);
        (mu, weights, z)
    }

    pub(super) fn calculate_deviance(
        y: ArrayView1<f64>,
        mu: &Array1<f64>,
        link: LinkFunction,
    ) -> f64 {
        match link {
            LinkFunction::Logit => {
                let total = Zip::from(y).and(mu).fold(0.0, |acc, &yi, &mui| {
                    let mui = mui.clamp(PROB_EPS, 1.0 - PROB_EPS);
                    let term1 = if yi > 0.0 { yi * (yi.ln() - mui.ln()) } else { 0.0 };
                    let term2 = if yi < 1.0 {
                        (1.0 - yi) * ((1.0 - yi).ln() - (1.0 - mui).ln())
                    } else {
                        0.0
                    };
                    acc + term1 + term2
                });
                2.0 * total
            }
            LinkFunction::Identity => Zip::from(y)
                .and(mu)
                .fold(0.0, |acc, &yi, &mui| acc + (yi - mui) * (yi - mui)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array, stack};
    use tempfile::NamedTempFile;

    fn line_design(n: usize) -> Array2<f64> {
        Array::linspace(0.0, 10.0, n).insert_axis(Axis(1))
    }

    #[test]
    fn test_least_squares_recovers_noiseless_coefficients() {
        let x = Array::linspace(-2.0, 3.0, 25);
        let design = stack(Axis(1), &[x.view(), x.mapv(|v| v * v).view()]).unwrap();
        let y = x.mapv(|v| 1.5 - 2.0 * v + 0.25 * v * v);

        let model = fit(&ModelSpec::linear(), design.view(), y.view()).unwrap();
        assert_eq!(model.coefficients.len(), 3);
        assert_abs_diff_eq!(model.coefficients[0], 1.5, epsilon = 1e-10);
        assert_abs_diff_eq!(model.coefficients[1], -2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(model.coefficients[2], 0.25, epsilon = 1e-10);
        assert_abs_diff_eq!(model.deviance, 0.0, epsilon = 1e-16);
        assert_eq!(model.df_residual, 22);
    }

    #[test]
    fn test_least_squares_matches_closed_form_line() {
        let design = line_design(5);
        let y = array![1.0, 3.0, 2.0, 5.0, 4.0];
        let model = fit(&ModelSpec::linear(), design.view(), y.view()).unwrap();

        // x = 0, 2.5, ..., 10; slope = Sxy / Sxx with Sxx = 62.5, Sxy = 20.
        assert_abs_diff_eq!(model.coefficients[1], 0.32, epsilon = 1e-12);
        assert_abs_diff_eq!(model.coefficients[0], 3.0 - 0.32 * 5.0, epsilon = 1e-12);
        let rss = model.deviance;
        assert_abs_diff_eq!(model.dispersion, rss / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            model.standard_errors()[1],
            (model.dispersion / 62.5).sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rank_deficient_design_is_rejected() {
        let x = Array::linspace(0.0, 1.0, 10);
        let design = stack(Axis(1), &[x.view(), (&x * 2.0).view()]).unwrap();
        let y = x.clone();
        match fit(&ModelSpec::linear(), design.view(), y.view()).unwrap_err() {
            ModelError::RankDeficient { rank, columns } => {
                assert_eq!(rank, 2);
                assert_eq!(columns, 3);
            }
            other => panic!("Expected RankDeficient, got {other:?}"),
        }

        // A constant column duplicates the intercept.
        let constant = Array2::<f64>::ones((10, 1));
        assert!(matches!(
            fit(&ModelSpec::linear(), constant.view(), y.view()),
            Err(ModelError::RankDeficient { .. })
        ));
        assert!(fit(&ModelSpec::linear().with_intercept(false), constant.view(), y.view()).is_ok());
    }

    #[test]
    fn test_logistic_fit_converges_and_orders_probabilities() {
        let design = line_design(40);
        let y = Array1::from_iter((0..40).map(|i| {
            // Overlapping classes so the maximum likelihood estimate is finite.
            if (i < 20 && i % 4 != 0) || (i >= 20 && i % 5 == 0) { 0.0 } else { 1.0 }
        }));
        let model = fit(&ModelSpec::logistic(), design.view(), y.view()).unwrap();
        assert!(model.iterations < 25);
        assert!(model.coefficients[1] > 0.0);
        assert_abs_diff_eq!(model.dispersion, 1.0);

        let probs = model
            .predict(design.view(), PredictionMode::Probability)
            .unwrap()
            .estimate;
        assert!(probs.windows(2).into_iter().all(|w| w[0] < w[1]));
        assert!(probs.iter().all(|&p| p > 0.0 && p < 1.0));

        // At the MLE with an intercept, fitted probabilities sum to the number of ones.
        assert_abs_diff_eq!(probs.sum(), y.sum(), epsilon = 1e-4);

        let classes = model.predict(design.view(), PredictionMode::Point).unwrap().estimate;
        for (&c, &p) in classes.iter().zip(probs.iter()) {
            assert_eq!(c, if p >= 0.5 { 1.0 } else { 0.0 });
        }
    }

    #[test]
    fn test_logistic_rejects_non_binary_response() {
        let design = line_design(4);
        let y = array![0.0, 1.0, 2.0, 1.0];
        assert!(matches!(
            fit(&ModelSpec::logistic(), design.view(), y.view()),
            Err(ModelError::NonBinaryResponse { row: 2, .. })
        ));
    }

    #[test]
    fn test_intervals_bracket_the_estimate() {
        let design = line_design(30);
        let y = Array1::from_iter(
            (0..30).map(|i| (i as f64) * 0.3 + if i % 2 == 0 { 0.5 } else { -0.5 }),
        );
        let model = fit(&ModelSpec::linear(), design.view(), y.view()).unwrap();
        let prediction = model
            .predict(design.view(), PredictionMode::ConfidenceInterval { level: 0.95 })
            .unwrap();
        let lower = prediction.lower.unwrap();
        let upper = prediction.upper.unwrap();
        for i in 0..30 {
            assert!(lower[i] < prediction.estimate[i]);
            assert!(prediction.estimate[i] < upper[i]);
            assert_abs_diff_eq!(
                prediction.estimate[i] - lower[i],
                upper[i] - prediction.estimate[i],
                epsilon = 1e-10
            );
        }
        // The band is narrowest at the centre of the data.
        assert!(upper[15] - lower[15] < upper[0] - lower[0]);
    }

    #[test]
    fn test_prediction_mode_errors() {
        let design = line_design(10);
        let y = design.column(0).mapv(|v| 2.0 * v + 1.0);
        let model = fit(&ModelSpec::linear(), design.view(), y.view()).unwrap();
        assert!(matches!(
            model.predict(design.view(), PredictionMode::Probability),
            Err(ModelError::UnsupportedPrediction { .. })
        ));
        assert!(matches!(
            model.predict(design.view(), PredictionMode::ConfidenceInterval { level: 1.0 }),
            Err(ModelError::InvalidConfidenceLevel(_))
        ));
        let wrong_width = Array2::<f64>::zeros((3, 2));
        assert!(matches!(
            model.predict(wrong_width.view(), PredictionMode::Point),
            Err(ModelError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_normal_quantile_known_values() {
        assert_abs_diff_eq!(normal_quantile(0.975), 1.959_963_985, epsilon = 1e-8);
        assert_abs_diff_eq!(normal_quantile(0.5), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normal_quantile(0.995), 2.575_829_304, epsilon = 1e-8);
        assert_abs_diff_eq!(normal_quantile(0.01), -2.326_347_874, epsilon = 1e-8);
        assert!(normal_quantile(0.0).is_infinite());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let design = line_design(12);
        let y = design.column(0).mapv(|v| (v * 0.7).sin());
        let model = fit(&ModelSpec::linear(), design.view(), y.view()).unwrap();
        let file = NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let loaded = FittedModel::load(file.path()).unwrap();
        assert_eq!(loaded, model);
    }
}
