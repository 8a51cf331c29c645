//! An explicit, ordered sequence of column transforms.
//!
//! Each step names a source column and a transform. Fitting learns every step
//! independently; applying expands every step's column and concatenates the
//! blocks left to right in declaration order.

use crate::artifact::{ArtifactError, load_toml, save_toml};
use crate::discretize::{BinSpec, CutSpec, DiscretizeSpec};
use crate::natural::{NaturalSplineBasis, NaturalSplineSpec};
use crate::polynomial::{PolynomialBasis, PolynomialSpec};
use crate::spline::{BSplineSpec, SplineBasis};
use crate::transform::{DesignMatrix, FittedTransform, Transform, TransformError};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Anything that can hand out named numeric columns of equal length.
pub trait ColumnSource {
    fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>>;
}

impl ColumnSource for HashMap<String, Array1<f64>> {
    fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.get(name).map(|c| c.view())
    }
}

/// One of the supported transforms, before fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformSpec {
    Polynomial(PolynomialSpec),
    Discretize(DiscretizeSpec),
    Cut(CutSpec),
    BSpline(BSplineSpec),
    NaturalSpline(NaturalSplineSpec),
}

impl Transform for TransformSpec {
    type Fitted = FittedBasis;

    fn fit(&self, column: ArrayView1<f64>) -> Result<FittedBasis, TransformError> {
        Ok(match self {
            TransformSpec::Polynomial(spec) => FittedBasis::Polynomial(spec.fit(column)?),
            TransformSpec::Discretize(spec) => FittedBasis::Bins(spec.fit(column)?),
            TransformSpec::Cut(spec) => FittedBasis::Bins(spec.fit(column)?),
            TransformSpec::BSpline(spec) => FittedBasis::BSpline(spec.fit(column)?),
            TransformSpec::NaturalSpline(spec) => FittedBasis::NaturalSpline(spec.fit(column)?),
        })
    }
}

/// One of the supported transforms, after fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedBasis {
    Polynomial(PolynomialBasis),
    Bins(BinSpec),
    BSpline(SplineBasis),
    NaturalSpline(NaturalSplineBasis),
}

impl FittedBasis {
    fn as_transform(&self) -> &dyn FittedTransform {
        match self {
            FittedBasis::Polynomial(basis) => basis,
            FittedBasis::Bins(bins) => bins,
            FittedBasis::BSpline(basis) => basis,
            FittedBasis::NaturalSpline(basis) => basis,
        }
    }
}

impl FittedTransform for FittedBasis {
    fn apply(&self, column: ArrayView1<f64>) -> Result<DesignMatrix, TransformError> {
        self.as_transform().apply(column)
    }

    fn n_columns(&self) -> usize {
        self.as_transform().n_columns()
    }

    fn column_names(&self, prefix: &str) -> Vec<String> {
        self.as_transform().column_names(prefix)
    }

    fn spans_intercept(&self) -> bool {
        self.as_transform().spans_intercept()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub column: String,
    pub transform: TransformSpec,
}

/// The ordered, unfitted step sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Steps {
    pub steps: Vec<Step>,
}

impl Steps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step; steps are applied in the order they are added.
    pub fn then(mut self, column: impl Into<String>, transform: TransformSpec) -> Self {
        self.steps.push(Step {
            column: column.into(),
            transform,
        });
        self
    }

    /// Fits every step against its column in `source`. Steps share no state, so
    /// they are fitted in parallel.
    pub fn fit<S: ColumnSource + Sync>(&self, source: &S) -> Result<FittedSteps, TransformError> {
        if self.steps.is_empty() {
            return Err(TransformError::invalid(
                "steps",
                "at least one transform step is required",
            ));
        }

        let fitted: Vec<FittedStep> = self
            .steps
            .par_iter()
            .map(|step| -> Result<FittedStep, TransformError> {
                let column = lookup(source, &step.column)?;
                let basis = step.transform.fit(column)?;
                log::info!(
                    "Fitted step on '{}' producing {} columns",
                    step.column,
                    basis.n_columns()
                );
                Ok(FittedStep {
                    column: step.column.clone(),
                    basis,
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(FittedSteps { steps: fitted })
    }
}

fn lookup<'a, S: ColumnSource>(
    source: &'a S,
    name: &str,
) -> Result<ArrayView1<'a, f64>, TransformError> {
    source
        .column(name)
        .ok_or_else(|| TransformError::DimensionMismatch {
            reason: format!("column '{name}' is not present in the input data"),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedStep {
    pub column: String,
    pub basis: FittedBasis,
}

/// The fitted step sequence. Saved and loaded independently of any model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedSteps {
    pub steps: Vec<FittedStep>,
}

impl FittedSteps {
    /// Expands every step's column and concatenates the blocks in step order.
    ///
    /// When several blocks each sum to one (spline bases), the first column of
    /// every such block after the first is dropped, so the combined design spans
    /// the constant exactly once.
    pub fn apply<S: ColumnSource>(&self, source: &S) -> Result<DesignMatrix, TransformError> {
        let mut blocks = Vec::with_capacity(self.steps.len());
        let mut n_rows = None;
        for (step, drops_first) in self.steps.iter().zip(self.absorbed_columns()) {
            let column = lookup(source, &step.column)?;
            if let Some(expected) = n_rows {
                if column.len() != expected {
                    return Err(TransformError::DimensionMismatch {
                        reason: format!(
                            "column '{}' has {} rows, expected {}",
                            step.column,
                            column.len(),
                            expected
                        ),
                    });
                }
            }
            n_rows = Some(column.len());

            let design = step.basis.apply(column)?;
            blocks.push(if drops_first {
                design.slice(s![.., 1..]).to_owned()
            } else {
                design
            });
        }

        let views: Vec<ArrayView2<f64>> = blocks.iter().map(|block| block.view()).collect();
        ndarray::concatenate(Axis(1), &views).map_err(|e| TransformError::DimensionMismatch {
            reason: format!("failed to concatenate step outputs: {e}"),
        })
    }

    /// Names of the columns produced by [`Self::apply`], in order.
    pub fn column_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .zip(self.absorbed_columns())
            .flat_map(|(step, drops_first)| {
                let names = step.basis.column_names(&step.column);
                names.into_iter().skip(usize::from(drops_first))
            })
            .collect()
    }

    pub fn n_columns(&self) -> usize {
        self.column_names().len()
    }

    /// True when the combined design already spans the constant, so a model
    /// fitted on it must not add its own intercept.
    pub fn spans_intercept(&self) -> bool {
        self.steps.iter().any(|step| step.basis.spans_intercept())
    }

    /// Source columns, in step order.
    pub fn source_columns(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.column.as_str()).collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        save_toml(self, path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        load_toml(path)
    }

    fn absorbed_columns(&self) -> Vec<bool> {
        let mut seen_spanning = false;
        self.steps
            .iter()
            .map(|step| {
                let spans = step.basis.spans_intercept();
                let drop = spans && seen_spanning;
                seen_spanning |= spans;
                drop
            })
            .collect()
    }
}
