#![deny(dead_code)]
#![deny(unused_imports)]

//! # basisfit
//!
//! Basis expansions for a single numeric predictor, and the small GLM used to fit
//! models on top of them.
//!
//! The transform layer follows one lifecycle everywhere: a transform spec is
//! fitted once against a training column, producing an immutable fitted basis, and
//! that fitted basis is then applied unchanged to any new column. Fitted bases and
//! fitted models are separate artifacts; neither knows about the other.

pub mod artifact;
pub mod discretize;
pub mod natural;
pub mod polynomial;
pub mod spline;
pub mod steps;
pub mod transform;

#[path = "../regress/lib.rs"]
pub mod regress;

pub use transform::{DesignMatrix, FittedTransform, Transform, TransformError};
