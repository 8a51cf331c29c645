#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use basisfit::discretize::{CutSpec, DiscretizeSpec};
use basisfit::natural::NaturalSplineSpec;
use basisfit::polynomial::PolynomialSpec;
use basisfit::regress::data::{Dataset, MINIMUM_TRAINING_ROWS, above_threshold, load_table};
use basisfit::regress::glm::{self, FittedModel, LinkFunction, ModelSpec, PredictionMode};
use basisfit::spline::{BSplineSpec, KnotPlacement};
use basisfit::steps::{FittedSteps, Steps, TransformSpec};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum BasisKind {
    /// Orthogonal polynomial
    Poly,
    /// Raw monomials x, x^2, ...
    RawPoly,
    /// Quantile bins with roughly equal counts
    Discretize,
    /// Bins at the cut points given with --cuts
    Cut,
    /// B-spline basis
    Bspline,
    /// Natural cubic spline basis
    Natural,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LinkCli {
    /// Logit when the response only takes the values 0 and 1, identity otherwise
    Auto,
    Identity,
    Logit,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeCli {
    Point,
    Probability,
    Interval,
}

#[derive(Args)]
pub struct FitArgs {
    /// Path to the training table (CSV, or TSV for .tsv/.tab files)
    pub data: PathBuf,

    /// Column to expand
    #[arg(long, default_value = "age")]
    pub predictor: String,

    /// Column to model
    #[arg(long, default_value = "wage")]
    pub response: String,

    /// Model the indicator `response > VALUE` instead of the response itself
    #[arg(long, value_name = "VALUE")]
    pub above: Option<f64>,

    #[arg(long, value_enum, default_value_t = BasisKind::Poly)]
    pub basis: BasisKind,

    /// Polynomial degree (default 4) or spline degree (default 3)
    #[arg(long)]
    pub degree: Option<usize>,

    /// Number of bins for --basis discretize
    #[arg(long, default_value = "4")]
    pub breaks: usize,

    /// Cut points for --basis cut
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub cuts: Vec<f64>,

    /// Interior knots for spline bases
    #[arg(long, value_delimiter = ',', num_args = 1.., conflicts_with = "quantile_knots")]
    pub knots: Vec<f64>,

    /// Place this many interior knots at quantiles of the predictor (default 3)
    #[arg(long, value_name = "N")]
    pub quantile_knots: Option<usize>,

    #[arg(long, value_enum, default_value_t = LinkCli::Auto)]
    pub link: LinkCli,

    /// Maximum number of IRLS iterations for logistic fits
    #[arg(long, default_value = "25")]
    pub max_iterations: usize,

    /// Convergence tolerance on the relative deviance change
    #[arg(long, default_value = "1e-8")]
    pub convergence_tolerance: f64,

    /// Directory receiving transform.toml and model.toml
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Table holding the predictor columns; omit when using --grid
    pub data: Option<PathBuf>,

    /// Path to a fitted transform file (.toml)
    #[arg(long)]
    pub transform: PathBuf,

    /// Path to a fitted model file (.toml)
    #[arg(long)]
    pub model: PathBuf,

    /// Evenly spaced predictor values, as FROM:TO:STEP
    #[arg(long, value_parser = parse_grid, conflicts_with = "data")]
    pub grid: Option<Array1<f64>>,

    #[arg(long, value_enum, default_value_t = ModeCli::Point)]
    pub mode: ModeCli,

    /// Confidence level for --mode interval
    #[arg(long, default_value = "0.95")]
    pub level: f64,

    #[arg(long, default_value = "predictions.tsv")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct ExpandArgs {
    /// Table holding the predictor columns
    pub data: PathBuf,

    /// Path to a fitted transform file (.toml)
    #[arg(long)]
    pub transform: PathBuf,

    #[arg(long, default_value = "design.tsv")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "basisfit",
    version,
    about = "Polynomial, step-function and spline expansions of a numeric predictor, with linear and logistic fits."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a transform and a model on training data
    #[command(about = "Fit a basis expansion and a model (outputs: transform.toml, model.toml)")]
    Fit(FitArgs),

    /// Predict from a fitted transform and model
    #[command(about = "Predict with a fitted transform and model (outputs: predictions.tsv)")]
    Predict(PredictArgs),

    /// Write the design matrix produced by a fitted transform
    #[command(about = "Expand data with a fitted transform (outputs: design.tsv)")]
    Expand(ExpandArgs),
}

fn main() {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fit(args) => fit(args),
        Commands::Predict(args) => predict(args),
        Commands::Expand(args) => expand(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

pub fn fit(args: FitArgs) -> Result<(), Box<dyn Error>> {
    let data = load_table(
        &args.data,
        &[args.predictor.as_str(), args.response.as_str()],
        MINIMUM_TRAINING_ROWS,
    )?;

    let response = match args.above {
        Some(threshold) => {
            let indicator = above_threshold(data.get(&args.response)?, threshold);
            log::info!(
                "Modelling {} > {}: {} of {} rows",
                args.response,
                threshold,
                indicator.sum(),
                indicator.len()
            );
            indicator
        }
        None => data.get(&args.response)?.to_owned(),
    };

    let link = match args.link {
        LinkCli::Auto => {
            let detected = detect_link_function(response.view());
            log::info!("Auto-detected link function: {detected}");
            detected
        }
        LinkCli::Identity => LinkFunction::Identity,
        LinkCli::Logit => LinkFunction::Logit,
    };

    let transform = transform_from_args(&args)?;
    let steps = Steps::new().then(args.predictor.clone(), transform);
    let fitted = steps.fit(&data)?;
    let design = fitted.apply(&data)?;

    let spec = ModelSpec {
        link,
        intercept: !fitted.spans_intercept(),
        max_iterations: args.max_iterations,
        convergence_tolerance: args.convergence_tolerance,
    };
    let model = glm::fit(&spec, design.view(), response.view())?;

    let names = coefficient_names(&fitted, &model);
    for ((name, beta), se) in names
        .iter()
        .zip(model.coefficients.iter())
        .zip(model.standard_errors().iter())
    {
        log::info!("  {name:<24} {beta:>14.6} (se {se:.6})");
    }

    fs::create_dir_all(&args.out_dir)?;
    let transform_path = args.out_dir.join("transform.toml");
    let model_path = args.out_dir.join("model.toml");
    fitted.save(&transform_path)?;
    model.save(&model_path)?;
    log::info!(
        "Saved transform to '{}' and model to '{}'",
        transform_path.display(),
        model_path.display()
    );
    Ok(())
}

pub fn predict(args: PredictArgs) -> Result<(), Box<dyn Error>> {
    let fitted = FittedSteps::load(&args.transform)?;
    let model = FittedModel::load(&args.model)?;
    let sources: Vec<&str> = fitted.source_columns().into_iter().unique().collect();

    let dataset = match (&args.grid, &args.data) {
        (Some(grid), _) => {
            if sources.len() != 1 {
                return Err(format!(
                    "--grid needs a transform over a single column, found {:?}",
                    sources
                )
                .into());
            }
            Dataset::from_columns([(sources[0].to_string(), grid.clone())])?
        }
        (None, Some(path)) => load_table(path, &sources, 1)?,
        (None, None) => return Err("either a data file or --grid is required".into()),
    };

    let design = fitted.apply(&dataset)?;
    let mode = match args.mode {
        ModeCli::Point => PredictionMode::Point,
        ModeCli::Probability => PredictionMode::Probability,
        ModeCli::Interval => PredictionMode::ConfidenceInterval { level: args.level },
    };
    let predictions = model.predict(design.view(), mode)?;

    let mut header: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
    let mut columns: Vec<ArrayView1<f64>> = Vec::with_capacity(sources.len() + 3);
    for &name in &sources {
        columns.push(dataset.get(name)?);
    }
    header.push("estimate".to_string());
    columns.push(predictions.estimate.view());
    if let (Some(lower), Some(upper)) = (&predictions.lower, &predictions.upper) {
        header.push("lower".to_string());
        header.push("upper".to_string());
        columns.push(lower.view());
        columns.push(upper.view());
    }

    write_tsv(&args.output, &header, dataset.n_rows(), |row| {
        columns.iter().map(|c| c[row]).collect()
    })?;
    log::info!(
        "Wrote {} predictions to '{}'",
        dataset.n_rows(),
        args.output.display()
    );
    Ok(())
}

pub fn expand(args: ExpandArgs) -> Result<(), Box<dyn Error>> {
    let fitted = FittedSteps::load(&args.transform)?;
    let sources: Vec<&str> = fitted.source_columns().into_iter().unique().collect();
    let dataset = load_table(&args.data, &sources, 1)?;
    let design: Array2<f64> = fitted.apply(&dataset)?;

    write_tsv(&args.output, &fitted.column_names(), design.nrows(), |row| {
        design.row(row).to_vec()
    })?;
    log::info!(
        "Wrote {}x{} design matrix to '{}'",
        design.nrows(),
        design.ncols(),
        args.output.display()
    );
    Ok(())
}

fn transform_from_args(args: &FitArgs) -> Result<TransformSpec, Box<dyn Error>> {
    let knots = if args.knots.is_empty() {
        KnotPlacement::Quantiles(args.quantile_knots.unwrap_or(3))
    } else {
        KnotPlacement::Explicit(args.knots.clone())
    };

    Ok(match args.basis {
        BasisKind::Poly => {
            TransformSpec::Polynomial(PolynomialSpec::orthogonal(args.degree.unwrap_or(4)))
        }
        BasisKind::RawPoly => {
            TransformSpec::Polynomial(PolynomialSpec::raw(args.degree.unwrap_or(4)))
        }
        BasisKind::Discretize => TransformSpec::Discretize(DiscretizeSpec {
            num_breaks: args.breaks,
        }),
        BasisKind::Cut => {
            if args.cuts.is_empty() {
                return Err("--basis cut requires --cuts".into());
            }
            TransformSpec::Cut(CutSpec {
                breaks: args.cuts.clone(),
            })
        }
        BasisKind::Bspline => TransformSpec::BSpline(BSplineSpec {
            knots,
            degree: args.degree.unwrap_or(3),
            boundary: None,
        }),
        BasisKind::Natural => {
            if args.degree.is_some_and(|d| d != 3) {
                log::warn!("Natural splines are always cubic; ignoring --degree");
            }
            TransformSpec::NaturalSpline(NaturalSplineSpec {
                knots,
                boundary: None,
            })
        }
    })
}

fn detect_link_function(response: ArrayView1<f64>) -> LinkFunction {
    let binary = response.iter().all(|&v| v == 0.0 || v == 1.0);
    let both_classes = response.iter().any(|&v| v == 0.0) && response.iter().any(|&v| v == 1.0);
    if binary && both_classes {
        LinkFunction::Logit
    } else {
        LinkFunction::Identity
    }
}

fn coefficient_names(fitted: &FittedSteps, model: &FittedModel) -> Vec<String> {
    let mut names = Vec::with_capacity(model.coefficients.len());
    if model.intercept {
        names.push("(Intercept)".to_string());
    }
    names.extend(fitted.column_names());
    names
}

/// Parses `FROM:TO:STEP` into the values FROM, FROM+STEP, ... up to TO inclusive.
const MAX_GRID_POINTS: usize = 10_000_000;

fn parse_grid(spec: &str) -> Result<Array1<f64>, String> {
    let parts: Vec<f64> = spec
        .split(':')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid grid '{spec}': {e}"))?;
    let [from, to, step] = parts[..] else {
        return Err(format!("grid must have the form FROM:TO:STEP, got '{spec}'"));
    };
    if !(from.is_finite() && to.is_finite() && step.is_finite()) || step <= 0.0 || to < from {
        return Err(format!(
            "grid needs finite FROM <= TO and a positive STEP, got '{spec}'"
        ));
    }
    let intervals = ((to - from) / step + 1e-9).floor();
    if !intervals.is_finite() || intervals >= MAX_GRID_POINTS as f64 {
        return Err(format!("grid '{spec}' exceeds {MAX_GRID_POINTS} points"));
    }
    let count = intervals as usize + 1;
    Ok(Array1::from_iter((0..count).map(|i| from + i as f64 * step)))
}

fn write_tsv<F>(path: &Path, header: &[String], n_rows: usize, row: F) -> Result<(), Box<dyn Error>>
where
    F: Fn(usize) -> Vec<f64>,
{
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    writer.write_record(header)?;
    for i in 0..n_rows {
        writer.write_record(row(i).iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
