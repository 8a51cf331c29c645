use approx::assert_abs_diff_eq;
use basisfit::discretize::CutSpec;
use basisfit::polynomial::PolynomialSpec;
use basisfit::regress::data::{Dataset, above_threshold, load_table};
use basisfit::regress::glm::{self, FittedModel, ModelError, ModelSpec, PredictionMode};
use basisfit::spline::{BSplineSpec, KnotPlacement};
use basisfit::steps::{FittedSteps, Steps, TransformSpec};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Writes `n` rows of synthetic age/wage data with a hump-shaped mean.
fn write_wage_table(path: &Path, n: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 25.0).unwrap();
    let mut content = String::from("age,wage,year\n");
    for i in 0..n {
        let age = rng.gen_range(18..=80) as f64;
        let wage = 40.0 + 4.0 * age - 0.035 * age * age + rng.sample(noise);
        content.push_str(&format!("{age},{wage:.3},{}\n", 2003 + i % 7));
    }
    fs::write(path, content).unwrap();
}

fn grid() -> Dataset {
    Dataset::from_columns([(
        "age".to_string(),
        Array1::from_iter((18..=80).map(|a| a as f64)),
    )])
    .unwrap()
}

#[test]
fn polynomial_fit_round_trips_through_artifacts() {
    let dir = tempdir().unwrap();
    let table = dir.path().join("wage.csv");
    write_wage_table(&table, 600, 1);
    let data = load_table(&table, &["age", "wage"], 10).unwrap();

    let fitted = Steps::new()
        .then("age", TransformSpec::Polynomial(PolynomialSpec::orthogonal(4)))
        .fit(&data)
        .unwrap();
    let design = fitted.apply(&data).unwrap();
    let model = glm::fit(&ModelSpec::linear(), design.view(), data.get("wage").unwrap()).unwrap();
    assert_eq!(model.coefficients.len(), 5);
    // With orthonormal columns and an intercept, the intercept is the sample mean.
    assert_abs_diff_eq!(
        model.coefficients[0],
        data.get("wage").unwrap().mean().unwrap(),
        epsilon = 1e-8
    );

    let transform_path = dir.path().join("transform.toml");
    let model_path = dir.path().join("model.toml");
    fitted.save(&transform_path).unwrap();
    model.save(&model_path).unwrap();
    let loaded_steps = FittedSteps::load(&transform_path).unwrap();
    let loaded_model = FittedModel::load(&model_path).unwrap();

    let mode = PredictionMode::ConfidenceInterval { level: 0.95 };
    let grid = grid();
    let expected = model
        .predict(fitted.apply(&grid).unwrap().view(), mode)
        .unwrap();
    let reloaded = loaded_model
        .predict(loaded_steps.apply(&grid).unwrap().view(), mode)
        .unwrap();
    assert_eq!(expected, reloaded);

    let lower = reloaded.lower.unwrap();
    let upper = reloaded.upper.unwrap();
    for i in 0..reloaded.estimate.len() {
        assert!(lower[i] < reloaded.estimate[i] && reloaded.estimate[i] < upper[i]);
    }
}

#[test]
fn step_function_coefficients_are_bin_mean_differences() {
    let dir = tempdir().unwrap();
    let table = dir.path().join("wage.csv");
    write_wage_table(&table, 400, 2);
    let data = load_table(&table, &["age", "wage"], 10).unwrap();

    let breaks = vec![30.0, 50.0, 70.0];
    let fitted = Steps::new()
        .then("age", TransformSpec::Cut(CutSpec { breaks: breaks.clone() }))
        .fit(&data)
        .unwrap();
    let design = fitted.apply(&data).unwrap();
    let wage = data.get("wage").unwrap();
    let model = glm::fit(&ModelSpec::linear(), design.view(), wage).unwrap();

    let ages = data.get("age").unwrap();
    let bin_mean = |lo: f64, hi: f64| {
        let selected: Vec<f64> = ages
            .iter()
            .zip(wage.iter())
            .filter(|&(&a, _)| a > lo && a <= hi)
            .map(|(_, &w)| w)
            .collect();
        selected.iter().sum::<f64>() / selected.len() as f64
    };
    let reference = bin_mean(f64::NEG_INFINITY, 30.0);
    assert_abs_diff_eq!(model.coefficients[0], reference, epsilon = 1e-8);
    assert_abs_diff_eq!(model.coefficients[1], bin_mean(30.0, 50.0) - reference, epsilon = 1e-8);
    assert_abs_diff_eq!(model.coefficients[2], bin_mean(50.0, 70.0) - reference, epsilon = 1e-8);
    assert_abs_diff_eq!(
        model.coefficients[3],
        bin_mean(70.0, f64::INFINITY) - reference,
        epsilon = 1e-8
    );
}

#[test]
fn spline_design_replaces_the_intercept() {
    let dir = tempdir().unwrap();
    let table = dir.path().join("wage.csv");
    write_wage_table(&table, 500, 3);
    let data = load_table(&table, &["age", "wage"], 10).unwrap();

    let fitted = Steps::new()
        .then(
            "age",
            TransformSpec::BSpline(BSplineSpec {
                knots: KnotPlacement::Quantiles(3),
                degree: 3,
                boundary: None,
            }),
        )
        .fit(&data)
        .unwrap();
    assert!(fitted.spans_intercept());
    let design = fitted.apply(&data).unwrap();
    let wage = data.get("wage").unwrap();

    assert!(matches!(
        glm::fit(&ModelSpec::linear(), design.view(), wage),
        Err(ModelError::RankDeficient { .. })
    ));
    let model = glm::fit(
        &ModelSpec::linear().with_intercept(false),
        design.view(),
        wage,
    )
    .unwrap();
    assert_eq!(model.coefficients.len(), 7);

    // The fitted curve stays finite and continuous past the training range.
    let far =
        Dataset::from_columns([("age".to_string(), ndarray::array![80.0, 80.5, 81.0])]).unwrap();
    let fit_far = model
        .predict(fitted.apply(&far).unwrap().view(), PredictionMode::Point)
        .unwrap()
        .estimate;
    assert!(fit_far.iter().all(|v| v.is_finite()));
    assert_abs_diff_eq!(
        fit_far[1] - fit_far[0],
        fit_far[2] - fit_far[1],
        epsilon = 1e-8
    );
}

#[test]
fn logistic_fit_on_thresholded_wage() {
    let dir = tempdir().unwrap();
    let table = dir.path().join("wage.tsv");
    let csv = dir.path().join("wage.csv");
    write_wage_table(&csv, 800, 4);
    fs::write(&table, fs::read_to_string(&csv).unwrap().replace(',', "\t")).unwrap();
    let data = load_table(&table, &["age", "wage"], 10).unwrap();

    let high_earner = above_threshold(data.get("wage").unwrap(), 140.0);
    assert!(high_earner.sum() > 0.0 && high_earner.sum() < high_earner.len() as f64);

    let fitted = Steps::new()
        .then("age", TransformSpec::Polynomial(PolynomialSpec::orthogonal(2)))
        .fit(&data)
        .unwrap();
    let design = fitted.apply(&data).unwrap();
    let model = glm::fit(&ModelSpec::logistic(), design.view(), high_earner.view()).unwrap();
    assert_abs_diff_eq!(model.dispersion, 1.0);

    let grid_design = fitted.apply(&grid()).unwrap();
    let probability = model
        .predict(grid_design.view(), PredictionMode::Probability)
        .unwrap()
        .estimate;
    let band = model
        .predict(
            grid_design.view(),
            PredictionMode::ConfidenceInterval { level: 0.95 },
        )
        .unwrap();
    let (lower, upper) = (band.lower.unwrap(), band.upper.unwrap());
    for i in 0..probability.len() {
        assert_abs_diff_eq!(band.estimate[i], probability[i], epsilon = 1e-12);
        assert!(0.0 < lower[i] && lower[i] <= probability[i]);
        assert!(probability[i] <= upper[i] && upper[i] < 1.0);
    }

    // Wages peak in middle age, so the probability of a high wage does too.
    let peak = probability
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        .0;
    assert!(peak > 0 && peak < probability.len() - 1);
}
