use super::backend::ForecastBackend;
use crate::models::{ModelEvaluation, Observation};
use anyhow::{Result, bail};

const MIN_HOLDOUT: usize = 5;
const MAX_HOLDOUT: usize = 60;
const MIN_TRAIN: usize = 20;

pub fn holdout_size(n: usize) -> usize {
    (n / 10).clamp(MIN_HOLDOUT, MAX_HOLDOUT)
}

/// Fit on everything but the last `holdout_size(n)` rows and score the
/// predictions for the held-out dates.
pub fn evaluate(backend: &dyn ForecastBackend, history: &[Observation]) -> Result<ModelEvaluation> {
    let holdout = holdout_size(history.len());
    if history.len() < holdout + MIN_TRAIN {
        bail!("{} observations are too few to evaluate", history.len());
    }

    let (train, test) = history.split_at(history.len() - holdout);
    let model = backend.fit(train)?;
    let dates: Vec<_> = test.iter().map(|o| o.date).collect();
    let predicted: Vec<f64> = model.predict_dates(&dates)?.iter().map(|p| p.predicted).collect();
    let actual: Vec<f64> = test.iter().map(|o| o.value).collect();

    metrics(&actual, &predicted)
}

pub fn metrics(actual: &[f64], predicted: &[f64]) -> Result<ModelEvaluation> {
    if actual.len() != predicted.len() {
        bail!("length mismatch: {} actual vs {} predicted", actual.len(), predicted.len());
    }
    let pairs: Vec<(f64, f64)> = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (*a, *p))
        .filter(|(a, p)| a.is_finite() && p.is_finite())
        .collect();
    if pairs.is_empty() {
        bail!("no valid pairs to score");
    }

    let n = pairs.len() as f64;
    let mse = pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / n;
    let mae = pairs.iter().map(|(a, p)| (a - p).abs()).sum::<f64>() / n;

    let pct: Vec<f64> = pairs
        .iter()
        .filter(|(a, _)| *a != 0.0)
        .map(|(a, p)| ((a - p) / a).abs())
        .collect();
    let mape = (!pct.is_empty()).then(|| pct.iter().sum::<f64>() / pct.len() as f64 * 100.0);

    let mean = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let ss_tot = pairs.iter().map(|(a, _)| (a - mean).powi(2)).sum::<f64>();
    let ss_res = mse * n;
    let r2 = (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot);

    Ok(ModelEvaluation {
        holdout: pairs.len(),
        mse,
        mae,
        rmse: mse.sqrt(),
        mape,
        r2,
    })
}
