pub mod aggregate;
pub mod backend;
pub mod evaluation;
pub mod horizon;

use crate::config::PipelineConfig;
use crate::error::{ReportError, ReportResult};
use crate::models::{ForecastPoint, ForecastResult, MergedDataset, ModelEvaluation, Observation};
use anyhow::Result;
use chrono::Days;
use std::sync::Arc;
use tracing::{debug, info, warn};

use self::backend::{DampedTrend, ForecastBackend};
use self::horizon::MAX_HORIZON_DAYS;

/// Shapes the `(date, close)` frame for a backend and checks what comes back.
#[derive(Clone)]
pub struct Forecaster {
    backend: Arc<dyn ForecastBackend>,
    min_observations: usize,
    interval_width: f64,
}

impl Forecaster {
    pub fn new(backend: Arc<dyn ForecastBackend>, min_observations: usize, interval_width: f64) -> Self {
        Self {
            backend,
            min_observations: min_observations.max(3),
            interval_width,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let backend = DampedTrend::new(config.interval_width, config.cap_multiplier)?;
        Ok(Self::new(
            Arc::new(backend),
            config.min_observations,
            config.interval_width,
        ))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn observations(dataset: &MergedDataset) -> Vec<Observation> {
        dataset
            .rows
            .iter()
            .map(|r| Observation {
                date: r.date,
                value: r.close,
            })
            .collect()
    }

    /// Fit on the whole history and predict `horizon` calendar days.
    pub async fn forecast(&self, dataset: &MergedDataset, horizon: usize) -> ReportResult<ForecastResult> {
        if horizon == 0 || horizon > MAX_HORIZON_DAYS {
            return Err(ReportError::InvalidHorizon(format!(
                "{} days is outside 1..={}",
                horizon, MAX_HORIZON_DAYS
            )));
        }

        let history = Self::observations(dataset);
        if history.len() < self.min_observations {
            return Err(ReportError::Forecast(format!(
                "{} has only {} observations, at least {} are required",
                dataset.ticker,
                history.len(),
                self.min_observations
            )));
        }
        let Some(last_observed) = history.last().map(|o| o.date) else {
            return Err(ReportError::Forecast("empty history".to_string()));
        };

        info!(
            "{}: fitting {} on {} observations, horizon {} days",
            dataset.ticker,
            self.backend.name(),
            history.len(),
            horizon
        );

        let backend = Arc::clone(&self.backend);
        let points = tokio::task::spawn_blocking(move || {
            let model = backend.fit(&history)?;
            model.predict(horizon)
        })
        .await
        .map_err(|e| ReportError::Forecast(format!("model task failed: {}", e)))?
        .map_err(|e| ReportError::Forecast(format!("{:#}", e)))?;

        let points = validate_points(points, last_observed, horizon)?;
        debug!("{}: {} forecast rows", dataset.ticker, points.len());

        Ok(ForecastResult {
            ticker: dataset.ticker.clone(),
            horizon,
            last_observed,
            model: self.backend.name().to_string(),
            interval_width: self.interval_width,
            points,
        })
    }

    /// Hold-out evaluation. Failures are logged and yield `None`.
    pub async fn evaluate(&self, dataset: &MergedDataset) -> Option<ModelEvaluation> {
        let history = Self::observations(dataset);
        let backend = Arc::clone(&self.backend);
        let result =
            tokio::task::spawn_blocking(move || evaluation::evaluate(backend.as_ref(), &history)).await;

        match result {
            Ok(Ok(eval)) => Some(eval),
            Ok(Err(e)) => {
                warn!("{}: evaluation skipped: {:#}", dataset.ticker, e);
                None
            }
            Err(e) => {
                warn!("{}: evaluation task failed: {}", dataset.ticker, e);
                None
            }
        }
    }
}

/// Exactly `horizon` rows on consecutive days after `last`, with finite
/// values and ordered bounds.
fn validate_points(
    points: Vec<ForecastPoint>,
    last: chrono::NaiveDate,
    horizon: usize,
) -> ReportResult<Vec<ForecastPoint>> {
    if points.len() != horizon {
        return Err(ReportError::Forecast(format!(
            "backend returned {} rows for a {} day horizon",
            points.len(),
            horizon
        )));
    }

    points
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let expected = last.checked_add_days(Days::new(i as u64 + 1));
            if Some(p.date) != expected {
                return Err(ReportError::Forecast(format!(
                    "unexpected forecast date {} at position {}",
                    p.date, i
                )));
            }
            if !(p.predicted.is_finite() && p.lower.is_finite() && p.upper.is_finite()) {
                return Err(ReportError::Forecast(format!("non-finite forecast on {}", p.date)));
            }

            let mut v = [p.lower, p.predicted, p.upper];
            v.sort_by(f64::total_cmp);
            Ok(ForecastPoint {
                date: p.date,
                lower: v[0],
                predicted: v[1],
                upper: v[2],
            })
        })
        .collect()
}
