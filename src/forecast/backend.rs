//! Forecasting backends behind a `fit` / `predict` contract.

use crate::models::{ForecastPoint, Observation};
use anyhow::{Result, bail};
use chrono::{Days, NaiveDate};
use statrs::distribution::{ContinuousCDF, Normal};

/// Calendar days are converted to trading steps at this rate.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

pub trait ForecastBackend: Send + Sync {
    fn name(&self) -> &str;

    fn fit(&self, history: &[Observation]) -> Result<Box<dyn FittedModel>>;
}

pub trait FittedModel: Send {
    fn last_observed(&self) -> NaiveDate;

    /// Predictions with bounds for arbitrary dates after the last observation.
    fn predict_dates(&self, dates: &[NaiveDate]) -> Result<Vec<ForecastPoint>>;

    /// One point per calendar day for the `horizon` days after the last observation.
    fn predict(&self, horizon: usize) -> Result<Vec<ForecastPoint>> {
        let last = self.last_observed();
        let dates = (1..=horizon as u64)
            .map(|i| last.checked_add_days(Days::new(i)))
            .collect::<Option<Vec<_>>>();
        let Some(dates) = dates else {
            bail!("horizon of {} days runs past the calendar", horizon);
        };
        self.predict_dates(&dates)
    }
}

// ── Damped trend ──────────────────────────────────────────────────────────────

const ALPHAS: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];
const BETAS: [f64; 5] = [0.01, 0.05, 0.1, 0.2, 0.3];
const PHIS: [f64; 4] = [0.8, 0.9, 0.95, 0.98];

/// Holt's damped-trend exponential smoothing on log prices.
///
/// Smoothing parameters are picked by grid search on one-step-ahead squared
/// error. Intervals widen with `sqrt(h)` and every value is clipped into
/// `[0, max(close) * cap_multiplier]`.
#[derive(Debug, Clone)]
pub struct DampedTrend {
    interval_width: f64,
    cap_multiplier: f64,
}

impl DampedTrend {
    pub fn new(interval_width: f64, cap_multiplier: f64) -> Result<Self> {
        if !(interval_width > 0.0 && interval_width < 1.0) {
            bail!("interval width must be in (0, 1), got {}", interval_width);
        }
        if !(cap_multiplier >= 1.0) {
            bail!("cap multiplier must be at least 1, got {}", cap_multiplier);
        }
        Ok(Self {
            interval_width,
            cap_multiplier,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HoltState {
    level: f64,
    trend: f64,
    sse: f64,
}

fn run_holt(y: &[f64], alpha: f64, beta: f64, phi: f64) -> HoltState {
    let mut level = y[0];
    let mut trend = y[1] - y[0];
    let mut sse = 0.0;

    for &obs in &y[1..] {
        let predicted = level + phi * trend;
        let err = obs - predicted;
        sse += err * err;

        let new_level = alpha * obs + (1.0 - alpha) * predicted;
        trend = beta * (new_level - level) + (1.0 - beta) * phi * trend;
        level = new_level;
    }

    HoltState { level, trend, sse }
}

impl ForecastBackend for DampedTrend {
    fn name(&self) -> &str {
        "Damped trend (Holt, log prices)"
    }

    fn fit(&self, history: &[Observation]) -> Result<Box<dyn FittedModel>> {
        if history.len() < 3 {
            bail!("need at least 3 observations, got {}", history.len());
        }
        if history.iter().any(|o| !(o.value > 0.0) || !o.value.is_finite()) {
            bail!("prices must be positive and finite");
        }

        let y: Vec<f64> = history.iter().map(|o| o.value.ln()).collect();

        let mut best: Option<(HoltState, f64)> = None;
        for &alpha in &ALPHAS {
            for &beta in &BETAS {
                for &phi in &PHIS {
                    let state = run_holt(&y, alpha, beta, phi);
                    if !state.sse.is_finite() {
                        continue;
                    }
                    if best.map(|(b, _)| state.sse < b.sse).unwrap_or(true) {
                        best = Some((state, phi));
                    }
                }
            }
        }
        let Some((state, phi)) = best else {
            bail!("smoothing did not converge");
        };

        let sigma = (state.sse / (y.len() - 1) as f64).sqrt();
        let z = Normal::new(0.0, 1.0)?.inverse_cdf(0.5 + self.interval_width / 2.0);
        let max_close = history.iter().map(|o| o.value).fold(f64::MIN, f64::max);
        let last_observed = history[history.len() - 1].date;

        Ok(Box::new(DampedTrendModel {
            level: state.level,
            trend: state.trend,
            phi,
            sigma,
            z,
            cap: max_close * self.cap_multiplier,
            last_observed,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct DampedTrendModel {
    level: f64,
    trend: f64,
    phi: f64,
    sigma: f64,
    z: f64,
    cap: f64,
    last_observed: NaiveDate,
}

impl DampedTrendModel {
    /// Sum of phi^1..phi^h, continuous in h.
    fn damped_steps(&self, h: f64) -> f64 {
        if (self.phi - 1.0).abs() < 1e-12 {
            h
        } else {
            self.phi * (1.0 - self.phi.powf(h)) / (1.0 - self.phi)
        }
    }
}

impl FittedModel for DampedTrendModel {
    fn last_observed(&self) -> NaiveDate {
        self.last_observed
    }

    fn predict_dates(&self, dates: &[NaiveDate]) -> Result<Vec<ForecastPoint>> {
        let clip = |v: f64| v.clamp(0.0, self.cap);

        dates
            .iter()
            .map(|&date| {
                let days = (date - self.last_observed).num_days();
                if days < 1 {
                    bail!("{} is not after the last observation {}", date, self.last_observed);
                }
                let h = days as f64 * TRADING_DAYS_PER_YEAR / 365.0;
                let mean = self.level + self.damped_steps(h) * self.trend;
                let half = self.z * self.sigma * h.sqrt();

                Ok(ForecastPoint {
                    date,
                    predicted: clip(mean.exp()),
                    lower: clip((mean - half).exp()),
                    upper: clip((mean + half).exp()),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize, f: impl Fn(usize) -> f64) -> Vec<Observation> {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        (0..n)
            .map(|i| Observation {
                date: start + Days::new(i as u64),
                value: f(i),
            })
            .collect()
    }

    #[test]
    fn test_predict_shape_and_bounds() {
        let backend = DampedTrend::new(0.8, 2.0).unwrap();
        let hist = history(120, |i| 100.0 + (i as f64 / 6.0).sin() * 4.0 + i as f64 * 0.2);
        let model = backend.fit(&hist).unwrap();
        let points = model.predict(30).unwrap();

        assert_eq!(points.len(), 30);
        assert_eq!(points[0].date, hist[119].date + Days::new(1));
        for w in points.windows(2) {
            assert_eq!(w[1].date, w[0].date + Days::new(1));
        }
        for p in &points {
            assert!(p.lower <= p.predicted && p.predicted <= p.upper, "{p:?}");
            assert!(p.lower >= 0.0);
        }
        // Intervals widen with the horizon.
        assert!(points[29].upper - points[29].lower > points[0].upper - points[0].lower);
    }

    #[test]
    fn test_constant_series_forecasts_flat() {
        let backend = DampedTrend::new(0.8, 2.0).unwrap();
        let model = backend.fit(&history(40, |_| 50.0)).unwrap();
        let points = model.predict(10).unwrap();
        for p in points {
            assert!((p.predicted - 50.0).abs() < 1e-9);
            assert!((p.upper - p.lower).abs() < 1e-9);
        }
    }

    #[test]
    fn test_values_clipped_to_cap() {
        let backend = DampedTrend::new(0.99, 1.0).unwrap();
        let model = backend.fit(&history(60, |i| 10.0 * 1.05f64.powi(i as i32))).unwrap();
        let max_close = 10.0 * 1.05f64.powi(59);
        for p in model.predict(365).unwrap() {
            assert!(p.upper <= max_close + 1e-9);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        let backend = DampedTrend::new(0.8, 2.0).unwrap();
        assert!(backend.fit(&history(2, |_| 1.0)).is_err());
        assert!(backend.fit(&history(10, |i| i as f64)).is_err());
        assert!(DampedTrend::new(1.5, 2.0).is_err());
        assert!(DampedTrend::new(0.8, 0.5).is_err());
    }

    #[test]
    fn test_predict_dates_rejects_past_dates() {
        let backend = DampedTrend::new(0.8, 2.0).unwrap();
        let hist = history(30, |i| 20.0 + i as f64);
        let model = backend.fit(&hist).unwrap();
        assert!(model.predict_dates(&[hist[10].date]).is_err());
    }
}
